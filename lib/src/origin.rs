// Copyright 2023 The Skiff Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The origin side of a migration: where revisions are read from.
//!
//! Concrete version control backends implement these traits; the core only
//! consumes them.

use std::fmt::Debug;
use std::path::Path;

use thiserror::Error;

use crate::authoring::Authoring;
use crate::error::RepoError;
use crate::glob::Glob;
use crate::revision::Change;
use crate::revision::ChangesResponse;
use crate::revision::LabelMap;
use crate::revision::Revision;

/// Error resolving a reference to a revision.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The reference does not name a revision in the origin.
    #[error("Cannot resolve origin reference: {message}")]
    UnresolvableRevision {
        /// Human-readable description including the reference.
        message: String,
    },
    /// Backend failure while resolving.
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Outcome of one visitor step while walking history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitResult {
    /// Keep walking.
    Continue,
    /// Stop the walk.
    Terminate,
}

/// A readable source of revisions.
pub trait Origin: Debug + Send + Sync {
    /// Resolves a reference (branch, tag, revision id) to a revision.
    /// `reference` may be `None` to use the origin's configured default.
    fn resolve(&self, reference: Option<&str>) -> Result<Revision, ResolveError>;

    /// Creates a reader restricted to `origin_files`.
    fn reader(
        &self,
        origin_files: &Glob,
        authoring: &Authoring,
    ) -> Result<Box<dyn OriginReader>, RepoError>;

    /// The label name under which destinations record this origin's
    /// revision ids, e.g. `GitOrigin-RevId`.
    fn label_name(&self) -> String;

    /// Describes the origin for fingerprinting and audit.
    fn describe(&self, origin_files: &Glob) -> LabelMap;
}

/// Read access to an origin's revisions and history.
pub trait OriginReader: Debug + Send + Sync {
    /// Populates `workdir` with the revision's tree, restricted to the
    /// reader's file set.
    fn checkout(&self, revision: &Revision, workdir: &Path) -> Result<(), RepoError>;

    /// Computes the changes reachable from `to` but not from `from`,
    /// oldest first. `from == None` means "everything reachable from `to`".
    fn changes(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> Result<ChangesResponse, RepoError>;

    /// Loads the change metadata of one revision.
    fn change(&self, revision: &Revision) -> Result<Change, RepoError>;

    /// Walks history starting at `start`, newest first, until the visitor
    /// terminates or history is exhausted.
    fn visit_changes(
        &self,
        start: &Revision,
        visitor: &mut dyn FnMut(&Change) -> VisitResult,
    ) -> Result<(), RepoError>;
}
