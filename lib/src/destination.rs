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

//! The destination side of a migration: where transformed changes are
//! written.

use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::FixedOffset;
use thiserror::Error;

use crate::authoring::Author;
use crate::console::Console;
use crate::error::RepoError;
use crate::glob::Glob;
use crate::origin::VisitResult;
use crate::revision::Change;
use crate::revision::LabelMap;
use crate::revision::Revision;

/// What the destination knows about previous migrations under one context
/// reference.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct DestinationStatus {
    /// Origin revision id recorded by the last successful write.
    pub baseline: Option<String>,
    /// Origin revision ids of in-flight changes (including dry runs).
    pub pending_changes: Vec<String>,
}

/// Per-iteration context for obtaining a writer.
#[derive(Clone, Debug, Default)]
pub struct WriterContext {
    /// The destination must not publish; it may still report what it would
    /// have done.
    pub dry_run: bool,
    /// The human reference (branch, change id) the migrated revision was
    /// resolved from.
    pub context_reference: Option<String>,
}

/// The destination-ready change set produced by one pipeline run.
#[derive(Clone, Debug)]
pub struct TransformResult {
    checkout_dir: PathBuf,
    revision: Revision,
    author: Author,
    message: String,
    timestamp: Option<DateTime<FixedOffset>>,
    changes: Vec<Change>,
    baseline: Option<String>,
    rev_id_label: String,
}

impl TransformResult {
    /// Assembles a result. `changes` are the origin changes covered by this
    /// write, oldest first.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        checkout_dir: PathBuf,
        revision: Revision,
        author: Author,
        message: impl Into<String>,
        timestamp: Option<DateTime<FixedOffset>>,
        changes: Vec<Change>,
        baseline: Option<String>,
        rev_id_label: impl Into<String>,
    ) -> Self {
        Self {
            checkout_dir,
            revision,
            author,
            message: message.into(),
            timestamp,
            changes,
            baseline,
            rev_id_label: rev_id_label.into(),
        }
    }

    /// Directory holding the transformed tree.
    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    /// The origin revision this write corresponds to.
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Author for the destination change.
    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Message for the destination change, before the rev-id label is
    /// appended by the destination.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Timestamp for the destination change, when the origin recorded one.
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
    }

    /// Origin changes covered by this write, oldest first.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Baseline the result was computed against, if any.
    pub fn baseline(&self) -> Option<&str> {
        self.baseline.as_deref()
    }

    /// Name of the label under which the destination records the origin
    /// revision id.
    pub fn rev_id_label(&self) -> &str {
        &self.rev_id_label
    }

    /// Value the destination records under [`TransformResult::rev_id_label`].
    pub fn rev_id_value(&self) -> &str {
        self.revision.as_string()
    }
}

/// Classification of one destination effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationEffectType {
    /// A new destination change was created.
    Created,
    /// An existing destination change was updated.
    Updated,
    /// Nothing was written.
    Noop,
    /// The write failed.
    Error,
    /// Work started; a terminal effect follows.
    Started,
    /// A transient failure; the operation may be retried.
    TemporaryError,
}

impl std::fmt::Display for DestinationEffectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Noop => "NOOP",
            Self::Error => "ERROR",
            Self::Started => "STARTED",
            Self::TemporaryError => "TEMPORARY_ERROR",
        };
        f.write_str(s)
    }
}

/// A reference to an entity created or updated in the destination.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DestinationRef {
    /// Destination-specific identifier (commit hash, review number).
    pub id: String,
    /// Kind of entity, e.g. `commit` or `review`.
    pub kind: String,
    /// Web URL, when the destination has one.
    pub url: Option<String>,
}

/// One observable consequence of a destination write.
#[derive(Clone, Debug, serde::Serialize)]
pub struct DestinationEffect {
    /// What happened.
    pub effect_type: DestinationEffectType,
    /// Human-readable description.
    pub summary: String,
    /// Origin changes this effect covers.
    #[serde(skip)]
    pub origin_changes: Vec<Change>,
    /// The created or updated destination entity.
    pub destination_ref: Option<DestinationRef>,
    /// Errors attached to the effect.
    pub errors: Vec<String>,
}

impl DestinationEffect {
    /// A `CREATED` effect.
    pub fn created(
        summary: impl Into<String>,
        origin_changes: Vec<Change>,
        destination_ref: DestinationRef,
    ) -> Self {
        Self {
            effect_type: DestinationEffectType::Created,
            summary: summary.into(),
            origin_changes,
            destination_ref: Some(destination_ref),
            errors: vec![],
        }
    }

    /// An `UPDATED` effect.
    pub fn updated(
        summary: impl Into<String>,
        origin_changes: Vec<Change>,
        destination_ref: DestinationRef,
    ) -> Self {
        Self {
            effect_type: DestinationEffectType::Updated,
            summary: summary.into(),
            origin_changes,
            destination_ref: Some(destination_ref),
            errors: vec![],
        }
    }

    /// A `NOOP` effect with a reason.
    pub fn noop(summary: impl Into<String>) -> Self {
        Self {
            effect_type: DestinationEffectType::Noop,
            summary: summary.into(),
            origin_changes: vec![],
            destination_ref: None,
            errors: vec![],
        }
    }
}

/// Error writing to a destination.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The transformed tree has no delta against the destination baseline.
    #[error("{message}")]
    EmptyChange {
        /// Why the change is empty.
        message: String,
    },
    /// Backend failure.
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A destination change visited during baseline inference.
#[derive(Clone, Debug)]
pub struct DestinationChange {
    /// Destination-specific change id.
    pub id: String,
    /// Full destination commit message, labels included.
    pub message: String,
}

/// A writable target of migrations.
pub trait Destination: Debug + Send + Sync {
    /// Creates a writer for one iteration.
    fn writer(&self, context: &WriterContext) -> Result<Box<dyn DestinationWriter>, RepoError>;

    /// Describes the destination for fingerprinting and audit.
    fn describe(&self) -> LabelMap;
}

/// Write access to a destination.
pub trait DestinationWriter: Debug {
    /// What the destination recorded for files under `glob` with the
    /// `label_name` rev-id label. `None` before any write.
    fn destination_status(
        &self,
        glob: &Glob,
        label_name: &str,
    ) -> Result<Option<DestinationStatus>, RepoError>;

    /// Publishes one transformed change set. Implementations append the
    /// rev-id label to the message and must dedupe by it so re-running an
    /// already-migrated range yields no new change.
    fn write(
        &mut self,
        result: &TransformResult,
        glob: &Glob,
        console: &dyn Console,
    ) -> Result<Vec<DestinationEffect>, WriteError>;

    /// Read-only view of destination files at `baseline`, for
    /// transformations that synthesize from existing destination content.
    fn destination_reader(
        &self,
        _console: &dyn Console,
        _baseline: Option<&str>,
        _workdir: &Path,
    ) -> Result<Box<dyn DestinationReader>, RepoError> {
        Err(RepoError::permanent(
            "this destination does not support reading previous state",
        ))
    }

    /// Walks destination history newest first, visiting changes that carry
    /// any of `label_names` (all changes when empty), until the visitor
    /// terminates.
    fn visit_changes(
        &self,
        _label_names: &[String],
        _visitor: &mut dyn FnMut(&DestinationChange) -> VisitResult,
    ) -> Result<(), RepoError> {
        Err(RepoError::permanent(
            "this destination does not support history visits",
        ))
    }
}

/// Read-only access to destination content at a baseline.
pub trait DestinationReader {
    /// Reads one file by root-relative slash-separated path.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, RepoError>;

    /// Copies the files matching `glob` into `dest`.
    fn copy_files(&self, glob: &Glob, dest: &Path) -> Result<(), RepoError>;
}
