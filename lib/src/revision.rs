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

//! Origin revisions and the changes computed between them.

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;

use chrono::DateTime;
use chrono::FixedOffset;
use indexmap::IndexMap;

use crate::authoring::Author;

/// Ordered multimap of labels attached to revisions, changes and metadata.
pub type LabelMap = IndexMap<String, Vec<String>>;

/// An opaque revision token handed out by an origin.
///
/// The identifier is the only part that participates in equality; everything
/// else is advisory data carried along for transformations and templating.
#[derive(Clone, Debug)]
pub struct Revision {
    id: String,
    timestamp: Option<DateTime<FixedOffset>>,
    context_reference: Option<String>,
    labels: LabelMap,
    url: Option<String>,
}

impl Revision {
    /// Creates a revision with just an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            context_reference: None,
            labels: LabelMap::new(),
            url: None,
        }
    }

    /// Attaches the commit timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attaches the human reference (branch, tag) the revision was resolved
    /// from.
    pub fn with_context_reference(mut self, reference: impl Into<String>) -> Self {
        self.context_reference = Some(reference.into());
        self
    }

    /// Appends a label value.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Attaches a web URL for the revision.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Stable identifier of the revision.
    pub fn as_string(&self) -> &str {
        &self.id
    }

    /// Commit timestamp, when the origin records one.
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
    }

    /// The user-supplied reference this revision was resolved from.
    pub fn context_reference(&self) -> Option<&str> {
        self.context_reference.as_deref()
    }

    /// Labels associated with the revision, in insertion order.
    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// All values recorded for one label.
    pub fn label_values(&self, name: &str) -> &[String] {
        self.labels.get(name).map_or(&[], Vec::as_slice)
    }

    /// Web URL of the revision, if known.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Revision {}

impl Hash for Revision {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// One origin change: a revision plus the commit metadata the runner and
/// the transformations care about.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    revision: Revision,
    author: Author,
    message: String,
    timestamp: DateTime<FixedOffset>,
    labels: LabelMap,
    changed_files: Option<Vec<String>>,
    parents: Option<Vec<String>>,
    merge: bool,
}

impl Change {
    /// Creates a change record.
    pub fn new(
        revision: Revision,
        author: Author,
        message: impl Into<String>,
        timestamp: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            revision,
            author,
            message: message.into(),
            timestamp,
            labels: LabelMap::new(),
            changed_files: None,
            parents: None,
            merge: false,
        }
    }

    /// Appends a label value.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Records the files touched by the change. Not all origins can report
    /// this.
    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed_files = Some(files);
        self
    }

    /// Records the parent revision ids. Not all origins can report this.
    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.merge = parents.len() > 1;
        self.parents = Some(parents);
        self
    }

    /// The revision the change describes.
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Author of the change in the origin.
    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Full commit message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// First line of the commit message.
    pub fn first_line_message(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Commit timestamp.
    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    /// Labels recorded on the change itself.
    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Files touched by the change, when the origin reports them.
    pub fn changed_files(&self) -> Option<&[String]> {
        self.changed_files.as_deref()
    }

    /// Parent revision ids, when the origin reports them.
    pub fn parents(&self) -> Option<&[String]> {
        self.parents.as_deref()
    }

    /// Whether the change has more than one parent.
    pub fn is_merge(&self) -> bool {
        self.merge
    }
}

/// The change lists visible to one transformation pipeline invocation.
#[derive(Clone, Debug, Default)]
pub struct Changes {
    /// Changes being migrated by the current iteration, oldest first.
    pub current: Vec<Change>,
    /// Previously migrated changes, for context. Newest first, bounded by
    /// configuration.
    pub migrated: Vec<Change>,
}

/// Why a change computation came back empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmptyReason {
    /// `to` is reachable from `from` and nothing new is in between.
    NoChanges,
    /// `to` is an ancestor of `from`; the destination is ahead of the
    /// requested revision.
    ToIsAncestor,
    /// `from` and `to` do not share history.
    UnrelatedRevisions,
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoChanges => "NO_CHANGES",
            Self::ToIsAncestor => "TO_IS_ANCESTOR",
            Self::UnrelatedRevisions => "UNRELATED_REVISIONS",
        };
        f.write_str(s)
    }
}

/// Result of asking an origin for the changes between two revisions.
#[derive(Clone, Debug)]
pub enum ChangesResponse {
    /// At least one new change, ordered oldest to newest.
    Changes(Vec<Change>),
    /// Nothing to migrate, with the reason.
    Empty(EmptyReason),
}

impl ChangesResponse {
    /// Builds a response from a possibly-empty list, mapping an empty list
    /// to [`EmptyReason::NoChanges`].
    pub fn from_changes(changes: Vec<Change>) -> Self {
        if changes.is_empty() {
            Self::Empty(EmptyReason::NoChanges)
        } else {
            Self::Changes(changes)
        }
    }

    /// The changes, or `None` when empty.
    pub fn changes(&self) -> Option<&[Change]> {
        match self {
            Self::Changes(changes) => Some(changes),
            Self::Empty(_) => None,
        }
    }

    /// The empty reason, or `None` when there are changes.
    pub fn empty_reason(&self) -> Option<EmptyReason> {
        match self {
            Self::Changes(_) => None,
            Self::Empty(reason) => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn timestamp() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2023, 4, 1, 12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_revision_equality_is_by_id() {
        let plain = Revision::new("abc123");
        let decorated = Revision::new("abc123")
            .with_context_reference("main")
            .with_label("GitOrigin-RevId", "abc123");
        assert_eq!(plain, decorated);
        assert_ne!(plain, Revision::new("def456"));
    }

    #[test]
    fn test_revision_labels_keep_insertion_order() {
        let revision = Revision::new("abc")
            .with_label("B", "1")
            .with_label("A", "2")
            .with_label("B", "3");
        let keys: Vec<_> = revision.labels().keys().cloned().collect();
        assert_eq!(keys, ["B", "A"]);
        assert_eq!(revision.label_values("B"), ["1", "3"]);
        assert_eq!(revision.label_values("missing"), [""; 0]);
    }

    #[test]
    fn test_change_first_line() {
        let change = Change::new(
            Revision::new("abc"),
            Author::new("A", "a@example.com"),
            "summary line\n\nbody text\n",
            timestamp(),
        );
        assert_eq!(change.first_line_message(), "summary line");
    }

    #[test]
    fn test_change_merge_flag_follows_parents() {
        let single = Change::new(
            Revision::new("abc"),
            Author::new("A", "a@example.com"),
            "m",
            timestamp(),
        )
        .with_parents(vec!["p1".to_owned()]);
        assert!(!single.is_merge());
        let merge = Change::new(
            Revision::new("abc"),
            Author::new("A", "a@example.com"),
            "m",
            timestamp(),
        )
        .with_parents(vec!["p1".to_owned(), "p2".to_owned()]);
        assert!(merge.is_merge());
    }

    #[test]
    fn test_changes_response_from_empty_list() {
        let response = ChangesResponse::from_changes(vec![]);
        assert_eq!(response.empty_reason(), Some(EmptyReason::NoChanges));
        assert!(response.changes().is_none());
    }
}
