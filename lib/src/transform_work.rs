// Copyright 2024 The Skiff Authors
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

//! The mutable context handed to each transformation in a pipeline.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use crate::authoring::Author;
use crate::console::ConsoleRef;
use crate::destination::DestinationReader;
use crate::metadata;
use crate::metadata::Metadata;
use crate::revision::Changes;
use crate::revision::Revision;

/// Working state of one transformation pipeline invocation.
///
/// Transformations may mutate the checkout directory contents and the
/// metadata; everything else is read-only context.
pub struct TransformWork {
    checkout_dir: PathBuf,
    metadata: Metadata,
    changes: Changes,
    console: ConsoleRef,
    migration_name: String,
    current_revision: Revision,
    destination_reader: Option<Box<dyn DestinationReader>>,
}

impl TransformWork {
    /// Creates the work context for one iteration.
    pub fn new(
        checkout_dir: PathBuf,
        metadata: Metadata,
        changes: Changes,
        console: ConsoleRef,
        migration_name: impl Into<String>,
        current_revision: Revision,
    ) -> Self {
        Self {
            checkout_dir,
            metadata,
            changes,
            console,
            migration_name: migration_name.into(),
            current_revision,
            destination_reader: None,
        }
    }

    /// Directory holding the checked-out tree being transformed. Always
    /// absolute.
    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    /// The metadata of the change being synthesized.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The destination commit message.
    pub fn message(&self) -> &str {
        self.metadata.message()
    }

    /// Replaces the destination commit message.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.metadata.set_message(message);
    }

    /// The destination author.
    pub fn author(&self) -> &Author {
        self.metadata.author()
    }

    /// Replaces the destination author.
    pub fn set_author(&mut self, author: Author) {
        self.metadata.set_author(author);
    }

    /// Appends a `Name: value` label line to the message.
    pub fn add_label(&mut self, name: &str, value: &str) {
        let appended = metadata::append_label(self.metadata.message(), name, value);
        self.metadata.set_message(appended);
    }

    /// Records a label without rendering it into the message.
    pub fn add_hidden_label(&mut self, name: &str, value: &str) {
        self.metadata.add_hidden_label(name, value);
    }

    /// Finds a label value, searching the metadata, then the current
    /// changes, then the previously migrated changes.
    pub fn find_label_value(&self, name: &str) -> Option<String> {
        if let Some(value) = self.metadata.find_label_value(name) {
            return Some(value);
        }
        let from_change = |change: &crate::revision::Change| {
            if let Some(values) = change.labels().get(name) {
                return values.last().cloned();
            }
            metadata::parse_message_labels(change.message())
                .into_iter()
                .rev()
                .find(|label| label.name == name)
                .map(|label| label.value)
        };
        self.changes
            .current
            .iter()
            .rev()
            .chain(self.changes.migrated.iter())
            .find_map(|change| from_change(change))
    }

    /// The change lists visible to this invocation.
    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    /// The console for user-visible output.
    pub fn console(&self) -> &ConsoleRef {
        &self.console
    }

    /// Name of the migration being run.
    pub fn migration_name(&self) -> &str {
        &self.migration_name
    }

    /// The origin revision checked out into the workdir.
    pub fn current_revision(&self) -> &Revision {
        &self.current_revision
    }

    /// Makes destination content at the baseline available to
    /// transformations.
    pub fn set_destination_reader(&mut self, reader: Box<dyn DestinationReader>) {
        self.destination_reader = Some(reader);
    }

    /// Read access to destination content at the baseline, when the runner
    /// provided it.
    pub fn destination_reader(&self) -> Option<&dyn DestinationReader> {
        self.destination_reader.as_deref()
    }

    /// Consumes the work, returning the final metadata.
    pub fn into_metadata(self) -> Metadata {
        self.metadata
    }
}

impl fmt::Debug for TransformWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformWork")
            .field("checkout_dir", &self.checkout_dir)
            .field("metadata", &self.metadata)
            .field("migration_name", &self.migration_name)
            .field("current_revision", &self.current_revision)
            .finish_non_exhaustive()
    }
}
