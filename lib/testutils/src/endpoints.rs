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

#![expect(missing_docs)]

//! In-memory origin and destination endpoints for tests.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::FixedOffset;
use chrono::TimeZone as _;
use indexmap::IndexMap;
use skiff_lib::authoring::Author;
use skiff_lib::authoring::Authoring;
use skiff_lib::console::Console;
use skiff_lib::destination::Destination;
use skiff_lib::destination::DestinationChange;
use skiff_lib::destination::DestinationEffect;
use skiff_lib::destination::DestinationReader;
use skiff_lib::destination::DestinationRef;
use skiff_lib::destination::DestinationStatus;
use skiff_lib::destination::DestinationWriter;
use skiff_lib::destination::TransformResult;
use skiff_lib::destination::WriteError;
use skiff_lib::destination::WriterContext;
use skiff_lib::error::RepoError;
use skiff_lib::glob::Glob;
use skiff_lib::metadata;
use skiff_lib::origin::Origin;
use skiff_lib::origin::OriginReader;
use skiff_lib::origin::ResolveError;
use skiff_lib::origin::VisitResult;
use skiff_lib::revision::Change;
use skiff_lib::revision::ChangesResponse;
use skiff_lib::revision::EmptyReason;
use skiff_lib::revision::LabelMap;
use skiff_lib::revision::Revision;

pub const TESTING_LABEL_NAME: &str = "TestOrigin-RevId";
pub const DEFAULT_AUTHOR: &str = "Origin Author <origin@example.com>";

type FileTree = IndexMap<String, Vec<u8>>;

fn base_time(index: usize) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
        + chrono::Duration::minutes(index as i64)
}

#[derive(Clone, Debug)]
struct StoredChange {
    change: Change,
    tree: FileTree,
}

/// An in-memory origin whose history is a linear list of changes, each
/// carrying a full tree snapshot.
#[derive(Debug, Default)]
pub struct TestingOrigin {
    changes: Mutex<Vec<StoredChange>>,
}

impl TestingOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends a change. `files` are applied on top of the previous tree
    /// snapshot.
    pub fn add_change(&self, id: &str, message: &str, files: &[(&str, &str)]) {
        self.add_change_with_author(
            id,
            message,
            files,
            &DEFAULT_AUTHOR.parse::<Author>().unwrap(),
        );
    }

    pub fn add_change_with_author(
        &self,
        id: &str,
        message: &str,
        files: &[(&str, &str)],
        author: &Author,
    ) {
        let mut changes = self.changes.lock().unwrap();
        let mut tree = changes.last().map(|c| c.tree.clone()).unwrap_or_default();
        for (path, content) in files {
            tree.insert((*path).to_owned(), content.as_bytes().to_vec());
        }
        let index = changes.len();
        let parents = changes
            .last()
            .map(|c| vec![c.change.revision().as_string().to_owned()])
            .unwrap_or_default();
        let revision = Revision::new(id).with_timestamp(base_time(index));
        let change = Change::new(revision, author.clone(), message, base_time(index))
            .with_changed_files(files.iter().map(|(path, _)| (*path).to_owned()).collect())
            .with_parents(parents);
        changes.push(StoredChange { change, tree });
    }

    pub fn head_id(&self) -> Option<String> {
        self.changes
            .lock()
            .unwrap()
            .last()
            .map(|c| c.change.revision().as_string().to_owned())
    }
}

impl Origin for TestingOrigin {
    fn resolve(&self, reference: Option<&str>) -> Result<Revision, ResolveError> {
        let changes = self.changes.lock().unwrap();
        let stored = match reference {
            None | Some("head") => changes.last(),
            Some(id) => changes
                .iter()
                .find(|c| c.change.revision().as_string() == id),
        };
        let stored = stored.ok_or_else(|| ResolveError::UnresolvableRevision {
            message: format!(
                "reference '{}' not found in testing origin",
                reference.unwrap_or("head")
            ),
        })?;
        Ok(stored
            .change
            .revision()
            .clone()
            .with_context_reference(reference.unwrap_or("head")))
    }

    fn reader(
        &self,
        origin_files: &Glob,
        _authoring: &Authoring,
    ) -> Result<Box<dyn OriginReader>, RepoError> {
        Ok(Box::new(TestingOriginReader {
            changes: self.changes.lock().unwrap().clone(),
            origin_files: origin_files.clone(),
        }))
    }

    fn label_name(&self) -> String {
        TESTING_LABEL_NAME.to_owned()
    }

    fn describe(&self, origin_files: &Glob) -> LabelMap {
        let mut map = LabelMap::new();
        map.insert("type".to_owned(), vec!["testing.origin".to_owned()]);
        map.insert("files".to_owned(), vec![origin_files.to_string()]);
        map
    }
}

#[derive(Debug)]
struct TestingOriginReader {
    changes: Vec<StoredChange>,
    origin_files: Glob,
}

impl TestingOriginReader {
    fn index_of(&self, revision: &Revision) -> Result<usize, RepoError> {
        self.changes
            .iter()
            .position(|c| c.change.revision() == revision)
            .ok_or_else(|| {
                RepoError::permanent(format!("unknown revision '{revision}' in testing origin"))
            })
    }
}

impl OriginReader for TestingOriginReader {
    fn checkout(&self, revision: &Revision, workdir: &Path) -> Result<(), RepoError> {
        let index = self.index_of(revision)?;
        for (path, content) in &self.changes[index].tree {
            if !self.origin_files.matches(path) {
                continue;
            }
            let target = workdir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| RepoError::permanent(err.to_string()))?;
            }
            fs::write(&target, content).map_err(|err| RepoError::permanent(err.to_string()))?;
        }
        Ok(())
    }

    fn changes(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> Result<ChangesResponse, RepoError> {
        let to_index = self.index_of(to)?;
        let from_index = match from {
            None => {
                let all = self.changes[..=to_index]
                    .iter()
                    .map(|c| c.change.clone())
                    .collect();
                return Ok(ChangesResponse::Changes(all));
            }
            Some(from) => match self
                .changes
                .iter()
                .position(|c| c.change.revision() == from)
            {
                Some(index) => index,
                None => return Ok(ChangesResponse::Empty(EmptyReason::UnrelatedRevisions)),
            },
        };
        if from_index == to_index {
            return Ok(ChangesResponse::Empty(EmptyReason::NoChanges));
        }
        if from_index > to_index {
            return Ok(ChangesResponse::Empty(EmptyReason::ToIsAncestor));
        }
        let new = self.changes[from_index + 1..=to_index]
            .iter()
            .map(|c| c.change.clone())
            .collect();
        Ok(ChangesResponse::Changes(new))
    }

    fn change(&self, revision: &Revision) -> Result<Change, RepoError> {
        let index = self.index_of(revision)?;
        Ok(self.changes[index].change.clone())
    }

    fn visit_changes(
        &self,
        start: &Revision,
        visitor: &mut dyn FnMut(&Change) -> VisitResult,
    ) -> Result<(), RepoError> {
        let start_index = self.index_of(start)?;
        for stored in self.changes[..=start_index].iter().rev() {
            if visitor(&stored.change) == VisitResult::Terminate {
                break;
            }
        }
        Ok(())
    }
}

/// One write as observed by the [`RecordingDestination`].
#[derive(Clone, Debug)]
pub struct ProcessedWrite {
    pub rev_id: String,
    pub message: String,
    pub author: Author,
    pub files: FileTree,
    pub dry_run: bool,
    pub baseline: Option<String>,
    pub context_reference: Option<String>,
}

#[derive(Debug, Default)]
struct DestinationState {
    writes: Vec<ProcessedWrite>,
}

/// A destination that records every write in memory and implements the
/// rev-id label bookkeeping real destinations provide.
#[derive(Debug, Default)]
pub struct RecordingDestination {
    state: Arc<Mutex<DestinationState>>,
    /// When set, every write fails with a transient error this many times
    /// before succeeding. Exercises the runner's retry policy.
    transient_failures: Arc<Mutex<usize>>,
}

impl RecordingDestination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_transiently(&self, times: usize) {
        *self.transient_failures.lock().unwrap() = times;
    }

    /// All writes, oldest first.
    pub fn writes(&self) -> Vec<ProcessedWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Non-dry-run writes, oldest first.
    pub fn published_writes(&self) -> Vec<ProcessedWrite> {
        self.writes().into_iter().filter(|w| !w.dry_run).collect()
    }
}

fn read_tree(root: &Path, glob: &Glob) -> Result<FileTree, RepoError> {
    fn walk(root: &Path, dir: &Path, tree: &mut FileTree) -> std::io::Result<()> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(std::fs::DirEntry::file_name);
        for entry in entries {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, tree)?;
            } else {
                let relative = path
                    .strip_prefix(root)
                    .expect("walk stays under root")
                    .to_string_lossy()
                    .replace('\\', "/");
                tree.insert(relative, fs::read(&path)?);
            }
        }
        Ok(())
    }
    let mut tree = FileTree::new();
    walk(root, root, &mut tree).map_err(|err| RepoError::permanent(err.to_string()))?;
    Ok(tree.into_iter().filter(|(path, _)| glob.matches(path)).collect())
}

impl Destination for RecordingDestination {
    fn writer(&self, context: &WriterContext) -> Result<Box<dyn DestinationWriter>, RepoError> {
        Ok(Box::new(RecordingWriter {
            state: self.state.clone(),
            transient_failures: self.transient_failures.clone(),
            context: context.clone(),
        }))
    }

    fn describe(&self) -> LabelMap {
        let mut map = LabelMap::new();
        map.insert("type".to_owned(), vec!["testing.destination".to_owned()]);
        map
    }
}

#[derive(Debug)]
struct RecordingWriter {
    state: Arc<Mutex<DestinationState>>,
    transient_failures: Arc<Mutex<usize>>,
    context: WriterContext,
}

impl DestinationWriter for RecordingWriter {
    fn destination_status(
        &self,
        _glob: &Glob,
        label_name: &str,
    ) -> Result<Option<DestinationStatus>, RepoError> {
        let state = self.state.lock().unwrap();
        if state.writes.is_empty() {
            return Ok(None);
        }
        let baseline = state.writes.iter().rev().find_map(|write| {
            if write.dry_run {
                return None;
            }
            metadata::parse_message_labels(&write.message)
                .into_iter()
                .rev()
                .find(|label| label.name == label_name)
                .map(|label| label.value)
        });
        let pending = state
            .writes
            .iter()
            .filter(|write| write.dry_run && write.context_reference == self.context.context_reference)
            .map(|write| write.rev_id.clone())
            .collect();
        Ok(Some(DestinationStatus {
            baseline,
            pending_changes: pending,
        }))
    }

    fn write(
        &mut self,
        result: &TransformResult,
        glob: &Glob,
        console: &dyn Console,
    ) -> Result<Vec<DestinationEffect>, WriteError> {
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(WriteError::Repo(RepoError::transient(
                    "simulated destination outage",
                )));
            }
        }
        let files = read_tree(result.checkout_dir(), glob)?;
        let mut state = self.state.lock().unwrap();
        let last_published = state.writes.iter().rev().find(|write| !write.dry_run);
        if let Some(last) = last_published {
            if last.rev_id == result.rev_id_value() {
                return Err(WriteError::EmptyChange {
                    message: format!(
                        "change '{}' is already migrated",
                        result.rev_id_value()
                    ),
                });
            }
            if last.files == files {
                return Err(WriteError::EmptyChange {
                    message: format!(
                        "migration of '{}' resulted in an empty change",
                        result.rev_id_value()
                    ),
                });
            }
        }
        let message = metadata::append_label(
            result.message(),
            result.rev_id_label(),
            result.rev_id_value(),
        );
        let write = ProcessedWrite {
            rev_id: result.rev_id_value().to_owned(),
            message,
            author: result.author().clone(),
            files,
            dry_run: self.context.dry_run,
            baseline: result.baseline().map(str::to_owned),
            context_reference: self.context.context_reference.clone(),
        };
        state.writes.push(write);
        let id = format!("dest-{}", state.writes.len());
        console.info(&format!(
            "Recorded destination revision {id} for '{}'",
            result.rev_id_value()
        ));
        Ok(vec![DestinationEffect::created(
            format!("Created revision {id}"),
            result.changes().to_vec(),
            DestinationRef {
                id,
                kind: "commit".to_owned(),
                url: None,
            },
        )])
    }

    fn destination_reader(
        &self,
        _console: &dyn Console,
        _baseline: Option<&str>,
        _workdir: &Path,
    ) -> Result<Box<dyn DestinationReader>, RepoError> {
        let files = self
            .state
            .lock()
            .unwrap()
            .writes
            .iter()
            .rev()
            .find(|write| !write.dry_run)
            .map(|write| write.files.clone())
            .unwrap_or_default();
        Ok(Box::new(RecordingReader { files }))
    }

    fn visit_changes(
        &self,
        label_names: &[String],
        visitor: &mut dyn FnMut(&DestinationChange) -> VisitResult,
    ) -> Result<(), RepoError> {
        let state = self.state.lock().unwrap();
        for (index, write) in state.writes.iter().enumerate().rev() {
            if !label_names.is_empty() {
                let labels = metadata::parse_message_labels(&write.message);
                if !labels
                    .iter()
                    .any(|label| label_names.contains(&label.name))
                {
                    continue;
                }
            }
            let change = DestinationChange {
                id: format!("dest-{}", index + 1),
                message: write.message.clone(),
            };
            if visitor(&change) == VisitResult::Terminate {
                break;
            }
        }
        Ok(())
    }
}

struct RecordingReader {
    files: FileTree,
}

impl DestinationReader for RecordingReader {
    fn read_file(&self, path: &str) -> Result<Vec<u8>, RepoError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RepoError::permanent(format!("no file '{path}' at baseline")))
    }

    fn copy_files(&self, glob: &Glob, dest: &Path) -> Result<(), RepoError> {
        for (path, content) in &self.files {
            if !glob.matches(path) {
                continue;
            }
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| RepoError::permanent(err.to_string()))?;
            }
            fs::write(target, content).map_err(|err| RepoError::permanent(err.to_string()))?;
        }
        Ok(())
    }
}
