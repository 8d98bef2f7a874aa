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

//! Addressable configuration sources.
//!
//! A [`ConfigFile`] is a handle to one configuration file plus the rules to
//! resolve labels mentioned by it. Absolute labels start with `//` and
//! resolve against a configured root; relative labels resolve against the
//! current file's directory. Labels never reference parent directories.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::hash::Hash;
use std::hash::Hasher;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use indexmap::IndexSet;
use thiserror::Error;

use crate::file_util;

/// Error resolving or reading a config label.
#[derive(Debug, Error)]
pub enum LabelError {
    /// The label is empty or otherwise ill-formed.
    #[error("Invalid config label '{label}'")]
    Invalid {
        /// The rejected label.
        label: String,
    },
    /// The label contains a `..` segment.
    #[error("Config label '{label}' must not reference parent directories")]
    ParentReference {
        /// The rejected label.
        label: String,
    },
    /// An absolute (`//`) label was used without a configured root.
    #[error(
        "Absolute label '{label}' requires a configuration root; pass --config-root to set one"
    )]
    MissingRoot {
        /// The rejected label.
        label: String,
    },
    /// The label does not name an existing regular file.
    #[error("Cannot resolve '{label}': '{path}' is not an existing regular file")]
    NotFound {
        /// The unresolvable label.
        label: String,
        /// The path the label resolved to.
        path: String,
    },
    /// Reading the content failed.
    #[error("Cannot read config file '{path}'")]
    Io {
        /// Display path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
enum Inner {
    OnDisk {
        path: PathBuf,
        root: Option<PathBuf>,
    },
    InMemory {
        files: Arc<IndexMap<String, Vec<u8>>>,
        current: String,
    },
    Fallback {
        primary: ConfigFile,
        fallback: ConfigFile,
    },
}

/// Cheap-clone handle to one configuration source.
#[derive(Clone, Debug)]
pub struct ConfigFile {
    inner: Arc<Inner>,
}

fn reject_bad_segments(label: &str) -> Result<(), LabelError> {
    if label.is_empty() {
        return Err(LabelError::Invalid {
            label: label.to_owned(),
        });
    }
    let body = label.strip_prefix("//").unwrap_or(label);
    if body.split('/').any(|segment| segment == "..") {
        return Err(LabelError::ParentReference {
            label: label.to_owned(),
        });
    }
    Ok(())
}

/// Joins `label` onto the parent of the slash-separated `current` key and
/// drops `.` segments.
fn join_relative_key(current: &str, label: &str) -> String {
    let parent = current.rsplit_once('/').map(|(parent, _)| parent);
    let joined = match parent {
        Some(parent) => format!("{parent}/{label}"),
        None => label.to_owned(),
    };
    joined
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

impl ConfigFile {
    /// Creates a handle for a file on disk. `path` should be absolute.
    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner::OnDisk {
                path: path.into(),
                root: None,
            }),
        }
    }

    /// Creates a handle for a file on disk with a root for absolute labels.
    pub fn on_disk_with_root(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner::OnDisk {
                path: path.into(),
                root: Some(root.into()),
            }),
        }
    }

    /// Creates a handle into an immutable in-memory file map. Keys are
    /// root-relative slash-separated paths; `current` must be one of them.
    pub fn in_memory(
        files: Arc<IndexMap<String, Vec<u8>>>,
        current: &str,
    ) -> Result<Self, LabelError> {
        if !files.contains_key(current) {
            return Err(LabelError::NotFound {
                label: current.to_owned(),
                path: current.to_owned(),
            });
        }
        Ok(Self {
            inner: Arc::new(Inner::InMemory {
                files,
                current: current.to_owned(),
            }),
        })
    }

    /// Wraps this handle so that failed resolutions are retried against
    /// `fallback`. Path and identifier follow `self`.
    pub fn with_fallback(self, fallback: Self) -> Self {
        Self {
            inner: Arc::new(Inner::Fallback {
                primary: self,
                fallback,
            }),
        }
    }

    /// Resolves a label relative to this file. Pure: resolving the same
    /// label twice yields equal handles.
    pub fn resolve(&self, label: &str) -> Result<Self, LabelError> {
        reject_bad_segments(label)?;
        if label == "." {
            return Ok(self.clone());
        }
        match &*self.inner {
            Inner::OnDisk { path, root } => {
                let candidate = if let Some(rel) = label.strip_prefix("//") {
                    let root = root.as_ref().ok_or_else(|| LabelError::MissingRoot {
                        label: label.to_owned(),
                    })?;
                    root.join(rel)
                } else {
                    path.parent().unwrap_or(Path::new("")).join(label)
                };
                let candidate = file_util::normalize_path(&candidate);
                if !candidate.is_file() {
                    return Err(LabelError::NotFound {
                        label: label.to_owned(),
                        path: candidate.display().to_string(),
                    });
                }
                Ok(Self {
                    inner: Arc::new(Inner::OnDisk {
                        path: candidate,
                        root: root.clone(),
                    }),
                })
            }
            Inner::InMemory { files, current } => {
                let key = if let Some(rel) = label.strip_prefix("//") {
                    join_relative_key("", rel)
                } else {
                    join_relative_key(current, label)
                };
                if !files.contains_key(&key) {
                    return Err(LabelError::NotFound {
                        label: label.to_owned(),
                        path: key,
                    });
                }
                Ok(Self {
                    inner: Arc::new(Inner::InMemory {
                        files: files.clone(),
                        current: key,
                    }),
                })
            }
            Inner::Fallback { primary, fallback } => primary
                .resolve(label)
                .or_else(|_| fallback.resolve(label)),
        }
    }

    /// Display path, stable within one process.
    pub fn path(&self) -> String {
        match &*self.inner {
            Inner::OnDisk { path, .. } => path.display().to_string(),
            Inner::InMemory { current, .. } => current.clone(),
            Inner::Fallback { primary, .. } => primary.path(),
        }
    }

    /// Root-relative identifier when a root is configured, else the display
    /// path.
    pub fn identifier(&self) -> String {
        match &*self.inner {
            Inner::OnDisk { path, root } => match root {
                Some(root) => {
                    let relative = file_util::relative_path(root, path);
                    file_util::to_slash_string(&relative)
                        .unwrap_or_else(|| relative.display().to_string())
                }
                None => path.display().to_string(),
            },
            Inner::InMemory { current, .. } => current.clone(),
            Inner::Fallback { primary, .. } => primary.identifier(),
        }
    }

    /// Reads the file's bytes.
    pub fn read_content(&self) -> Result<Vec<u8>, LabelError> {
        match &*self.inner {
            Inner::OnDisk { path, .. } => fs::read(path).map_err(|source| LabelError::Io {
                path: path.display().to_string(),
                source,
            }),
            Inner::InMemory { files, current } => Ok(files
                .get(current)
                .expect("current key is validated at construction")
                .clone()),
            Inner::Fallback { primary, fallback } => primary
                .read_content()
                .or_else(|_| fallback.read_content()),
        }
    }
}

impl PartialEq for ConfigFile {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for ConfigFile {}

impl Hash for ConfigFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path().hash(state);
    }
}

impl fmt::Display for ConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Wrapper recording every [`ConfigFile`] materialized through `resolve`,
/// transitively. Loader-internal; loading is single-threaded.
#[derive(Debug)]
pub struct CapturingConfigFile {
    file: ConfigFile,
    children: RefCell<Vec<Rc<CapturingConfigFile>>>,
}

impl CapturingConfigFile {
    /// Wraps a file as the root of a capture.
    pub fn new(file: ConfigFile) -> Rc<Self> {
        Rc::new(Self {
            file,
            children: RefCell::new(vec![]),
        })
    }

    /// The wrapped handle.
    pub fn file(&self) -> &ConfigFile {
        &self.file
    }

    /// Display path of the wrapped handle.
    pub fn path(&self) -> String {
        self.file.path()
    }

    /// Identifier of the wrapped handle.
    pub fn identifier(&self) -> String {
        self.file.identifier()
    }

    /// Content of the wrapped handle.
    pub fn read_content(&self) -> Result<Vec<u8>, LabelError> {
        self.file.read_content()
    }

    /// Resolves `label` and records the child.
    pub fn resolve(self: &Rc<Self>, label: &str) -> Result<Rc<Self>, LabelError> {
        let resolved = self.file.resolve(label)?;
        if resolved == self.file {
            return Ok(self.clone());
        }
        // Reuse an existing child so repeated resolution does not grow the
        // record.
        if let Some(existing) = self
            .children
            .borrow()
            .iter()
            .find(|child| child.file == resolved)
        {
            return Ok(existing.clone());
        }
        let child = Self::new(resolved);
        self.children.borrow_mut().push(child.clone());
        Ok(child)
    }

    /// The transitive closure of files resolved through this wrapper,
    /// including the wrapper itself, insertion-ordered and deduplicated by
    /// path.
    pub fn all_loaded_files(self: &Rc<Self>) -> IndexMap<String, ConfigFile> {
        let mut result = IndexMap::new();
        fn walk(node: &Rc<CapturingConfigFile>, result: &mut IndexMap<String, ConfigFile>) {
            if result
                .insert(node.path(), node.file.clone())
                .is_some()
            {
                return;
            }
            for child in node.children.borrow().iter() {
                walk(child, result);
            }
        }
        walk(self, &mut result);
        result
    }
}

impl PartialEq for CapturingConfigFile {
    fn eq(&self, other: &Self) -> bool {
        if self.file != other.file {
            return false;
        }
        let child_paths = |node: &Self| -> IndexSet<String> {
            node.children
                .borrow()
                .iter()
                .map(|child| child.path())
                .collect()
        };
        child_paths(self) == child_paths(other)
    }
}
