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

//! Scratch directory management for migration runs.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::file_util;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;

/// Owns the scratch space of one migration run.
///
/// Every iteration gets its own subdirectory; subdirectories are cleaned
/// when requested again so reuse within a run starts from an empty tree.
/// When backed by a temporary directory, everything is deleted on drop.
#[derive(Debug)]
pub struct WorkdirManager {
    root: PathBuf,
    // Keeps the backing temp dir alive for the lifetime of the manager.
    _temp: Option<TempDir>,
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl WorkdirManager {
    /// Creates a manager rooted below `output_root`, or in a fresh
    /// temporary directory when `output_root` is `None`.
    pub fn new(output_root: Option<&Path>, migration_name: &str) -> Result<Self, PathError> {
        match output_root {
            Some(output_root) => {
                fs::create_dir_all(output_root).context(output_root)?;
                let root = output_root.join(sanitize(migration_name));
                file_util::create_or_reuse_dir(&root).context(&root)?;
                let root = dunce::canonicalize(&root).context(&root)?;
                Ok(Self { root, _temp: None })
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix(&format!("skiff-{}-", sanitize(migration_name)))
                    .tempdir()
                    .context("<tempdir>")?;
                let root = dunce::canonicalize(temp.path()).context(temp.path())?;
                Ok(Self {
                    root,
                    _temp: Some(temp),
                })
            }
        }
    }

    /// The absolute root of the scratch space.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns an empty subdirectory for one iteration, creating or
    /// cleaning it as needed. The returned path is absolute.
    pub fn fresh_subdir(&self, name: &str) -> Result<PathBuf, PathError> {
        let dir = self.root.join(sanitize(name));
        file_util::create_or_reuse_dir(&dir).context(&dir)?;
        file_util::remove_dir_contents(&dir)?;
        Ok(dir)
    }

    /// Deletes an iteration directory once the iteration is done with it.
    pub fn release_subdir(&self, dir: &Path) -> Result<(), PathError> {
        debug_assert!(dir.starts_with(&self.root));
        if dir.is_dir() {
            fs::remove_dir_all(dir).context(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_backed_manager() {
        let manager = WorkdirManager::new(None, "my/migration").unwrap();
        assert!(manager.root().is_absolute());
        let dir = manager.fresh_subdir("iter-1").unwrap();
        assert!(dir.is_absolute());
        assert!(dir.starts_with(manager.root()));
        fs::write(dir.join("file"), b"x").unwrap();

        // Asking for the same subdirectory cleans it.
        let again = manager.fresh_subdir("iter-1").unwrap();
        assert_eq!(again, dir);
        assert_eq!(again.read_dir().unwrap().count(), 0);
    }

    #[test]
    fn test_rooted_manager_reuses_directory() {
        let temp = tempfile::tempdir().unwrap();
        let manager = WorkdirManager::new(Some(temp.path()), "default").unwrap();
        let first_root = manager.root().to_path_buf();
        drop(manager);
        // Rooted scratch space survives the manager and is reused.
        let manager = WorkdirManager::new(Some(temp.path()), "default").unwrap();
        assert_eq!(manager.root(), first_root);
    }

    #[test]
    fn test_release_subdir() {
        let manager = WorkdirManager::new(None, "default").unwrap();
        let dir = manager.fresh_subdir("iter-1").unwrap();
        fs::write(dir.join("file"), b"x").unwrap();
        manager.release_subdir(&dir).unwrap();
        assert!(!dir.exists());
    }
}
