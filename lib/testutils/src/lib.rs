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

use std::sync::Arc;
use std::sync::Mutex;

use indexmap::IndexMap;
use skiff_lib::config_file::ConfigFile;
use skiff_lib::console::Console;
use skiff_lib::loader::Config;
use skiff_lib::loader::ConfigError;
use skiff_lib::loader::Loader;
use skiff_lib::options::Options;
use tempfile::TempDir;

pub mod endpoints;
pub mod starlark_testing;
pub mod transformations;

pub use endpoints::ProcessedWrite;
pub use endpoints::RecordingDestination;
pub use endpoints::TestingOrigin;
pub use starlark_testing::register_testing_transformation;
pub use starlark_testing::set_testing_endpoints;
pub use starlark_testing::testing_module_def;

pub fn new_temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("skiff-test-")
        .tempdir()
        .unwrap()
}

/// Console that records every message for assertions.
#[derive(Debug, Default)]
pub struct TestConsole {
    messages: Mutex<Vec<(String, String)>>,
}

impl TestConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All messages as `(level, text)`, in emission order.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, level: &str, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(l, text)| l == level && text.contains(needle))
    }

    fn push(&self, level: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level.to_owned(), message.to_owned()));
    }
}

impl Console for TestConsole {
    fn info(&self, message: &str) {
        self.push("info", message);
    }

    fn warn(&self, message: &str) {
        self.push("warn", message);
    }

    fn error(&self, message: &str) {
        self.push("error", message);
    }

    fn progress(&self, message: &str) {
        self.push("progress", message);
    }
}

/// Options tuned for tests: fast retries, everything else default.
pub fn test_options() -> Options {
    let mut options = Options::default();
    options.workflow.retry_base_delay = std::time::Duration::from_millis(1);
    options
}

/// Builds an in-memory config file map. The first entry is the root.
pub fn in_memory_config(files: &[(&str, &str)]) -> ConfigFile {
    let map: IndexMap<String, Vec<u8>> = files
        .iter()
        .map(|(path, content)| ((*path).to_owned(), content.as_bytes().to_vec()))
        .collect();
    ConfigFile::in_memory(Arc::new(map), files[0].0).unwrap()
}

/// Loads an in-memory config with the `testing` module installed.
pub fn load_config(
    files: &[(&str, &str)],
    options: Arc<Options>,
    console: Arc<TestConsole>,
) -> Result<Config, ConfigError> {
    let loader = Loader::with_modules(options, console, [testing_module_def()]);
    loader.load(&in_memory_config(files))
}
