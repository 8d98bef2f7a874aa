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

//! User-visible output sink for migrations.
//!
//! Developer diagnostics go through `tracing`; everything a user of a
//! migration is supposed to see (progress, warnings, destination messages)
//! goes through a [`Console`] so that embedders and tests can capture it.

use std::fmt::Debug;
use std::sync::Arc;

/// Sink for user-visible migration output.
pub trait Console: Debug + Send + Sync {
    /// Reports normal progress.
    fn info(&self, message: &str);

    /// Reports a condition the user should look at but which does not stop
    /// the migration.
    fn warn(&self, message: &str);

    /// Reports an error. The migration usually stops shortly after.
    fn error(&self, message: &str);

    /// Reports fine-grained progress such as pipeline steps. Implementations
    /// may route this to `info` or drop it.
    fn progress(&self, message: &str) {
        self.info(message);
    }
}

/// Shared console handle.
pub type ConsoleRef = Arc<dyn Console>;

/// Console that forwards everything to `tracing` events.
#[derive(Clone, Debug, Default)]
pub struct LogConsole;

impl Console for LogConsole {
    fn info(&self, message: &str) {
        tracing::info!(target: "skiff::console", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "skiff::console", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "skiff::console", "{message}");
    }

    fn progress(&self, message: &str) {
        tracing::debug!(target: "skiff::console", "{message}");
    }
}

impl LogConsole {
    /// Returns a shared handle to a logging console.
    pub fn shared() -> ConsoleRef {
        Arc::new(Self)
    }
}
