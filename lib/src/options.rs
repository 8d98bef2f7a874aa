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

//! Option bundle threaded through loading and migration runs.
//!
//! The bundle is assembled by the embedder (typically from CLI flags) before
//! the loader is constructed and is never mutated afterwards. Code that
//! needs options keeps an `Arc<Options>`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Cooperative cancellation flag observed by the workflow runner between
/// iterations and after each transformation.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    flag: Arc<AtomicBool>,
}

impl CancellationSignal {
    /// Requests cancellation. Safe to call from any thread.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Options that apply to every migration kind.
#[derive(Clone, Debug, Default)]
pub struct GeneralOptions {
    /// Root directory against which absolute (`//`) config labels resolve.
    pub config_root: Option<PathBuf>,
    /// Root directory for scratch workdirs. A temporary directory is used
    /// when unset.
    pub output_root: Option<PathBuf>,
    /// Prepare everything but instruct destinations not to publish.
    pub dry_run: bool,
    /// Migrate even when the planner considers the run a no-op.
    pub force: bool,
    /// Cancellation flag shared with the embedder.
    pub cancellation: CancellationSignal,
}

/// Options specific to workflow migrations.
#[derive(Clone, Debug)]
pub struct WorkflowOptions {
    /// Overrides the baseline recorded in the destination. Mostly useful for
    /// the first import of a repository.
    pub last_revision: Option<String>,
    /// Worker count for the ITERATIVE prepare phase. `1` keeps everything
    /// on the calling thread.
    pub threads: usize,
    /// Upper bound on the `migrated` change history exposed to
    /// transformations.
    pub migrated_history_limit: usize,
    /// How many times a transient repository error is retried before the
    /// run fails.
    pub repo_retries: usize,
    /// Base delay for exponential backoff between retries.
    pub retry_base_delay: Duration,
    /// Baseline for CHANGE_REQUEST runs.
    pub change_request_baseline: Option<String>,
    /// Allows CHANGE_REQUEST runs to publish instead of defaulting to a
    /// dry run.
    pub confirm_change_request: bool,
    /// Fail instead of reporting a NOOP effect when a change becomes empty
    /// after transformation.
    pub fail_on_empty_change: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            last_revision: None,
            threads: 1,
            migrated_history_limit: 20,
            repo_retries: 3,
            retry_base_delay: Duration::from_millis(250),
            change_request_baseline: None,
            confirm_change_request: false,
            fail_on_empty_change: false,
        }
    }
}

/// The full option bundle.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Options shared by all migrations.
    pub general: GeneralOptions,
    /// Workflow-runner options.
    pub workflow: WorkflowOptions,
}

impl Options {
    /// Wraps the bundle for sharing.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
