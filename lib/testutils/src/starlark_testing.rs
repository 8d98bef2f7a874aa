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

#![expect(missing_docs)]

//! The `testing` Starlark namespace.
//!
//! Tests construct endpoints in Rust, install them for the current thread,
//! and reference them from config files as `testing.origin()` and
//! `testing.destination()`. Loading runs on the test's thread, so a
//! thread-local hand-off is enough.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use skiff_lib::builtins::StarlarkDestination;
use skiff_lib::builtins::StarlarkOrigin;
use skiff_lib::builtins::StarlarkTransformation;
use skiff_lib::destination::Destination;
use skiff_lib::modules::ModuleDef;
use skiff_lib::origin::Origin;
use skiff_lib::transform::Transformation;
use starlark::environment::GlobalsBuilder;
use starlark::starlark_module;

use crate::transformations::PrefixMessage;
use crate::transformations::WriteFile;

thread_local! {
    static ENDPOINTS: RefCell<Option<(Arc<dyn Origin>, Arc<dyn Destination>)>> =
        const { RefCell::new(None) };
    static TRANSFORMATIONS: RefCell<HashMap<String, Arc<dyn Transformation>>> =
        RefCell::new(HashMap::new());
}

/// Installs the endpoints `testing.origin()` / `testing.destination()`
/// return on this thread.
pub fn set_testing_endpoints(origin: Arc<dyn Origin>, destination: Arc<dyn Destination>) {
    ENDPOINTS.with(|cell| *cell.borrow_mut() = Some((origin, destination)));
}

/// Makes a Rust-constructed transformation available to config files as
/// `testing.transformation("<name>")`.
pub fn register_testing_transformation(name: &str, transformation: Arc<dyn Transformation>) {
    TRANSFORMATIONS.with(|cell| {
        cell.borrow_mut().insert(name.to_owned(), transformation);
    });
}

fn endpoints() -> anyhow::Result<(Arc<dyn Origin>, Arc<dyn Destination>)> {
    ENDPOINTS.with(|cell| {
        cell.borrow().clone().ok_or_else(|| {
            anyhow::anyhow!("no testing endpoints installed; call set_testing_endpoints first")
        })
    })
}

#[starlark_module]
fn testing_module(builder: &mut GlobalsBuilder) {
    /// The origin installed by the test.
    fn origin() -> anyhow::Result<StarlarkOrigin> {
        Ok(StarlarkOrigin(endpoints()?.0))
    }

    /// The destination installed by the test.
    fn destination() -> anyhow::Result<StarlarkDestination> {
        Ok(StarlarkDestination(endpoints()?.1))
    }

    /// A reversible transformation prefixing the commit message.
    fn prefix_message(prefix: String) -> anyhow::Result<StarlarkTransformation> {
        Ok(StarlarkTransformation(Arc::new(PrefixMessage::new(prefix))))
    }

    /// An irreversible transformation writing one file.
    fn write_file(path: String, content: String) -> anyhow::Result<StarlarkTransformation> {
        Ok(StarlarkTransformation(Arc::new(WriteFile::new(
            path, content,
        ))))
    }

    /// A transformation previously registered from Rust.
    fn transformation(name: String) -> anyhow::Result<StarlarkTransformation> {
        TRANSFORMATIONS.with(|cell| {
            cell.borrow().get(&name).cloned().map(StarlarkTransformation).ok_or_else(|| {
                anyhow::anyhow!("no testing transformation registered under '{name}'")
            })
        })
    }
}

/// The `testing` namespace as a loader module.
pub fn testing_module_def() -> ModuleDef {
    ModuleDef {
        name: "testing",
        capabilities: &[],
        register: testing_module,
    }
}
