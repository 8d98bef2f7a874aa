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

//! Registry of Starlark-callable modules and the per-evaluation context.
//!
//! Modules are registered once per loader; the state that varies per file
//! (which config file is being evaluated) is threaded through an
//! [`EvalContext`] carried in `Evaluator::extra` instead of mutating module
//! instances between files.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::OnceLock;

use indexmap::IndexMap;
use starlark::any::ProvidesStaticType;
use starlark::environment::Globals;
use starlark::environment::GlobalsBuilder;
use starlark::eval::Evaluator;

use crate::builtins;
use crate::config_file::ConfigFile;
use crate::console::ConsoleRef;
use crate::migration::MigrationRegistry;
use crate::options::Options;

/// What a module needs from the loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleCapability {
    /// Reads the option bundle.
    OptionsAware,
    /// Observes which config file is active and may retain the
    /// loaded-files supplier.
    LabelsAware,
}

/// One Starlark-callable module provided by the host.
#[derive(Clone)]
pub struct ModuleDef {
    /// Namespace the module's functions live under. Empty for top-level
    /// functions.
    pub name: &'static str,
    /// Capabilities the module relies on.
    pub capabilities: &'static [ModuleCapability],
    /// Installs the module's functions into the global environment.
    pub register: fn(&mut GlobalsBuilder),
}

impl std::fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDef")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Insertion-ordered set of modules installed into one loader.
#[derive(Clone, Debug, Default)]
pub struct ModuleSet {
    modules: IndexMap<&'static str, ModuleDef>,
}

impl ModuleSet {
    /// The built-in modules every loader carries.
    pub fn standard() -> Self {
        let mut set = Self::default();
        set.add(ModuleDef {
            name: "",
            capabilities: &[],
            register: builtins::global_functions,
        });
        set.add(ModuleDef {
            name: "core",
            capabilities: &[
                ModuleCapability::OptionsAware,
                ModuleCapability::LabelsAware,
            ],
            register: builtins::core_module,
        });
        set.add(ModuleDef {
            name: "authoring",
            capabilities: &[],
            register: builtins::authoring_module,
        });
        set
    }

    /// Adds a module. A module with the same namespace replaces the
    /// earlier one.
    pub fn add(&mut self, def: ModuleDef) {
        self.modules.insert(def.name, def);
    }

    /// The registered modules, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleDef> {
        self.modules.values()
    }

    /// Builds the predeclared Starlark environment.
    pub fn build_globals(&self) -> Globals {
        let mut builder = GlobalsBuilder::standard();
        for def in self.modules.values() {
            if def.name.is_empty() {
                builder = builder.with(def.register);
            } else {
                builder = builder.with_namespace(def.name, def.register);
            }
        }
        builder.build()
    }
}

/// Post-load supplier of the transitive config file closure.
///
/// Labels-aware modules may retain this during load, but it only becomes
/// readable once loading has finished.
#[derive(Clone, Debug, Default)]
pub struct LoadedFilesSupplier {
    inner: Arc<OnceLock<IndexMap<String, ConfigFile>>>,
}

impl LoadedFilesSupplier {
    /// The resolved file closure, or `None` while loading is still in
    /// progress.
    pub fn get(&self) -> Option<&IndexMap<String, ConfigFile>> {
        self.inner.get()
    }

    pub(crate) fn fill(&self, files: IndexMap<String, ConfigFile>) {
        // A second load of the same session is a bug; keep the first map.
        let _ = self.inner.set(files);
    }
}

/// The context visible to module functions during the evaluation of one
/// config file.
#[derive(Clone, ProvidesStaticType)]
pub struct EvalContext {
    /// The root file of the load.
    pub main_file: ConfigFile,
    /// The file currently being evaluated.
    pub current_file: ConfigFile,
    /// The immutable option bundle.
    pub options: Arc<Options>,
    /// Console for user-visible diagnostics.
    pub console: ConsoleRef,
    /// Registry shared by every file of the load.
    pub migrations: Rc<RefCell<MigrationRegistry>>,
    /// Project name cell set by `core.project()`.
    pub project_name: Rc<RefCell<Option<String>>>,
    /// Supplier of the final transitive file map.
    pub loaded_files: LoadedFilesSupplier,
}

/// Extracts the [`EvalContext`] installed by the loader.
pub fn eval_context(eval: &Evaluator) -> anyhow::Result<EvalContext> {
    let extra = eval
        .extra
        .ok_or_else(|| anyhow::anyhow!("no evaluation context installed"))?;
    let ctx = extra
        .downcast_ref::<EvalContext>()
        .ok_or_else(|| anyhow::anyhow!("evaluation context has an unexpected type"))?;
    Ok(ctx.clone())
}
