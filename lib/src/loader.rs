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

//! The configuration loader.
//!
//! Evaluates the root Starlark file plus everything it `load`s, producing
//! an immutable [`Config`]. Each file is evaluated at most once; cycles are
//! detected against the stack of in-progress files.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use blake2::Blake2b512;
use digest::Digest as _;
use indexmap::IndexMap;
use starlark::environment::FrozenModule;
use starlark::environment::Globals;
use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::eval::FileLoader;
use starlark::syntax::AstModule;
use starlark::syntax::Dialect;
use thiserror::Error;

use crate::config_file::CapturingConfigFile;
use crate::config_file::ConfigFile;
use crate::config_file::LabelError;
use crate::console::ConsoleRef;
use crate::file_util::IoResultExt as _;
use crate::file_util::PathError;
use crate::migration::Migration;
use crate::migration::MigrationRegistry;
use crate::migration::UnknownMigrationError;
use crate::modules::EvalContext;
use crate::modules::LoadedFilesSupplier;
use crate::modules::ModuleDef;
use crate::modules::ModuleSet;
use crate::options::Options;

/// Conventional extension of loadable config files.
pub const CONFIG_EXTENSION: &str = ".bara.sky";

fn render_cycle(stack: &[String]) -> String {
    let mut lines = vec![];
    for (index, path) in stack.iter().enumerate() {
        if index == stack.len() - 1 {
            lines.push(format!("  {path} (re-entry)"));
        } else {
            lines.push(format!("  {path}"));
        }
    }
    lines.join("\n")
}

/// Error loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Syntactic or semantic error in a config file.
    #[error("Error loading config file '{path}': {message}")]
    Invalid {
        /// Display path of the offending file.
        path: String,
        /// Interpreter rendering, including source location.
        message: String,
    },
    /// The load graph has a cycle.
    #[error("Cycle detected in config load graph:\n{}", render_cycle(.stack))]
    Cycle {
        /// The pending stack, ending with the re-entered file.
        stack: Vec<String>,
    },
    /// A config file is not valid UTF-8.
    #[error("Config file '{path}' is not valid UTF-8")]
    Encoding {
        /// Display path of the offending file.
        path: String,
    },
    /// Label resolution failed.
    #[error(transparent)]
    Label(#[from] LabelError),
    /// Filesystem failure locating the root file.
    #[error(transparent)]
    Path(#[from] PathError),
}

/// An immutable loaded configuration.
#[derive(Debug)]
pub struct Config {
    name: String,
    root_path: String,
    migrations: MigrationRegistry,
    loaded_files: IndexMap<String, Vec<u8>>,
    globals_snapshot: IndexMap<String, String>,
}

impl Config {
    /// Project name: `core.project(name = ...)`, else the root file path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display path of the root config file.
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// The migrations registered by the load.
    pub fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    /// Looks up one migration by name.
    pub fn migration(&self, name: &str) -> Result<&Arc<dyn Migration>, UnknownMigrationError> {
        self.migrations.get(name)
    }

    /// The transitive file closure of the load: display path to content,
    /// in load order, root first.
    pub fn loaded_files(&self) -> &IndexMap<String, Vec<u8>> {
        &self.loaded_files
    }

    /// Final top-level bindings of the root file, name to repr.
    pub fn globals_snapshot(&self) -> &IndexMap<String, String> {
        &self.globals_snapshot
    }

    /// Content hash over the transitive file closure.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Blake2b512::new();
        for (path, content) in &self.loaded_files {
            hasher.update(path.as_bytes());
            hasher.update([0]);
            hasher.update(content);
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }
}

impl PartialEq for Config {
    /// Equality by observable configuration: migration set (names, modes,
    /// endpoint descriptions) and the file closure.
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name
            || self.root_path != other.root_path
            || self.loaded_files != other.loaded_files
            || self.migrations.len() != other.migrations.len()
        {
            return false;
        }
        self.migrations.iter().zip(other.migrations.iter()).all(
            |((name_a, a), (name_b, b))| {
                name_a == name_b
                    && a.mode_name() == b.mode_name()
                    && a.origin_description() == b.origin_description()
                    && a.destination_description() == b.destination_description()
            },
        )
    }
}

/// Loads configurations. One loader may load many configs; every load owns
/// its own pending/loaded state and registry.
pub struct Loader {
    options: Arc<Options>,
    console: ConsoleRef,
    modules: ModuleSet,
}

impl Loader {
    /// Creates a loader with the standard module set.
    pub fn new(options: Arc<Options>, console: ConsoleRef) -> Self {
        Self {
            options,
            console,
            modules: ModuleSet::standard(),
        }
    }

    /// Creates a loader with extra modules on top of the standard set
    /// (e.g. backend or testing modules).
    pub fn with_modules(
        options: Arc<Options>,
        console: ConsoleRef,
        extra: impl IntoIterator<Item = ModuleDef>,
    ) -> Self {
        let mut modules = ModuleSet::standard();
        for def in extra {
            modules.add(def);
        }
        Self {
            options,
            console,
            modules,
        }
    }

    /// The installed module set.
    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    /// Loads the config rooted at a file on disk. Absolute labels resolve
    /// against `Options::general::config_root` when set.
    pub fn load_from_path(&self, path: &Path) -> Result<Config, ConfigError> {
        let path = dunce::canonicalize(path).context(path)?;
        let root = match &self.options.general.config_root {
            Some(root) => {
                let root = dunce::canonicalize(root).context(root)?;
                ConfigFile::on_disk_with_root(path, root)
            }
            None => ConfigFile::on_disk(path),
        };
        self.load(&root)
    }

    /// Loads the config rooted at `root`.
    pub fn load(&self, root: &ConfigFile) -> Result<Config, ConfigError> {
        let session = LoadSession {
            loader: self,
            globals: self.modules.build_globals(),
            main_file: root.clone(),
            pending: RefCell::new(vec![]),
            loaded: RefCell::new(HashMap::new()),
            migrations: Rc::new(RefCell::new(MigrationRegistry::new())),
            project_name: Rc::new(RefCell::new(None)),
            supplier: LoadedFilesSupplier::default(),
        };

        let root_capture = CapturingConfigFile::new(root.clone());
        let root_module = session.load_file(&root_capture)?;

        let files = root_capture.all_loaded_files();
        let mut loaded_files = IndexMap::new();
        for (path, file) in &files {
            loaded_files.insert(path.clone(), file.read_content()?);
        }
        session.supplier.fill(files);

        let mut globals_snapshot = IndexMap::new();
        for name in root_module.names() {
            let name = name.as_str();
            if name.starts_with('_') {
                continue;
            }
            if let Ok(value) = root_module.get(name) {
                globals_snapshot.insert(name.to_owned(), value.value().to_repr());
            }
        }

        let migrations = std::mem::take(&mut *session.migrations.borrow_mut());
        let name = session
            .project_name
            .borrow()
            .clone()
            .unwrap_or_else(|| root.path());
        tracing::debug!(
            config = %name,
            migrations = migrations.len(),
            files = loaded_files.len(),
            "config loaded"
        );
        Ok(Config {
            name,
            root_path: root.path(),
            migrations,
            loaded_files,
            globals_snapshot,
        })
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("modules", &self.modules)
            .finish_non_exhaustive()
    }
}

/// State of one `load()` call tree.
struct LoadSession<'a> {
    loader: &'a Loader,
    globals: Globals,
    main_file: ConfigFile,
    pending: RefCell<Vec<String>>,
    loaded: RefCell<HashMap<String, FrozenModule>>,
    migrations: Rc<RefCell<MigrationRegistry>>,
    project_name: Rc<RefCell<Option<String>>>,
    supplier: LoadedFilesSupplier,
}

/// Resolves `load("...")` statements against the modules prepared by the
/// session before evaluation.
struct SessionFileLoader<'a> {
    modules: &'a HashMap<String, FrozenModule>,
}

impl FileLoader for SessionFileLoader<'_> {
    fn load(&self, path: &str) -> starlark::Result<FrozenModule> {
        match self.modules.get(path) {
            Some(module) => Ok(module.clone()),
            None => Err(anyhow::anyhow!("load of unprepared module '{path}'").into()),
        }
    }
}

fn with_config_extension(label: &str) -> String {
    if label.ends_with(CONFIG_EXTENSION) {
        label.to_owned()
    } else {
        format!("{label}{CONFIG_EXTENSION}")
    }
}

impl LoadSession<'_> {
    fn invalid(&self, path: &str, err: impl std::fmt::Display) -> ConfigError {
        let message = err.to_string();
        self.loader
            .console
            .error(&format!("Error in {path}: {message}"));
        ConfigError::Invalid {
            path: path.to_owned(),
            message,
        }
    }

    fn load_file(&self, file: &Rc<CapturingConfigFile>) -> Result<FrozenModule, ConfigError> {
        let key = file.path();
        if self.pending.borrow().contains(&key) {
            let mut stack = self.pending.borrow().clone();
            stack.push(key);
            return Err(ConfigError::Cycle { stack });
        }
        if let Some(cached) = self.loaded.borrow().get(&key) {
            return Ok(cached.clone());
        }
        self.pending.borrow_mut().push(key.clone());
        tracing::debug!(path = %key, "evaluating config file");

        let content_bytes = file.read_content()?;
        let content = String::from_utf8(content_bytes)
            .map_err(|_| ConfigError::Encoding { path: key.clone() })?;
        let ast = AstModule::parse(&key, content, &Dialect::Standard)
            .map_err(|err| self.invalid(&key, err))?;

        // Loaded files become extensions of the current one, so they are
        // evaluated (and captured) before the current file runs.
        let mut extensions = HashMap::new();
        for load in ast.loads() {
            let module_id = load.module_id.to_owned();
            let child = file.resolve(&with_config_extension(&module_id))?;
            let module = self.load_file(&child)?;
            extensions.insert(module_id, module);
        }

        let module = Module::new();
        {
            let ctx = EvalContext {
                main_file: self.main_file.clone(),
                current_file: file.file().clone(),
                options: self.loader.options.clone(),
                console: self.loader.console.clone(),
                migrations: self.migrations.clone(),
                project_name: self.project_name.clone(),
                loaded_files: self.supplier.clone(),
            };
            let file_loader = SessionFileLoader {
                modules: &extensions,
            };
            let mut eval = Evaluator::new(&module);
            eval.set_loader(&file_loader);
            eval.extra = Some(&ctx);
            eval.eval_module(ast, &self.globals)
                .map_err(|err| self.invalid(&key, err))?;
        }
        let frozen = module
            .freeze()
            .map_err(|err| self.invalid(&key, anyhow::Error::from(err)))?;

        self.pending.borrow_mut().pop();
        self.loaded.borrow_mut().insert(key, frozen.clone());
        Ok(frozen)
    }
}
