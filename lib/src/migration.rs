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

//! Migrations and the per-load registry mapping names to them.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;

use crate::config_file::ConfigFile;
use crate::destination::DestinationEffect;
use crate::destination::WriteError;
use crate::error::RepoError;
use crate::file_util::PathError;
use crate::origin::ResolveError;
use crate::revision::LabelMap;
use crate::transform::TransformError;
use crate::validate::ValidationMessage;

static MIGRATION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-./]+$").expect("name regex should be valid"));

/// Error running a migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The requested origin reference does not resolve.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Backend failure that survived the retry policy.
    #[error(transparent)]
    Repo(#[from] RepoError),
    /// A transformation failed.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// The produced change has no delta against the destination baseline
    /// and the migration forbids that.
    #[error("{message}")]
    EmptyChange {
        /// Why the change is empty.
        message: String,
    },
    /// Filesystem failure in the scratch space.
    #[error(transparent)]
    Path(#[from] PathError),
    /// The embedder requested cancellation.
    #[error("Migration cancelled")]
    Cancelled,
    /// An ITERATIVE iteration failed partway through the planned range.
    #[error(
        "Migration of change '{change}' failed after {} changes were migrated successfully",
        .effects.len()
    )]
    Iteration {
        /// Origin revision id of the failed change.
        change: String,
        /// Effects of the iterations that completed before the failure.
        effects: Vec<DestinationEffect>,
        /// The underlying failure.
        #[source]
        source: Box<MigrationError>,
    },
    /// Invariant violation in the runner.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl From<WriteError> for MigrationError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::EmptyChange { message } => Self::EmptyChange { message },
            WriteError::Repo(err) => Self::Repo(err),
        }
    }
}

/// A named, fully-configured migration.
pub trait Migration: Debug + Send + Sync {
    /// Unique name within one loaded config.
    fn name(&self) -> &str;

    /// Human description for listings.
    fn description(&self) -> &str;

    /// The migration flavor, e.g. `workflow`.
    fn mode_name(&self) -> &'static str;

    /// The config file the migration was defined in.
    fn config_file(&self) -> &ConfigFile;

    /// Origin description multimap, for fingerprinting and audit.
    fn origin_description(&self) -> LabelMap;

    /// Destination description multimap, for fingerprinting and audit.
    fn destination_description(&self) -> LabelMap;

    /// Runs the migration. `source_refs` may be empty to use the
    /// configured default reference.
    fn run(&self, workdir: &Path, source_refs: &[String])
    -> Result<Vec<DestinationEffect>, MigrationError>;

    /// Migration-specific post-load checks.
    fn validate(&self) -> Vec<ValidationMessage> {
        vec![]
    }
}

/// Error registering a migration during config loading.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The name contains characters outside `[A-Za-z0-9_./-]`.
    #[error("Invalid migration name '{name}'. Names are restricted to [A-Za-z0-9_./-]")]
    InvalidName {
        /// The rejected name.
        name: String,
    },
    /// A migration with the same name already exists in this load.
    #[error("A migration named '{name}' is already defined{hint}")]
    Duplicate {
        /// The duplicated name.
        name: String,
        /// Extra advice appended to the message.
        hint: String,
    },
}

/// Error looking up a migration by name.
#[derive(Debug, Error)]
#[error(
    "Unknown migration '{name}'. Available migrations: {}{}",
    .available.join(", "),
    .suggestion.as_ref().map(|s| format!(". Did you mean '{s}'?")).unwrap_or_default()
)]
pub struct UnknownMigrationError {
    /// The requested name.
    pub name: String,
    /// All registered names, in registration order.
    pub available: Vec<String>,
    /// Closest registered name, when one is close enough.
    pub suggestion: Option<String>,
}

/// The migrations registered by one config load, in registration order.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: IndexMap<String, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a migration. Fails on invalid or duplicate names.
    pub fn register(&mut self, migration: Arc<dyn Migration>) -> Result<(), RegistrationError> {
        let name = migration.name().to_owned();
        if !MIGRATION_NAME_RE.is_match(&name) {
            return Err(RegistrationError::InvalidName { name });
        }
        if self.migrations.contains_key(&name) {
            let hint = if name == "default" {
                ". Pass a distinct name = parameter to each workflow".to_owned()
            } else {
                String::new()
            };
            return Err(RegistrationError::Duplicate { name, hint });
        }
        self.migrations.insert(name, migration);
        Ok(())
    }

    /// Looks a migration up by name.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Migration>, UnknownMigrationError> {
        self.migrations.get(name).ok_or_else(|| {
            let available: Vec<String> = self.migrations.keys().cloned().collect();
            let suggestion = available
                .iter()
                .map(|candidate| (candidate, strsim::jaro_winkler(name, candidate)))
                .filter(|&(_, score)| score > 0.8)
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(candidate, _)| candidate.clone());
            UnknownMigrationError {
                name: name.to_owned(),
                available,
                suggestion,
            }
        })
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.migrations.keys().map(String::as_str)
    }

    /// Registered migrations, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Migration>)> {
        self.migrations
            .iter()
            .map(|(name, migration)| (name.as_str(), migration))
    }

    /// Number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[derive(Debug)]
    struct FakeMigration {
        name: String,
        config_file: ConfigFile,
    }

    impl FakeMigration {
        fn new(name: &str) -> Arc<Self> {
            let files = std::sync::Arc::new(
                [("copy.bara.sky".to_owned(), b"".to_vec())]
                    .into_iter()
                    .collect(),
            );
            Arc::new(Self {
                name: name.to_owned(),
                config_file: ConfigFile::in_memory(files, "copy.bara.sky").unwrap(),
            })
        }
    }

    impl Migration for FakeMigration {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn mode_name(&self) -> &'static str {
            "fake"
        }
        fn config_file(&self) -> &ConfigFile {
            &self.config_file
        }
        fn origin_description(&self) -> LabelMap {
            LabelMap::new()
        }
        fn destination_description(&self) -> LabelMap {
            LabelMap::new()
        }
        fn run(
            &self,
            _workdir: &Path,
            _source_refs: &[String],
        ) -> Result<Vec<DestinationEffect>, MigrationError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = MigrationRegistry::new();
        registry.register(FakeMigration::new("default")).unwrap();
        registry
            .register(FakeMigration::new("import/sub-project.v2"))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("default").unwrap().name(), "default");
        // Slash-separated names are accepted.
        assert_eq!(
            registry.get("import/sub-project.v2").unwrap().name(),
            "import/sub-project.v2"
        );
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let mut registry = MigrationRegistry::new();
        assert_matches!(
            registry.register(FakeMigration::new("has space")),
            Err(RegistrationError::InvalidName { .. })
        );
        assert_matches!(
            registry.register(FakeMigration::new("")),
            Err(RegistrationError::InvalidName { .. })
        );
    }

    #[test]
    fn test_duplicate_default_name_hints_at_name_parameter() {
        let mut registry = MigrationRegistry::new();
        registry.register(FakeMigration::new("default")).unwrap();
        let err = registry
            .register(FakeMigration::new("default"))
            .unwrap_err();
        assert!(err.to_string().contains("name ="), "got: {err}");
    }

    #[test]
    fn test_unknown_migration_suggests_closest() {
        let mut registry = MigrationRegistry::new();
        registry.register(FakeMigration::new("import-prod")).unwrap();
        registry.register(FakeMigration::new("export")).unwrap();
        let err = registry.get("import-prd").unwrap_err();
        assert_eq!(err.available, ["import-prod", "export"]);
        assert_eq!(err.suggestion.as_deref(), Some("import-prod"));
        assert!(err.to_string().contains("Did you mean 'import-prod'?"));
    }
}
