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

//! Post-load validation of a configuration.

use std::fmt;

use crate::loader::Config;

/// Severity of a validation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationLevel {
    /// Worth looking at; does not block the run.
    Warning,
    /// Blocks the run.
    Error,
}

/// One finding of the post-load validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationMessage {
    /// Severity.
    pub level: ValidationLevel,
    /// Human-readable description.
    pub text: String,
}

impl ValidationMessage {
    /// Creates an error-level message.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Error,
            text: text.into(),
        }
    }

    /// Creates a warning-level message.
    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Warning,
            text: text.into(),
        }
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            ValidationLevel::Warning => "warning",
            ValidationLevel::Error => "error",
        };
        write!(f, "{level}: {}", self.text)
    }
}

/// Validates a loaded configuration.
///
/// `requested` are the migration names the user intends to run; each must
/// exist. The returned list is ordered: config-level findings first, then
/// per-migration findings in registration order.
pub fn validate_config(config: &Config, requested: &[&str]) -> Vec<ValidationMessage> {
    let mut messages = vec![];
    let migrations = config.migrations();
    if migrations.is_empty() {
        messages.push(ValidationMessage::error(format!(
            "Config '{}' does not define any migration",
            config.root_path()
        )));
    }
    for name in requested {
        if let Err(err) = migrations.get(name) {
            messages.push(ValidationMessage::error(err.to_string()));
        }
    }
    for (_, migration) in migrations.iter() {
        messages.extend(migration.validate());
    }
    messages
}

/// Whether any message is error-level.
pub fn has_errors(messages: &[ValidationMessage]) -> bool {
    messages
        .iter()
        .any(|message| message.level == ValidationLevel::Error)
}
