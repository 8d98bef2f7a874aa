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

//! Authorship records and the policy deciding which author a destination
//! change is attributed to.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use thiserror::Error;

/// An author as recorded in a commit, `"Name <email>"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Author {
    /// Human-readable name.
    pub name: String,
    /// Email address. May be empty for tools that do not record one.
    pub email: String,
}

impl Author {
    /// Creates an author record.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Error parsing an `"Name <email>"` author string.
#[derive(Debug, Error)]
#[error("Invalid author '{input}'. Expected 'Name <email>'")]
pub struct InvalidAuthorError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for Author {
    type Err = InvalidAuthorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidAuthorError {
            input: s.to_owned(),
        };
        let rest = s.trim_end();
        let Some(rest) = rest.strip_suffix('>') else {
            return Err(invalid());
        };
        let Some((name, email)) = rest.rsplit_once('<') else {
            return Err(invalid());
        };
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() || email.contains('<') {
            return Err(invalid());
        }
        Ok(Self::new(name, email))
    }
}

/// How origin authorship maps to destination authorship.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthoringPolicy {
    /// Keep the origin author as-is.
    PassThru,
    /// Always use the configured default author.
    Overwrite,
    /// Keep origin authors whose email is on the allow-list; use the
    /// default for everyone else.
    Allowed {
        /// Allow-listed author emails.
        allowlist: IndexSet<String>,
    },
}

/// Authoring configuration of one migration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authoring {
    default: Author,
    policy: AuthoringPolicy,
}

impl Authoring {
    /// Creates the authoring configuration.
    pub fn new(default: Author, policy: AuthoringPolicy) -> Self {
        Self { default, policy }
    }

    /// The configured default author.
    pub fn default_author(&self) -> &Author {
        &self.default
    }

    /// The configured policy.
    pub fn policy(&self) -> &AuthoringPolicy {
        &self.policy
    }

    /// Resolves the destination author for a change authored by
    /// `origin_author` in the origin.
    pub fn resolve(&self, origin_author: &Author) -> Author {
        match &self.policy {
            AuthoringPolicy::PassThru => origin_author.clone(),
            AuthoringPolicy::Overwrite => self.default.clone(),
            AuthoringPolicy::Allowed { allowlist } => {
                if allowlist.contains(&origin_author.email) {
                    origin_author.clone()
                } else {
                    self.default.clone()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_author_parse_roundtrip() {
        let author: Author = "Grace Hopper <grace@example.com>".parse().unwrap();
        assert_eq!(author.name, "Grace Hopper");
        assert_eq!(author.email, "grace@example.com");
        assert_eq!(author.to_string(), "Grace Hopper <grace@example.com>");
    }

    #[test]
    fn test_author_parse_rejects_garbage() {
        assert_matches!(Author::from_str("no email"), Err(InvalidAuthorError { .. }));
        assert_matches!(Author::from_str("<only@email>"), Err(_));
        assert_matches!(Author::from_str("Nested <a<b@c>>"), Err(_));
    }

    #[test]
    fn test_pass_thru_keeps_origin_author() {
        let authoring = Authoring::new(
            Author::new("Default", "default@example.com"),
            AuthoringPolicy::PassThru,
        );
        let origin = Author::new("Origin", "origin@example.com");
        assert_eq!(authoring.resolve(&origin), origin);
    }

    #[test]
    fn test_overwrite_uses_default() {
        let default = Author::new("Default", "default@example.com");
        let authoring = Authoring::new(default.clone(), AuthoringPolicy::Overwrite);
        let origin = Author::new("Origin", "origin@example.com");
        assert_eq!(authoring.resolve(&origin), default);
    }

    #[test]
    fn test_allowlist_filters_authors() {
        let default = Author::new("Default", "default@example.com");
        let authoring = Authoring::new(
            default.clone(),
            AuthoringPolicy::Allowed {
                allowlist: ["listed@example.com".to_owned()].into_iter().collect(),
            },
        );
        let listed = Author::new("Listed", "listed@example.com");
        let unlisted = Author::new("Unlisted", "unlisted@example.com");
        assert_eq!(authoring.resolve(&listed), listed);
        assert_eq!(authoring.resolve(&unlisted), default);
    }
}
