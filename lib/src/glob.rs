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

//! Include/exclude path matching for origin and destination file sets.

use std::fmt;
use std::path::Path;

use globset::GlobBuilder;
use globset::GlobSet;
use globset::GlobSetBuilder;
use thiserror::Error;

use crate::file_util;

/// Error compiling a glob pattern.
#[derive(Debug, Error)]
#[error("Invalid glob pattern '{pattern}'")]
pub struct GlobError {
    /// The offending pattern.
    pub pattern: String,
    /// Compilation error from the matcher.
    #[source]
    pub source: globset::Error,
}

/// A set of files described by include and exclude patterns, anchored at
/// the root of a checkout.
///
/// `*` matches within one path segment, `**` crosses segments. A path
/// matches when any include pattern matches and no exclude pattern does.
/// An empty include list matches nothing.
#[derive(Clone, Debug)]
pub struct Glob {
    include: Vec<String>,
    exclude: Vec<String>,
    include_set: GlobSet,
    exclude_set: GlobSet,
}

fn build_set(patterns: &[String]) -> Result<GlobSet, GlobError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| GlobError {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| GlobError {
        pattern: patterns.join(", "),
        source,
    })
}

impl Glob {
    /// Compiles a glob from include and exclude pattern lists.
    pub fn new(
        include: impl IntoIterator<Item = impl Into<String>>,
        exclude: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, GlobError> {
        let include: Vec<String> = include.into_iter().map(Into::into).collect();
        let exclude: Vec<String> = exclude.into_iter().map(Into::into).collect();
        let include_set = build_set(&include)?;
        let exclude_set = build_set(&exclude)?;
        Ok(Self {
            include,
            exclude,
            include_set,
            exclude_set,
        })
    }

    /// A glob matching every file.
    pub fn everything() -> Self {
        Self::new(["**"], [] as [&str; 0]).expect("'**' should always compile")
    }

    /// The include patterns.
    pub fn include(&self) -> &[String] {
        &self.include
    }

    /// The exclude patterns.
    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Whether the slash-separated root-relative `path` is in the set.
    pub fn matches(&self, path: &str) -> bool {
        self.include_set.is_match(path) && !self.exclude_set.is_match(path)
    }

    /// Like [`Glob::matches`], for a relative [`Path`]. Paths that are not
    /// valid UTF-8 never match.
    pub fn matches_path(&self, path: &Path) -> bool {
        file_util::to_slash_string(path).is_some_and(|s| self.matches(&s))
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.include == other.include && self.exclude == other.exclude
    }
}

impl Eq for Glob {}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quote = |patterns: &[String]| {
            let quoted: Vec<String> = patterns.iter().map(|p| format!("\"{p}\"")).collect();
            format!("[{}]", quoted.join(", "))
        };
        write!(f, "glob(include = {}", quote(&self.include))?;
        if !self.exclude.is_empty() {
            write!(f, ", exclude = {}", quote(&self.exclude))?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("src/lib.rs", true; "direct include")]
    #[test_case("src/deep/nested/mod.rs", true; "recursive include")]
    #[test_case("src/deep/nested/gen.pb.rs", false; "excluded anywhere")]
    #[test_case("docs/readme.md", false; "not included")]
    fn test_include_exclude(path: &str, expected: bool) {
        let glob = Glob::new(["src/**"], ["**/*.pb.rs"]).unwrap();
        assert_eq!(glob.matches(path), expected);
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let glob = Glob::new(["src/*.rs"], [] as [&str; 0]).unwrap();
        assert!(glob.matches("src/lib.rs"));
        assert!(!glob.matches("src/sub/lib.rs"));
    }

    #[test]
    fn test_empty_include_matches_nothing() {
        let glob = Glob::new([] as [&str; 0], [] as [&str; 0]).unwrap();
        assert!(!glob.matches("anything"));
        assert!(!glob.matches(""));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let glob = Glob::new(["**"], ["secret/**"]).unwrap();
        assert!(glob.matches("public/file"));
        assert!(!glob.matches("secret/file"));
    }

    #[test]
    fn test_everything() {
        let glob = Glob::everything();
        assert!(glob.matches("a"));
        assert!(glob.matches("a/b/c"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = Glob::new(["a{"], [] as [&str; 0]).unwrap_err();
        assert_eq!(err.pattern, "a{");
    }

    #[test]
    fn test_display() {
        let glob = Glob::new(["src/**"], ["**/target/**"]).unwrap();
        assert_eq!(
            glob.to_string(),
            "glob(include = [\"src/**\"], exclude = [\"**/target/**\"])"
        );
    }

    #[test]
    fn test_matches_path() {
        let glob = Glob::new(["src/**"], [] as [&str; 0]).unwrap();
        assert!(glob.matches_path(Path::new("src/lib.rs")));
        assert!(!glob.matches_path(Path::new("other/lib.rs")));
    }
}
