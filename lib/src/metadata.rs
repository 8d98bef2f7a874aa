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

//! Commit metadata and the `Name: value` label model.
//!
//! Labels are simple key-value pairs embedded in commit messages, of the
//! form `Name: value` (a `=` separator is also accepted); an example is the
//! following:
//!
//! ```text
//! Add frobnicator support
//!
//! Frobnicates the baz when the qux is enabled.
//!
//! GitOrigin-RevId: 1234567890abcdef1234567890abcdef12345678
//! Reviewed-by: Charlie <charlie@example.com>
//! ```
//!
//! Skiff uses labels both to record provenance in destination messages and
//! as the variable namespace of message templates.

use std::str::FromStr as _;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::authoring::Author;
use crate::revision::LabelMap;

static LABEL_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_-]+) *[:=] *(.*)$").expect("label regex should be valid")
});

static TEMPLATE_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_-]+)\}").expect("template regex should be valid"));

/// A `Name: value` pair found in a commit message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Label value, trimmed.
    pub value: String,
}

/// Extracts all label lines from a commit message, in order of appearance.
pub fn parse_message_labels(message: &str) -> Vec<Label> {
    message
        .lines()
        .filter_map(|line| {
            let groups = LABEL_LINE_RE.captures(line)?;
            Some(Label {
                name: groups[1].to_owned(),
                value: groups[2].trim_end().to_owned(),
            })
        })
        .collect()
}

/// Appends a label line to a message, inserting a separating blank line
/// when the message does not already end with a label paragraph.
pub fn append_label(message: &str, name: &str, value: &str) -> String {
    let mut result = message.trim_end().to_owned();
    if result.is_empty() {
        return format!("{name}: {value}\n");
    }
    let last_line_is_label = result
        .lines()
        .next_back()
        .is_some_and(|line| LABEL_LINE_RE.is_match(line));
    if last_line_is_label {
        result.push('\n');
    } else {
        result.push_str("\n\n");
    }
    result.push_str(&format!("{name}: {value}\n"));
    result
}

/// Error expanding a `${LABEL}` message template.
#[derive(Debug, Error)]
#[error("Cannot find label '{label}' referenced by the message template")]
pub struct LabelNotFoundError {
    /// The unresolvable label name.
    pub label: String,
}

/// Expands `${LABEL}` placeholders in `template`, resolving each name
/// through `lookup`. Unknown names are an error.
pub fn expand_template(
    template: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Result<String, LabelNotFoundError> {
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;
    for groups in TEMPLATE_VAR_RE.captures_iter(template) {
        let whole = groups.get(0).unwrap();
        let name = &groups[1];
        let value = lookup(name).ok_or_else(|| LabelNotFoundError {
            label: name.to_owned(),
        })?;
        result.push_str(&template[last_end..whole.start()]);
        result.push_str(&value);
        last_end = whole.end();
    }
    result.push_str(&template[last_end..]);
    Ok(result)
}

/// The mutable commit metadata of a change being synthesized for the
/// destination.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    message: String,
    author: Author,
    hidden_labels: LabelMap,
}

impl Metadata {
    /// Creates metadata with the given message and author.
    pub fn new(message: impl Into<String>, author: Author) -> Self {
        Self {
            message: message.into(),
            author,
            hidden_labels: LabelMap::new(),
        }
    }

    /// The destination commit message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Replaces the destination commit message.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// The destination author.
    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Replaces the destination author.
    pub fn set_author(&mut self, author: Author) {
        self.author = author;
    }

    /// Labels tracked alongside the change without being rendered into the
    /// message. Destinations may persist them out of band.
    pub fn hidden_labels(&self) -> &LabelMap {
        &self.hidden_labels
    }

    /// Records a hidden label value.
    pub fn add_hidden_label(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.hidden_labels
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    /// Finds one label value: hidden labels win over message labels; the
    /// last occurrence of a message label wins.
    pub fn find_label_value(&self, name: &str) -> Option<String> {
        if let Some(values) = self.hidden_labels.get(name) {
            return values.last().cloned();
        }
        parse_message_labels(&self.message)
            .into_iter()
            .rev()
            .find(|label| label.name == name)
            .map(|label| label.value)
    }

    /// Special-cases the author pseudo-labels used by message templates.
    pub(crate) fn builtin_label_value(&self, name: &str) -> Option<String> {
        match name {
            "AUTHOR" => Some(self.author.to_string()),
            "AUTHOR_EMAIL" => Some(self.author.email.clone()),
            _ => None,
        }
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new(
            "",
            Author::from_str("Skiff <noreply@skiff.invalid>")
                .expect("default author literal should parse"),
        )
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_message_labels() {
        let message = indoc! {"
            Add frobnicator support

            Some body text with a stray colon: not a label.

            GitOrigin-RevId: abcdef
            Reviewed-by: Charlie <charlie@example.com>
            LEGACY_REVIEW_ID=cl/1234
        "};
        let labels = parse_message_labels(message);
        assert_eq!(
            labels,
            vec![
                Label {
                    name: "GitOrigin-RevId".to_owned(),
                    value: "abcdef".to_owned(),
                },
                Label {
                    name: "Reviewed-by".to_owned(),
                    value: "Charlie <charlie@example.com>".to_owned(),
                },
                Label {
                    name: "LEGACY_REVIEW_ID".to_owned(),
                    value: "cl/1234".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn test_append_label_separates_paragraph() {
        let appended = append_label("summary\n\nbody\n", "Rev-Id", "abc");
        assert_eq!(appended, "summary\n\nbody\n\nRev-Id: abc\n");
        // A second label joins the existing label paragraph.
        let appended = append_label(&appended, "Other", "x");
        assert_eq!(appended, "summary\n\nbody\n\nRev-Id: abc\nOther: x\n");
    }

    #[test]
    fn test_append_label_to_empty_message() {
        assert_eq!(append_label("", "Rev-Id", "abc"), "Rev-Id: abc\n");
    }

    #[test]
    fn test_expand_template() {
        let expanded = expand_template("Import of ${REV}\n\nBy ${AUTHOR}.", |name| match name {
            "REV" => Some("abc".to_owned()),
            "AUTHOR" => Some("Grace <g@example.com>".to_owned()),
            _ => None,
        })
        .unwrap();
        assert_eq!(expanded, "Import of abc\n\nBy Grace <g@example.com>.");
    }

    #[test]
    fn test_expand_template_unknown_label() {
        let err = expand_template("${MISSING}", |_| None).unwrap_err();
        assert_eq!(err.label, "MISSING");
    }

    #[test]
    fn test_metadata_label_lookup_precedence() {
        let mut metadata = Metadata::new(
            "summary\n\nKey: from-message\nKey: later\n",
            Author::new("A", "a@example.com"),
        );
        assert_eq!(metadata.find_label_value("Key").unwrap(), "later");
        metadata.add_hidden_label("Key", "hidden");
        assert_eq!(metadata.find_label_value("Key").unwrap(), "hidden");
        assert_eq!(metadata.find_label_value("Absent"), None);
    }
}
