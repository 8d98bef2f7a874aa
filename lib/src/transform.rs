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

//! The transformation contract and pipeline composition.
//!
//! A transformation mutates the checked-out tree and/or the change
//! metadata. Concrete content transformations (regex replace, file moves,
//! formatters) live outside the core; the engine only defines how they
//! compose and reverse.

use std::sync::Arc;

use thiserror::Error;

use crate::file_util::PathError;
use crate::transform_work::TransformWork;

/// A transformation marked reversible failed to produce its inverse.
#[derive(Debug, Error)]
#[error("Transformation '{name}' is not reversible")]
pub struct NonReversibleError {
    /// `describe()` of the offending transformation.
    pub name: String,
}

/// Error running a transformation.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Reversal was required at run time but is not available.
    #[error(transparent)]
    NotReversible(#[from] NonReversibleError),
    /// Filesystem failure inside the workdir.
    #[error(transparent)]
    Path(#[from] PathError),
    /// A subprocess spawned by the transformation exceeded its deadline.
    #[error("External command '{command}' timed out after {timeout_secs}s")]
    ExternalCommandTimeout {
        /// The command line.
        command: String,
        /// The deadline that was exceeded.
        timeout_secs: u64,
    },
    /// A subprocess spawned by the transformation failed.
    #[error("External command '{command}' failed with exit code {code}")]
    ExternalCommandFailed {
        /// The command line.
        command: String,
        /// Exit code of the process.
        code: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// A user-defined content policy rejected the change.
    #[error("Content check rejected the change: {message}")]
    Checker {
        /// Rejection reason.
        message: String,
    },
    /// Any other transformation-specific failure.
    #[error("{message}")]
    Other {
        /// Failure description.
        message: String,
    },
}

/// A step of a migration pipeline.
pub trait Transformation: std::fmt::Debug + Send + Sync {
    /// Short human-readable description, used in progress output and
    /// diagnostics.
    fn describe(&self) -> String;

    /// Applies the transformation. Only the workdir under
    /// `work.checkout_dir()` and the metadata may be mutated.
    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError>;

    /// The inverse transformation. The default declares the transformation
    /// irreversible.
    fn reverse(&self) -> Result<Arc<dyn Transformation>, NonReversibleError> {
        Err(NonReversibleError {
            name: self.describe(),
        })
    }

    /// Used by [`Sequence`] to flatten nested sequences at construction.
    fn sequence_items(&self) -> Option<&[Arc<dyn Transformation>]> {
        None
    }
}

/// An ordered list of transformations run as one pipeline.
///
/// Nested sequences are flattened at construction; the user-level nesting
/// only survives in documentation output.
#[derive(Clone, Debug)]
pub struct Sequence {
    transformations: Vec<Arc<dyn Transformation>>,
}

impl Sequence {
    /// Creates a pipeline, flattening nested sequences.
    pub fn new(items: Vec<Arc<dyn Transformation>>) -> Self {
        let mut transformations = Vec::with_capacity(items.len());
        for item in items {
            match item.sequence_items() {
                Some(nested) => transformations.extend(nested.iter().cloned()),
                None => transformations.push(item),
            }
        }
        Self { transformations }
    }

    /// The empty pipeline.
    pub fn empty() -> Self {
        Self {
            transformations: vec![],
        }
    }

    /// The flattened steps.
    pub fn transformations(&self) -> &[Arc<dyn Transformation>] {
        &self.transformations
    }
}

impl Transformation for Sequence {
    fn describe(&self) -> String {
        "sequence".to_owned()
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        let total = self.transformations.len();
        for (index, transformation) in self.transformations.iter().enumerate() {
            let name = transformation.describe();
            work.console()
                .progress(&format!("[{}/{}] Transform {}", index + 1, total, name));
            tracing::debug!(step = index + 1, total, %name, "running transformation");
            transformation.transform(work)?;
        }
        Ok(())
    }

    fn reverse(&self) -> Result<Arc<dyn Transformation>, NonReversibleError> {
        let mut reversed = Vec::with_capacity(self.transformations.len());
        for transformation in self.transformations.iter().rev() {
            reversed.push(transformation.reverse()?);
        }
        Ok(Arc::new(Self {
            transformations: reversed,
        }))
    }

    fn sequence_items(&self) -> Option<&[Arc<dyn Transformation>]> {
        Some(&self.transformations)
    }
}

/// A transformation whose inverse is supplied explicitly instead of being
/// derived.
#[derive(Clone, Debug)]
pub struct ExplicitReversal {
    forward: Arc<dyn Transformation>,
    backward: Arc<dyn Transformation>,
}

impl ExplicitReversal {
    /// Pairs a forward transformation with its declared inverse.
    pub fn new(forward: Arc<dyn Transformation>, backward: Arc<dyn Transformation>) -> Self {
        Self { forward, backward }
    }
}

impl Transformation for ExplicitReversal {
    fn describe(&self) -> String {
        self.forward.describe()
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        self.forward.transform(work)
    }

    fn reverse(&self) -> Result<Arc<dyn Transformation>, NonReversibleError> {
        Ok(Arc::new(Self {
            forward: self.backward.clone(),
            backward: self.forward.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use super::*;
    use crate::authoring::Author;
    use crate::console::LogConsole;
    use crate::metadata::Metadata;
    use crate::revision::Changes;
    use crate::revision::Revision;

    fn new_work() -> TransformWork {
        TransformWork::new(
            PathBuf::from("/tmp/unused"),
            Metadata::new("", Author::new("A", "a@example.com")),
            Changes::default(),
            LogConsole::shared(),
            "test",
            Revision::new("rev1"),
        )
    }

    /// Appends its tag to the message so tests can observe execution order.
    #[derive(Debug)]
    struct Tag(&'static str, bool);

    impl Transformation for Tag {
        fn describe(&self) -> String {
            format!("tag {}", self.0)
        }

        fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
            let message = format!("{}{};", work.message(), self.0);
            work.set_message(message);
            Ok(())
        }

        fn reverse(&self) -> Result<Arc<dyn Transformation>, NonReversibleError> {
            if self.1 {
                Ok(Arc::new(Self(self.0, true)))
            } else {
                Err(NonReversibleError {
                    name: self.describe(),
                })
            }
        }
    }

    #[test]
    fn test_sequence_runs_in_order() {
        let sequence = Sequence::new(vec![Arc::new(Tag("a", true)), Arc::new(Tag("b", true))]);
        let mut work = new_work();
        sequence.transform(&mut work).unwrap();
        assert_eq!(work.message(), "a;b;");
    }

    #[test]
    fn test_nested_sequences_flatten() {
        let inner = Sequence::new(vec![Arc::new(Tag("b", true)), Arc::new(Tag("c", true))]);
        let outer = Sequence::new(vec![
            Arc::new(Tag("a", true)),
            Arc::new(inner),
            Arc::new(Tag("d", true)),
        ]);
        assert_eq!(outer.transformations().len(), 4);
        let mut work = new_work();
        outer.transform(&mut work).unwrap();
        assert_eq!(work.message(), "a;b;c;d;");
    }

    #[test]
    fn test_reverse_reverses_order() {
        let sequence = Sequence::new(vec![Arc::new(Tag("a", true)), Arc::new(Tag("b", true))]);
        let reversed = sequence.reverse().unwrap();
        let mut work = new_work();
        reversed.transform(&mut work).unwrap();
        assert_eq!(work.message(), "b;a;");
    }

    #[test]
    fn test_reverse_fails_on_irreversible_member() {
        let sequence = Sequence::new(vec![Arc::new(Tag("a", true)), Arc::new(Tag("b", false))]);
        let err = sequence.reverse().unwrap_err();
        assert_eq!(err.name, "tag b");
    }

    #[test]
    fn test_explicit_reversal_swaps() {
        let pair = ExplicitReversal::new(Arc::new(Tag("fwd", true)), Arc::new(Tag("bwd", true)));
        let mut work = new_work();
        pair.transform(&mut work).unwrap();
        assert_eq!(work.message(), "fwd;");

        let reversed = pair.reverse().unwrap();
        let mut work = new_work();
        reversed.transform(&mut work).unwrap();
        assert_eq!(work.message(), "bwd;");
        // Reversing twice gets the original behavior back.
        let twice = reversed.reverse().unwrap();
        let mut work = new_work();
        twice.transform(&mut work).unwrap();
        assert_eq!(work.message(), "fwd;");
    }

    #[test]
    fn test_default_reverse_is_irreversible() {
        #[derive(Debug)]
        struct Opaque;
        impl Transformation for Opaque {
            fn describe(&self) -> String {
                "opaque".to_owned()
            }
            fn transform(&self, _work: &mut TransformWork) -> Result<(), TransformError> {
                Ok(())
            }
        }
        assert_matches!(Opaque.reverse(), Err(NonReversibleError { .. }));
    }
}
