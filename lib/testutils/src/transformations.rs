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

//! Small concrete transformations used to exercise the engine.

use std::fs;
use std::sync::Arc;
use std::sync::Mutex;

use skiff_lib::file_util::IoResultExt as _;
use skiff_lib::transform::NonReversibleError;
use skiff_lib::transform::TransformError;
use skiff_lib::transform::Transformation;
use skiff_lib::transform_work::TransformWork;

/// Prepends a prefix to the commit message. Reversible by stripping the
/// prefix again.
#[derive(Clone, Debug)]
pub struct PrefixMessage {
    prefix: String,
    strip: bool,
}

impl PrefixMessage {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            strip: false,
        }
    }
}

impl Transformation for PrefixMessage {
    fn describe(&self) -> String {
        if self.strip {
            format!("strip message prefix '{}'", self.prefix)
        } else {
            format!("prefix message with '{}'", self.prefix)
        }
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        if self.strip {
            let stripped = work
                .message()
                .strip_prefix(&self.prefix)
                .ok_or_else(|| TransformError::Other {
                    message: format!("message does not start with '{}'", self.prefix),
                })?
                .to_owned();
            work.set_message(stripped);
        } else {
            let message = format!("{}{}", self.prefix, work.message());
            work.set_message(message);
        }
        Ok(())
    }

    fn reverse(&self) -> Result<Arc<dyn Transformation>, NonReversibleError> {
        Ok(Arc::new(Self {
            prefix: self.prefix.clone(),
            strip: !self.strip,
        }))
    }
}

/// Writes a file into the checkout. Irreversible.
#[derive(Clone, Debug)]
pub struct WriteFile {
    path: String,
    content: String,
}

impl WriteFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

impl Transformation for WriteFile {
    fn describe(&self) -> String {
        format!("write file '{}'", self.path)
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        let target = work.checkout_dir().join(&self.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).context(parent)?;
        }
        fs::write(&target, self.content.as_bytes()).context(&target)?;
        Ok(())
    }
}

/// Records every invocation into a shared log. Reversible; the reversed
/// instance records with a `reverse:` prefix.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransformation {
    tag: String,
    reversed: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransformation {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            reversed: false,
            log: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Invocations so far, in order. Entries are
    /// `"<tag>:<revision>"` or `"reverse:<tag>:<revision>"`.
    pub fn invocations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Transformation for RecordingTransformation {
    fn describe(&self) -> String {
        format!("record '{}'", self.tag)
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        let entry = if self.reversed {
            format!("reverse:{}:{}", self.tag, work.current_revision())
        } else {
            format!("{}:{}", self.tag, work.current_revision())
        };
        self.log.lock().unwrap().push(entry);
        Ok(())
    }

    fn reverse(&self) -> Result<Arc<dyn Transformation>, NonReversibleError> {
        Ok(Arc::new(Self {
            tag: self.tag.clone(),
            reversed: !self.reversed,
            log: self.log.clone(),
        }))
    }
}

/// Appends a line to a file in the checkout. Reversible by removing the
/// line again.
#[derive(Clone, Debug)]
pub struct AppendLine {
    path: String,
    line: String,
    remove: bool,
}

impl AppendLine {
    pub fn new(path: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: line.into(),
            remove: false,
        }
    }
}

impl Transformation for AppendLine {
    fn describe(&self) -> String {
        if self.remove {
            format!("remove line from '{}'", self.path)
        } else {
            format!("append line to '{}'", self.path)
        }
    }

    fn transform(&self, work: &mut TransformWork) -> Result<(), TransformError> {
        let target = work.checkout_dir().join(&self.path);
        let content = fs::read_to_string(&target).context(&target)?;
        if self.remove {
            let expected = format!("{}\n", self.line);
            let stripped = content
                .strip_suffix(&expected)
                .ok_or_else(|| TransformError::Other {
                    message: format!("'{}' does not end with the appended line", self.path),
                })?;
            fs::write(&target, stripped).context(&target)?;
        } else {
            let appended = format!("{}{}\n", content, self.line);
            fs::write(&target, appended).context(&target)?;
        }
        Ok(())
    }

    fn reverse(&self) -> Result<Arc<dyn Transformation>, NonReversibleError> {
        Ok(Arc::new(Self {
            path: self.path.clone(),
            line: self.line.clone(),
            remove: !self.remove,
        }))
    }
}

/// Always fails with the given message.
#[derive(Clone, Debug)]
pub struct FailingTransformation {
    message: String,
}

impl FailingTransformation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Transformation for FailingTransformation {
    fn describe(&self) -> String {
        "always fail".to_owned()
    }

    fn transform(&self, _work: &mut TransformWork) -> Result<(), TransformError> {
        Err(TransformError::Other {
            message: self.message.clone(),
        })
    }
}
