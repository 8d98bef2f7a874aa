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

//! Built-in Starlark functions and the value types they exchange.
//!
//! `core.workflow(...)` is the registration point of migrations; `glob`,
//! `authoring.*` and `core.transform(...)` produce the values it consumes.
//! Origin and destination values are allocated by backend modules (or the
//! testing module) through [`StarlarkOrigin`] and [`StarlarkDestination`].

use std::fmt;
use std::str::FromStr as _;
use std::sync::Arc;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::environment::GlobalsBuilder;
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Value;
use starlark::values::ValueLike;
use starlark::values::list::ListRef;
use starlark::values::list::UnpackList;
use starlark::values::none::NoneType;
use starlark::values::starlark_value;

use crate::authoring::Author;
use crate::authoring::Authoring;
use crate::authoring::AuthoringPolicy;
use crate::destination::Destination;
use crate::glob::Glob;
use crate::modules::eval_context;
use crate::origin::Origin;
use crate::transform::ExplicitReversal;
use crate::transform::Sequence;
use crate::transform::Transformation;
use crate::workflow::Workflow;
use crate::workflow::WorkflowMode;

/// A [`Glob`] as a Starlark value.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkGlob(#[allocative(skip)] pub Glob);
starlark_simple_value!(StarlarkGlob);

impl fmt::Display for StarlarkGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[starlark_value(type = "glob")]
impl<'v> StarlarkValue<'v> for StarlarkGlob {}

/// An [`Authoring`] as a Starlark value.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkAuthoring(#[allocative(skip)] pub Authoring);
starlark_simple_value!(StarlarkAuthoring);

impl fmt::Display for StarlarkAuthoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authoring({})", self.0.default_author())
    }
}

#[starlark_value(type = "authoring")]
impl<'v> StarlarkValue<'v> for StarlarkAuthoring {}

/// An origin endpoint as a Starlark value. Backend modules allocate these.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkOrigin(#[allocative(skip)] pub Arc<dyn Origin>);
starlark_simple_value!(StarlarkOrigin);

impl fmt::Display for StarlarkOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "origin({})", self.0.label_name())
    }
}

#[starlark_value(type = "origin")]
impl<'v> StarlarkValue<'v> for StarlarkOrigin {}

/// A destination endpoint as a Starlark value. Backend modules allocate
/// these.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkDestination(#[allocative(skip)] pub Arc<dyn Destination>);
starlark_simple_value!(StarlarkDestination);

impl fmt::Display for StarlarkDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination")
    }
}

#[starlark_value(type = "destination")]
impl<'v> StarlarkValue<'v> for StarlarkDestination {}

/// A [`Transformation`] as a Starlark value.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkTransformation(#[allocative(skip)] pub Arc<dyn Transformation>);
starlark_simple_value!(StarlarkTransformation);

impl fmt::Display for StarlarkTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transformation({})", self.0.describe())
    }
}

#[starlark_value(type = "transformation")]
impl<'v> StarlarkValue<'v> for StarlarkTransformation {}

fn type_error<T>(param: &str, expected: &str, got: Value) -> anyhow::Result<T> {
    Err(anyhow::anyhow!(
        "parameter '{param}' expects {expected}, got {}",
        got.get_type()
    ))
}

fn expect_glob(value: Value, param: &str) -> anyhow::Result<Glob> {
    match value.downcast_ref::<StarlarkGlob>() {
        Some(glob) => Ok(glob.0.clone()),
        None => type_error(param, "a glob", value),
    }
}

fn expect_authoring(value: Value, param: &str) -> anyhow::Result<Authoring> {
    match value.downcast_ref::<StarlarkAuthoring>() {
        Some(authoring) => Ok(authoring.0.clone()),
        None => type_error(param, "an authoring configuration", value),
    }
}

fn expect_origin(value: Value, param: &str) -> anyhow::Result<Arc<dyn Origin>> {
    match value.downcast_ref::<StarlarkOrigin>() {
        Some(origin) => Ok(origin.0.clone()),
        None => type_error(param, "an origin", value),
    }
}

fn expect_destination(value: Value, param: &str) -> anyhow::Result<Arc<dyn Destination>> {
    match value.downcast_ref::<StarlarkDestination>() {
        Some(destination) => Ok(destination.0.clone()),
        None => type_error(param, "a destination", value),
    }
}

fn expect_transformations(
    value: Value,
    param: &str,
) -> anyhow::Result<Vec<Arc<dyn Transformation>>> {
    let Some(list) = ListRef::from_value(value) else {
        return type_error(param, "a list of transformations", value);
    };
    list.iter()
        .map(|item| match item.downcast_ref::<StarlarkTransformation>() {
            Some(transformation) => Ok(transformation.0.clone()),
            None => type_error(param, "a transformation", item),
        })
        .collect()
}

/// Functions available without a namespace.
#[starlark_module]
pub(crate) fn global_functions(builder: &mut GlobalsBuilder) {
    /// Describes a set of files by include/exclude patterns.
    fn glob(
        include: UnpackList<String>,
        #[starlark(require = named)] exclude: Option<UnpackList<String>>,
    ) -> anyhow::Result<StarlarkGlob> {
        Ok(StarlarkGlob(Glob::new(
            include.items,
            exclude.map(|l| l.items).unwrap_or_default(),
        )?))
    }
}

/// The `core` namespace.
#[starlark_module]
pub(crate) fn core_module(builder: &mut GlobalsBuilder) {
    /// Sets the project name of the configuration.
    fn project(
        #[starlark(require = named)] name: String,
        eval: &mut Evaluator,
    ) -> anyhow::Result<NoneType> {
        let ctx = eval_context(eval)?;
        *ctx.project_name.borrow_mut() = Some(name);
        Ok(NoneType)
    }

    /// Defines and registers a workflow migration.
    fn workflow<'v>(
        #[starlark(require = named)] name: String,
        #[starlark(require = named)] origin: Value<'v>,
        #[starlark(require = named)] destination: Value<'v>,
        #[starlark(require = named)] authoring: Value<'v>,
        #[starlark(require = named)] transformations: Option<Value<'v>>,
        #[starlark(require = named)] origin_files: Option<Value<'v>>,
        #[starlark(require = named)] destination_files: Option<Value<'v>>,
        #[starlark(require = named)] mode: Option<String>,
        #[starlark(require = named)] reversible_check: Option<bool>,
        #[starlark(require = named)] description: Option<String>,
        #[starlark(require = named)] message_template: Option<String>,
        eval: &mut Evaluator,
    ) -> anyhow::Result<NoneType> {
        let ctx = eval_context(eval)?;
        let origin = expect_origin(origin, "origin")?;
        let destination = expect_destination(destination, "destination")?;
        let authoring = expect_authoring(authoring, "authoring")?;
        let mode = WorkflowMode::from_str(mode.as_deref().unwrap_or("SQUASH"))?;
        let transformation = Sequence::new(match transformations {
            Some(value) => expect_transformations(value, "transformations")?,
            None => vec![],
        });
        let origin_files = match origin_files {
            Some(value) => expect_glob(value, "origin_files")?,
            None => Glob::everything(),
        };
        let destination_files = match destination_files {
            Some(value) => expect_glob(value, "destination_files")?,
            None => Glob::everything(),
        };
        // Change requests must be revertible in the destination, so the
        // reversibility check defaults to on for that mode.
        let reversible_check =
            reversible_check.unwrap_or(mode == WorkflowMode::ChangeRequest);

        let workflow = Workflow::new(
            name,
            description,
            message_template,
            mode,
            origin,
            destination,
            authoring,
            origin_files,
            destination_files,
            transformation,
            reversible_check,
            ctx.current_file.clone(),
            ctx.options.clone(),
            ctx.console.clone(),
        );
        ctx.migrations.borrow_mut().register(Arc::new(workflow))?;
        Ok(NoneType)
    }

    /// Groups transformations, optionally with an explicit reversal.
    fn transform<'v>(
        transformations: Value<'v>,
        #[starlark(require = named)] reversal: Option<Value<'v>>,
    ) -> anyhow::Result<StarlarkTransformation> {
        let forward = Sequence::new(expect_transformations(transformations, "transformations")?);
        match reversal {
            None => Ok(StarlarkTransformation(Arc::new(forward))),
            Some(value) => {
                let backward = Sequence::new(expect_transformations(value, "reversal")?);
                Ok(StarlarkTransformation(Arc::new(ExplicitReversal::new(
                    Arc::new(forward),
                    Arc::new(backward),
                ))))
            }
        }
    }

    /// The reversed pipeline: each transformation reversed, in reverse
    /// order.
    fn reverse<'v>(
        transformations: Value<'v>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let items = expect_transformations(transformations, "transformations")?;
        let mut reversed = Vec::with_capacity(items.len());
        for item in items.iter().rev() {
            let inverse = item.reverse()?;
            reversed.push(heap.alloc(StarlarkTransformation(inverse)));
        }
        Ok(heap.alloc(reversed))
    }
}

/// The `authoring` namespace.
#[starlark_module]
pub(crate) fn authoring_module(builder: &mut GlobalsBuilder) {
    /// Keeps origin authors; `default` is used when the origin does not
    /// record one.
    fn pass_thru(default: String) -> anyhow::Result<StarlarkAuthoring> {
        Ok(StarlarkAuthoring(Authoring::new(
            Author::from_str(&default)?,
            AuthoringPolicy::PassThru,
        )))
    }

    /// Attributes every migrated change to `default`.
    fn overwrite(default: String) -> anyhow::Result<StarlarkAuthoring> {
        Ok(StarlarkAuthoring(Authoring::new(
            Author::from_str(&default)?,
            AuthoringPolicy::Overwrite,
        )))
    }

    /// Keeps origin authors whose email is on `allowlist`; everyone else
    /// becomes `default`.
    fn allowed(
        #[starlark(require = named)] default: String,
        #[starlark(require = named)] allowlist: UnpackList<String>,
    ) -> anyhow::Result<StarlarkAuthoring> {
        Ok(StarlarkAuthoring(Authoring::new(
            Author::from_str(&default)?,
            AuthoringPolicy::Allowed {
                allowlist: allowlist.items.into_iter().collect(),
            },
        )))
    }
}
