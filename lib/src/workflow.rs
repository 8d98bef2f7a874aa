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

//! The workflow runner: resolve, plan, then iterate over
//! checkout/transform/write.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use itertools::Itertools as _;
use thiserror::Error;

use crate::authoring::Authoring;
use crate::config_file::ConfigFile;
use crate::console::ConsoleRef;
use crate::destination::Destination;
use crate::destination::DestinationEffect;
use crate::destination::DestinationReader;
use crate::destination::DestinationWriter;
use crate::destination::TransformResult;
use crate::destination::WriteError;
use crate::destination::WriterContext;
use crate::glob::Glob;
use crate::metadata::Metadata;
use crate::migration::Migration;
use crate::migration::MigrationError;
use crate::options::Options;
use crate::origin::Origin;
use crate::origin::OriginReader;
use crate::origin::ResolveError;
use crate::origin::VisitResult;
use crate::revision::Change;
use crate::revision::Changes;
use crate::revision::ChangesResponse;
use crate::revision::EmptyReason;
use crate::revision::LabelMap;
use crate::revision::Revision;
use crate::transform::Sequence;
use crate::transform::Transformation as _;
use crate::transform_work::TransformWork;
use crate::validate::ValidationMessage;
use crate::workdir::WorkdirManager;

/// How origin changes map to destination changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowMode {
    /// Collapse all new origin changes into one destination change.
    Squash,
    /// One destination change per origin change.
    Iterative,
    /// A single-change preview against a caller-supplied baseline.
    ChangeRequest,
}

/// Error converting a string to a [`WorkflowMode`].
#[derive(Debug, Error)]
#[error("Invalid workflow mode '{input}'. Valid modes: SQUASH, ITERATIVE, CHANGE_REQUEST")]
pub struct ModeParseError {
    /// The rejected input.
    pub input: String,
}

impl WorkflowMode {
    /// The canonical config-file spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Squash => "SQUASH",
            Self::Iterative => "ITERATIVE",
            Self::ChangeRequest => "CHANGE_REQUEST",
        }
    }
}

impl FromStr for WorkflowMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SQUASH" => Ok(Self::Squash),
            "ITERATIVE" => Ok(Self::Iterative),
            "CHANGE_REQUEST" => Ok(Self::ChangeRequest),
            _ => Err(ModeParseError {
                input: s.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-configured workflow migration.
#[derive(Debug)]
pub struct Workflow {
    name: String,
    description: Option<String>,
    message_template: Option<String>,
    mode: WorkflowMode,
    origin: Arc<dyn Origin>,
    destination: Arc<dyn Destination>,
    authoring: Authoring,
    origin_files: Glob,
    destination_files: Glob,
    transformation: Sequence,
    reversible_check: bool,
    config_file: ConfigFile,
    options: Arc<Options>,
    console: ConsoleRef,
}

/// The planned work of one run.
struct Plan {
    changes: Vec<Change>,
    baseline: Option<String>,
    migrated: Vec<Change>,
}

enum PlanOutcome {
    Empty(EmptyReason),
    Ready(Plan),
}

/// One ITERATIVE iteration after checkout and transformation, before the
/// ordered write.
struct PreparedIteration {
    change: Change,
    result: TransformResult,
}

impl Workflow {
    /// Assembles a workflow. Invoked by the config loader.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        message_template: Option<String>,
        mode: WorkflowMode,
        origin: Arc<dyn Origin>,
        destination: Arc<dyn Destination>,
        authoring: Authoring,
        origin_files: Glob,
        destination_files: Glob,
        transformation: Sequence,
        reversible_check: bool,
        config_file: ConfigFile,
        options: Arc<Options>,
        console: ConsoleRef,
    ) -> Self {
        Self {
            name: name.into(),
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
            config_file,
            options,
            console,
        }
    }

    /// The workflow's mode.
    pub fn mode(&self) -> WorkflowMode {
        self.mode
    }

    /// The transformation pipeline.
    pub fn transformation(&self) -> &Sequence {
        &self.transformation
    }

    /// Whether the pipeline must stay reversible.
    pub fn reversible_check(&self) -> bool {
        self.reversible_check
    }

    fn check_cancelled(&self) -> Result<(), MigrationError> {
        if self.options.general.cancellation.is_requested() {
            Err(MigrationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Retries `f` on transient repository errors with exponential backoff.
    fn with_retries<T>(
        &self,
        what: &str,
        mut f: impl FnMut() -> Result<T, MigrationError>,
    ) -> Result<T, MigrationError> {
        fn is_transient(err: &MigrationError) -> bool {
            match err {
                MigrationError::Repo(err) => err.is_transient(),
                MigrationError::Resolve(ResolveError::Repo(err)) => err.is_transient(),
                _ => false,
            }
        }
        let mut attempt = 0usize;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err)
                    if is_transient(&err) && attempt < self.options.workflow.repo_retries =>
                {
                    attempt += 1;
                    let delay = self.options.workflow.retry_base_delay
                        * 2u32.pow((attempt - 1).min(16) as u32);
                    tracing::warn!(%err, attempt, ?delay, "transient repository error; retrying");
                    self.console.warn(&format!(
                        "Transient error while {what}: {err}. Retrying in {delay:?}"
                    ));
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn writer_context(&self, resolved: &Revision) -> WriterContext {
        let dry_run = match self.mode {
            WorkflowMode::ChangeRequest => {
                self.options.general.dry_run || !self.options.workflow.confirm_change_request
            }
            _ => self.options.general.dry_run,
        };
        WriterContext {
            dry_run,
            context_reference: resolved.context_reference().map(str::to_owned),
        }
    }

    /// Bounded origin history at and below `baseline_rev`, newest first,
    /// exposed to transformations as already-migrated context.
    fn migrated_history(&self, reader: &dyn OriginReader, baseline_rev: &Revision) -> Vec<Change> {
        let limit = self.options.workflow.migrated_history_limit;
        let mut result = vec![];
        if limit == 0 {
            return result;
        }
        let visit = reader.visit_changes(baseline_rev, &mut |change| {
            result.push(change.clone());
            if result.len() >= limit {
                VisitResult::Terminate
            } else {
                VisitResult::Continue
            }
        });
        if let Err(err) = visit {
            tracing::warn!(%err, "cannot collect migrated history; continuing without it");
            result.clear();
        }
        result
    }

    /// Steps 2-4 of the run: baseline lookup and the new-change range.
    fn plan(
        &self,
        reader: &dyn OriginReader,
        writer: &dyn DestinationWriter,
        resolved: &Revision,
    ) -> Result<PlanOutcome, MigrationError> {
        let label_name = self.origin.label_name();
        let status = self.with_retries("reading destination status", || {
            writer
                .destination_status(&self.destination_files, &label_name)
                .map_err(MigrationError::from)
        })?;
        let baseline = self
            .options
            .workflow
            .last_revision
            .clone()
            .or_else(|| status.and_then(|status| status.baseline));
        tracing::debug!(?baseline, revision = %resolved, "planned against baseline");

        let Some(baseline_id) = baseline else {
            // First migration: import the resolved revision as one change.
            let change = self.with_retries("reading the resolved change", || {
                reader.change(resolved).map_err(MigrationError::from)
            })?;
            return Ok(PlanOutcome::Ready(Plan {
                changes: vec![change],
                baseline: None,
                migrated: vec![],
            }));
        };

        let baseline_rev = self.with_retries("resolving the baseline", || {
            self.origin
                .resolve(Some(&baseline_id))
                .map_err(MigrationError::from)
        })?;
        let response = self.with_retries("listing changes", || {
            reader
                .changes(Some(&baseline_rev), resolved)
                .map_err(MigrationError::from)
        })?;
        match response {
            ChangesResponse::Empty(reason) if !self.options.general.force => {
                Ok(PlanOutcome::Empty(reason))
            }
            ChangesResponse::Empty(_) => {
                // --force: re-import the resolved revision even though the
                // planner found nothing new.
                let change = self.with_retries("reading the resolved change", || {
                    reader.change(resolved).map_err(MigrationError::from)
                })?;
                Ok(PlanOutcome::Ready(Plan {
                    changes: vec![change],
                    baseline: Some(baseline_id),
                    migrated: self.migrated_history(reader, &baseline_rev),
                }))
            }
            ChangesResponse::Changes(changes) => Ok(PlanOutcome::Ready(Plan {
                changes,
                baseline: Some(baseline_id),
                migrated: self.migrated_history(reader, &baseline_rev),
            })),
        }
    }

    /// Checks out `revision`, runs the pipeline and assembles the
    /// destination-ready result.
    #[expect(clippy::too_many_arguments)]
    fn checkout_and_transform(
        &self,
        reader: &dyn OriginReader,
        workdir: &WorkdirManager,
        subdir: &str,
        revision: &Revision,
        seed: &Change,
        changes: Changes,
        baseline: Option<String>,
        destination_reader: Option<Box<dyn DestinationReader>>,
    ) -> Result<TransformResult, MigrationError> {
        let checkout_dir = workdir.fresh_subdir(subdir)?;
        self.console
            .progress(&format!("Checking out {revision} into {}", checkout_dir.display()));
        self.with_retries("checking out", || {
            reader
                .checkout(revision, &checkout_dir)
                .map_err(MigrationError::from)
        })?;

        let metadata = Metadata::new(seed.message(), self.authoring.resolve(seed.author()));
        let mut work = TransformWork::new(
            checkout_dir.clone(),
            metadata,
            changes,
            self.console.clone(),
            &self.name,
            revision.clone(),
        );
        if let Some(reader) = destination_reader {
            work.set_destination_reader(reader);
        }
        self.transformation.transform(&mut work)?;
        self.check_cancelled()?;

        // The template sees the final metadata: labels added by
        // transformations are resolvable, and the rev-id label resolves to
        // the revision being written.
        if let Some(template) = &self.message_template {
            let label_name = self.origin.label_name();
            let message = crate::metadata::expand_template(template, |name| {
                if name == label_name {
                    return Some(revision.as_string().to_owned());
                }
                work.metadata()
                    .builtin_label_value(name)
                    .or_else(|| work.find_label_value(name))
            })
            .map_err(|err| {
                MigrationError::Transform(crate::transform::TransformError::Other {
                    message: err.to_string(),
                })
            })?;
            work.set_message(message);
        }

        let changes = work.changes().current.clone();
        let metadata = work.into_metadata();
        Ok(TransformResult::new(
            checkout_dir,
            revision.clone(),
            metadata.author().clone(),
            metadata.message(),
            Some(seed.timestamp()),
            changes,
            baseline,
            self.origin.label_name(),
        ))
    }

    /// Writes one result, translating empty-change rejections per policy.
    fn write(
        &self,
        writer: &mut dyn DestinationWriter,
        result: &TransformResult,
    ) -> Result<Vec<DestinationEffect>, MigrationError> {
        let write_attempt = self.with_retries("writing to the destination", || {
            match writer.write(result, &self.destination_files, self.console.as_ref()) {
                Ok(effects) => Ok(Ok(effects)),
                Err(WriteError::EmptyChange { message }) => Ok(Err(message)),
                Err(WriteError::Repo(err)) => Err(MigrationError::from(err)),
            }
        })?;
        match write_attempt {
            Ok(effects) => {
                for effect in &effects {
                    self.console
                        .info(&format!("{}: {}", effect.effect_type, effect.summary));
                }
                Ok(effects)
            }
            Err(message) if self.options.workflow.fail_on_empty_change => {
                Err(MigrationError::EmptyChange { message })
            }
            Err(message) => {
                self.console.warn(&message);
                Ok(vec![DestinationEffect::noop(message)])
            }
        }
    }

    fn run_squash(
        &self,
        reader: &dyn OriginReader,
        writer: &mut dyn DestinationWriter,
        workdir: &WorkdirManager,
        resolved: &Revision,
        plan: Plan,
    ) -> Result<Vec<DestinationEffect>, MigrationError> {
        let summary: String = plan
            .changes
            .iter()
            .map(|change| format!("  - {} {}", change.revision(), change.first_line_message()))
            .join("\n");
        tracing::info!(count = plan.changes.len(), "squashing changes:\n{summary}");

        // The newest change seeds the message and authorship.
        let seed = plan
            .changes
            .last()
            .ok_or_else(|| MigrationError::Internal {
                message: "squash plan has no changes".to_owned(),
            })?
            .clone();
        let destination_reader = plan.baseline.as_deref().and_then(|baseline| {
            writer
                .destination_reader(self.console.as_ref(), Some(baseline), workdir.root())
                .ok()
        });
        let changes = Changes {
            current: plan.changes.clone(),
            migrated: plan.migrated.clone(),
        };
        let result = self.checkout_and_transform(
            reader,
            workdir,
            "checkout",
            resolved,
            &seed,
            changes,
            plan.baseline.clone(),
            destination_reader,
        )?;
        let effects = self.write(writer, &result)?;
        workdir.release_subdir(result.checkout_dir())?;
        Ok(effects)
    }

    fn run_iterative(
        &self,
        reader: &dyn OriginReader,
        writer: &mut dyn DestinationWriter,
        workdir: &WorkdirManager,
        plan: Plan,
    ) -> Result<Vec<DestinationEffect>, MigrationError> {
        // The context visible to iteration i is deterministic: everything
        // older than change i, newest first, bounded like the plan history.
        let limit = self.options.workflow.migrated_history_limit;
        let migrated_for = |index: usize| -> Vec<Change> {
            plan.changes[..index]
                .iter()
                .rev()
                .cloned()
                .chain(plan.migrated.iter().cloned())
                .take(limit)
                .collect()
        };
        let baseline_for = |index: usize| -> Option<String> {
            if index == 0 {
                plan.baseline.clone()
            } else {
                Some(plan.changes[index - 1].revision().as_string().to_owned())
            }
        };

        let prepare = |(index, change): (usize, &Change)| -> Result<PreparedIteration, MigrationError> {
            let result = self.checkout_and_transform(
                reader,
                workdir,
                &format!("iter-{index}"),
                change.revision(),
                change,
                Changes {
                    current: vec![change.clone()],
                    migrated: migrated_for(index),
                },
                baseline_for(index),
                None,
            )?;
            Ok(PreparedIteration {
                change: change.clone(),
                result,
            })
        };

        let threads = self.options.workflow.threads.max(1);
        let prepared: Box<dyn Iterator<Item = Result<PreparedIteration, MigrationError>> + '_> =
            if threads > 1 {
                // Checkout and transformation are independent per change;
                // only the writes below have to happen in origin order.
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|err| MigrationError::Internal {
                        message: format!("cannot build worker pool: {err}"),
                    })?;
                let results: Vec<_> = pool.install(|| {
                    use rayon::prelude::*;
                    plan.changes.par_iter().enumerate().map(prepare).collect()
                });
                Box::new(results.into_iter())
            } else {
                // Lazy: a failed iteration stops the run before later
                // changes are even checked out.
                Box::new(plan.changes.iter().enumerate().map(prepare))
            };

        let mut effects = vec![];
        for (index, prepared) in prepared.enumerate() {
            let iteration = match prepared {
                Ok(iteration) => iteration,
                Err(err) => {
                    return Err(MigrationError::Iteration {
                        change: plan.changes[index].revision().as_string().to_owned(),
                        effects,
                        source: Box::new(err),
                    });
                }
            };
            let change_id = iteration.change.revision().as_string().to_owned();
            if let Err(err) = self.check_cancelled() {
                return Err(MigrationError::Iteration {
                    change: change_id,
                    effects,
                    source: Box::new(err),
                });
            }
            match self.write(writer, &iteration.result) {
                Ok(iteration_effects) => {
                    effects.extend(iteration_effects);
                    workdir.release_subdir(iteration.result.checkout_dir())?;
                }
                Err(err) => {
                    self.console.error(&format!(
                        "Migration of change '{change_id}' failed; {} changes were migrated",
                        effects.len()
                    ));
                    return Err(MigrationError::Iteration {
                        change: change_id,
                        effects,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(effects)
    }

    fn run_change_request(
        &self,
        reader: &dyn OriginReader,
        writer: &mut dyn DestinationWriter,
        workdir: &WorkdirManager,
        resolved: &Revision,
    ) -> Result<Vec<DestinationEffect>, MigrationError> {
        let baseline = self
            .options
            .workflow
            .change_request_baseline
            .clone()
            .ok_or_else(|| MigrationError::Internal {
                message: "CHANGE_REQUEST requires a baseline; \
                          set WorkflowOptions::change_request_baseline"
                    .to_owned(),
            })?;
        let change = self.with_retries("reading the resolved change", || {
            reader.change(resolved).map_err(MigrationError::from)
        })?;
        let destination_reader = writer
            .destination_reader(self.console.as_ref(), Some(&baseline), workdir.root())
            .ok();
        let result = self.checkout_and_transform(
            reader,
            workdir,
            "checkout",
            resolved,
            &change,
            Changes {
                current: vec![change.clone()],
                migrated: vec![],
            },
            Some(baseline),
            destination_reader,
        )?;
        let effects = self.write(writer, &result)?;
        workdir.release_subdir(result.checkout_dir())?;
        Ok(effects)
    }
}

impl Migration for Workflow {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    fn mode_name(&self) -> &'static str {
        "workflow"
    }

    fn config_file(&self) -> &ConfigFile {
        &self.config_file
    }

    fn origin_description(&self) -> LabelMap {
        self.origin.describe(&self.origin_files)
    }

    fn destination_description(&self) -> LabelMap {
        self.destination.describe()
    }

    fn run(
        &self,
        workdir: &Path,
        source_refs: &[String],
    ) -> Result<Vec<DestinationEffect>, MigrationError> {
        if source_refs.len() > 1 {
            return Err(MigrationError::Resolve(ResolveError::UnresolvableRevision {
                message: format!(
                    "workflow '{}' accepts at most one source reference, got {}",
                    self.name,
                    source_refs.len()
                ),
            }));
        }
        self.check_cancelled()?;
        let requested = source_refs.first().map(String::as_str);
        let resolved = self.with_retries("resolving the origin reference", || {
            self.origin.resolve(requested).map_err(MigrationError::from)
        })?;
        tracing::info!(
            migration = %self.name,
            mode = %self.mode,
            revision = %resolved,
            "starting migration run"
        );
        self.console.info(&format!(
            "Running migration '{}' ({}) for {}",
            self.name, self.mode, resolved
        ));

        let reader = self.origin.reader(&self.origin_files, &self.authoring)?;
        let mut writer = self.destination.writer(&self.writer_context(&resolved))?;

        if self.mode == WorkflowMode::ChangeRequest {
            let manager = WorkdirManager::new(Some(workdir), &self.name)?;
            return self.run_change_request(reader.as_ref(), writer.as_mut(), &manager, &resolved);
        }

        match self.plan(reader.as_ref(), writer.as_ref(), &resolved)? {
            PlanOutcome::Empty(reason) => {
                // No workdir is allocated for a no-op run.
                let summary = format!("Nothing to migrate: {reason}");
                self.console.info(&summary);
                Ok(vec![DestinationEffect::noop(summary)])
            }
            PlanOutcome::Ready(plan) => {
                self.check_cancelled()?;
                let manager = WorkdirManager::new(Some(workdir), &self.name)?;
                match self.mode {
                    WorkflowMode::Squash => {
                        self.run_squash(reader.as_ref(), writer.as_mut(), &manager, &resolved, plan)
                    }
                    WorkflowMode::Iterative => {
                        self.run_iterative(reader.as_ref(), writer.as_mut(), &manager, plan)
                    }
                    WorkflowMode::ChangeRequest => unreachable!("handled above"),
                }
            }
        }
    }

    fn validate(&self) -> Vec<ValidationMessage> {
        let mut messages = vec![];
        if self.reversible_check {
            if let Err(err) = self.transformation.reverse() {
                messages.push(ValidationMessage::error(format!(
                    "Workflow '{}' is marked reversible but cannot be reversed: {err}",
                    self.name
                )));
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_mode_parsing_is_exact() {
        assert_eq!(
            WorkflowMode::from_str("SQUASH").unwrap(),
            WorkflowMode::Squash
        );
        assert_eq!(
            WorkflowMode::from_str("ITERATIVE").unwrap(),
            WorkflowMode::Iterative
        );
        assert_eq!(
            WorkflowMode::from_str("CHANGE_REQUEST").unwrap(),
            WorkflowMode::ChangeRequest
        );
        // Case-sensitive, exact match only.
        assert_matches!(WorkflowMode::from_str("squash"), Err(ModeParseError { .. }));
        let err = WorkflowMode::from_str("MERGE").unwrap_err();
        assert!(err.to_string().contains("SQUASH, ITERATIVE, CHANGE_REQUEST"));
    }

    #[test]
    fn test_mode_display_roundtrip() {
        for mode in [
            WorkflowMode::Squash,
            WorkflowMode::Iterative,
            WorkflowMode::ChangeRequest,
        ] {
            assert_eq!(
                WorkflowMode::from_str(&mode.to_string()).unwrap(),
                mode
            );
        }
    }
}
