//! Processor contract and the per-step execution wrapper.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::batch::{Batch, BatchList};
use crate::error::{Error, Result};
use crate::error_stack::{ErrorReport, ErrorStack};

/// Tag for something a processor guarantees to downstream steps,
/// e.g. `"astrometry"` or `"flat"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// What happens to the rest of a step when one batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Stop at the first failing batch.
    #[default]
    FailFast,
    /// Record the failure, keep the input batch in its slot and go on.
    ContinueOnError,
}

impl ErrorPolicy {
    pub fn from_catch_all(catch_all_errors: bool) -> Self {
        if catch_all_errors {
            ErrorPolicy::ContinueOnError
        } else {
            ErrorPolicy::FailFast
        }
    }
}

/// Run-scoped namespace shared by every processor of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub pipeline_name: String,
    pub night: String,
    pub output_root: PathBuf,
}

impl RunContext {
    pub fn new(
        pipeline_name: impl Into<String>,
        night: impl Into<String>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            night: night.into(),
            output_root: output_root.into(),
        }
    }

    /// `<pipeline name>/<night>`, the part of every output path owned by this run.
    pub fn night_sub_dir(&self) -> PathBuf {
        Path::new(&self.pipeline_name).join(&self.night)
    }

    pub fn night_dir(&self) -> PathBuf {
        self.output_root.join(self.night_sub_dir())
    }

    pub fn output_dir(&self, sub_dir: impl AsRef<Path>) -> PathBuf {
        self.night_dir().join(sub_dir)
    }
}

/// Result of applying one step to a batch list.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub batches: BatchList,
    pub errors: ErrorStack,
}

/// What a processor can see of the pipeline while it runs.
pub struct StepContext<'a> {
    /// Steps scheduled before the running one, in order.
    pub preceding: &'a mut [Step],
    pub run: &'a RunContext,
}

impl StepContext<'_> {
    /// Threads `batch` through the `replay` of every preceding step, giving
    /// each step its own preceding slice.
    pub fn replay_through_preceding(&mut self, mut batch: Batch) -> Result<Batch> {
        for idx in 0..self.preceding.len() {
            let (before, rest) = self.preceding.split_at_mut(idx);
            let step = &mut rest[0];
            let mut ctx = StepContext {
                preceding: before,
                run: self.run,
            };
            tracing::debug!(
                processor = step.name(),
                frames = batch.len(),
                "Replaying frames through preceding step"
            );
            batch = step.processor.replay(batch, &mut ctx)?;
        }
        Ok(batch)
    }
}

/// A unit of work in the chain.
///
/// Per-batch processors implement `apply_to_batch`; processors that reshape
/// the whole batch list (loaders, batchers) override `apply` instead.
pub trait Processor {
    /// Identity used in logs and error reports.
    fn name(&self) -> &str;

    fn provides(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn requires(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn apply_to_batch(&mut self, batch: Batch, _ctx: &mut StepContext<'_>) -> Result<Batch> {
        Ok(batch)
    }

    fn apply(
        &mut self,
        batches: BatchList,
        ctx: &mut StepContext<'_>,
        policy: ErrorPolicy,
    ) -> StepOutput {
        apply_per_batch(self, batches, ctx, policy)
    }

    /// Called when a later step replays historical frames through the chain.
    /// Structural steps pass frames through; correction steps apply themselves.
    fn replay(&mut self, batch: Batch, _ctx: &mut StepContext<'_>) -> Result<Batch> {
        Ok(batch)
    }
}

/// Applies `apply_to_batch` to every batch, recording failures by batch index.
///
/// A failed batch keeps its input contents in the output slot. With
/// `FailFast` the remaining batches are passed through untouched.
pub fn apply_per_batch<P: Processor + ?Sized>(
    processor: &mut P,
    batches: BatchList,
    ctx: &mut StepContext<'_>,
    policy: ErrorPolicy,
) -> StepOutput {
    let mut errors = ErrorStack::new();
    let mut output = Vec::with_capacity(batches.len());
    let mut remaining = batches.into_iter().enumerate();

    for (batch_index, batch) in remaining.by_ref() {
        // clones share pixel and metadata storage
        match processor.apply_to_batch(batch.clone(), ctx) {
            Ok(processed) => output.push(processed),
            Err(error) => {
                errors.push(ErrorReport::new(processor.name(), batch_index, error));
                output.push(batch);
                if policy == ErrorPolicy::FailFast {
                    break;
                }
            }
        }
    }

    output.extend(remaining.map(|(_, batch)| batch));

    StepOutput {
        batches: output,
        errors,
    }
}

/// Names and capabilities of the processors scheduled before a step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecedingSteps {
    pub names: Vec<String>,
    pub capabilities: BTreeSet<Capability>,
}

/// A processor placed in a pipeline.
pub struct Step {
    processor: Box<dyn Processor>,
    preceding: PrecedingSteps,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("processor", &self.processor.name())
            .field("preceding", &self.preceding)
            .finish()
    }
}

impl Step {
    pub fn new(processor: Box<dyn Processor>) -> Self {
        Self {
            processor,
            preceding: PrecedingSteps::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.processor.name()
    }

    pub fn set_preceding_steps(&mut self, previous_steps: &[Step]) {
        self.preceding = PrecedingSteps {
            names: previous_steps
                .iter()
                .map(|step| step.name().to_string())
                .collect(),
            capabilities: previous_steps
                .iter()
                .flat_map(|step| step.processor.provides())
                .collect(),
        };
    }

    pub fn preceding_steps(&self) -> &PrecedingSteps {
        &self.preceding
    }

    /// Fails if a required capability is not provided by any preceding step.
    pub fn check_prerequisites(&self) -> Result<()> {
        let missing: Vec<Capability> = self
            .processor
            .requires()
            .into_iter()
            .filter(|capability| !self.preceding.capabilities.contains(capability))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration {
                processor: self.name().to_string(),
                missing,
            })
        }
    }

    pub fn base_apply(
        &mut self,
        batches: BatchList,
        preceding: &mut [Step],
        run: &RunContext,
        policy: ErrorPolicy,
    ) -> StepOutput {
        let mut ctx = StepContext { preceding, run };
        self.processor.apply(batches, &mut ctx, policy)
    }
}
