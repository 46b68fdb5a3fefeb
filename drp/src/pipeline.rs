//! Pipeline definitions and the linear step runner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::batch::{total_frames, BatchList};
use crate::error::{Error, Result};
use crate::error_stack::ErrorStack;
use crate::processor::{ErrorPolicy, Processor, RunContext, Step};
use crate::registry::{BuildContext, ProcessorRegistry};

pub const DEFAULT_CONFIGURATION: &str = "default";

/// One entry of a configuration: `{ type: <registry id>, ...params }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(rename = "type")]
    pub processor_type: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yml::Value>,
}

impl StepDefinition {
    pub fn params_value(&self) -> serde_yml::Value {
        serde_yml::Value::Mapping(
            self.params
                .iter()
                .map(|(key, value)| (serde_yml::Value::String(key.clone()), value.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    pub output_root: PathBuf,
    #[serde(default)]
    pub catch_all_errors: bool,
    /// Where the error summary is written, relative to the night directory.
    #[serde(default)]
    pub error_summary: Option<PathBuf>,
    pub configurations: BTreeMap<String, Vec<StepDefinition>>,
}

impl PipelineDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yml::from_str(yaml).map_err(|e| Error::InvalidDefinition(e.into()))
    }

    /// Reads a YAML or JSON definition, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        common::serde::load_from_file(path).map_err(|e| {
            Error::InvalidDefinition(e.context(format!("Failed to load {}", path.display())))
        })
    }

    pub fn configuration(&self, name: &str) -> Result<&[StepDefinition]> {
        self.configurations
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownConfiguration(name.to_string()))
    }

    pub fn run_context(&self, night: &str) -> RunContext {
        RunContext::new(&self.name, night, &self.output_root)
    }
}

/// Output of a completed run.
#[derive(Debug)]
pub struct Reduction {
    pub batches: BatchList,
    pub error_stack: ErrorStack,
}

/// A fail-fast run stopped at its first error.
#[derive(Debug, thiserror::Error)]
#[error("Reduction aborted after {} error(s)", .error_stack.len())]
pub struct RunAborted {
    /// Batches as they were when the run stopped.
    pub batches: BatchList,
    pub error_stack: ErrorStack,
}

impl RunAborted {
    pub fn first_error(&self) -> Option<&Error> {
        self.error_stack.first_error()
    }
}

/// Ordered list of steps sharing one run context.
#[derive(Debug)]
pub struct Pipeline {
    run: RunContext,
    steps: Vec<Step>,
    catch_all_errors: bool,
    error_summary: Option<PathBuf>,
}

impl Pipeline {
    /// Builds the named configuration (or `"default"`) of `definition` for
    /// one night, reading frames and history as `.frame` files.
    pub fn new(
        definition: &PipelineDefinition,
        configuration: Option<&str>,
        night: &str,
        registry: &ProcessorRegistry,
    ) -> Result<Self> {
        let ctx = BuildContext::new(definition.run_context(night));
        Self::with_context(definition, configuration, registry, &ctx)
    }

    pub fn with_context(
        definition: &PipelineDefinition,
        configuration: Option<&str>,
        registry: &ProcessorRegistry,
        ctx: &BuildContext,
    ) -> Result<Self> {
        let configuration = configuration.unwrap_or(DEFAULT_CONFIGURATION);
        let step_definitions = definition.configuration(configuration)?;

        let processors = step_definitions
            .iter()
            .map(|step| registry.build(&step.processor_type, &step.params_value(), ctx))
            .collect::<Result<Vec<_>>>()?;

        let mut pipeline = Self::assemble(ctx.run.clone(), processors)?;
        pipeline.catch_all_errors = definition.catch_all_errors;
        pipeline.error_summary = definition.error_summary.clone();
        Ok(pipeline)
    }

    /// Builds a pipeline from a literal processor list.
    pub fn from_processors(
        name: &str,
        processors: Vec<Box<dyn Processor>>,
        night: &str,
        output_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::assemble(RunContext::new(name, night, output_root), processors)
    }

    fn assemble(run: RunContext, processors: Vec<Box<dyn Processor>>) -> Result<Self> {
        let mut steps: Vec<Step> = Vec::with_capacity(processors.len());
        for processor in processors {
            tracing::debug!("Initialising '{}' processor", processor.name());
            let mut step = Step::new(processor);
            step.set_preceding_steps(&steps);
            step.check_prerequisites()?;
            steps.push(step);
        }

        Ok(Self {
            run,
            steps,
            catch_all_errors: false,
            error_summary: None,
        })
    }

    pub fn with_catch_all_errors(mut self, catch_all_errors: bool) -> Self {
        self.catch_all_errors = catch_all_errors;
        self
    }

    pub fn run_context(&self) -> &RunContext {
        &self.run
    }

    pub fn name(&self) -> &str {
        &self.run.pipeline_name
    }

    pub fn night_sub_dir(&self) -> PathBuf {
        self.run.night_sub_dir()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn processor_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    pub fn catch_all_errors(&self) -> bool {
        self.catch_all_errors
    }

    /// Absolute summary path from the definition, if one was configured.
    pub fn error_summary_path(&self) -> Option<PathBuf> {
        self.error_summary
            .as_ref()
            .map(|path| self.run.night_dir().join(path))
    }

    /// Runs with the error settings taken from the definition.
    pub fn run(&mut self, batches: BatchList) -> std::result::Result<Reduction, RunAborted> {
        let summary_path = self.error_summary_path();
        self.reduce(batches, summary_path.as_deref(), self.catch_all_errors)
    }

    /// Threads `batches` through every step in order.
    ///
    /// Without `catch_all_errors` the first failing step ends the run. The
    /// error stack is summarised in both cases.
    pub fn reduce(
        &mut self,
        batches: BatchList,
        error_summary_path: Option<&Path>,
        catch_all_errors: bool,
    ) -> std::result::Result<Reduction, RunAborted> {
        let policy = ErrorPolicy::from_catch_all(catch_all_errors);
        let step_count = self.steps.len();
        let mut batches = batches;
        let mut error_stack = ErrorStack::new();

        tracing::info!(
            "Running '{}' for night {} with {} steps ({})",
            self.run.pipeline_name,
            self.run.night,
            step_count,
            policy
        );

        for idx in 0..step_count {
            let (preceding, rest) = self.steps.split_at_mut(idx);
            let step = &mut rest[0];
            tracing::debug!(
                "Applying '{}' processor to {} batches (Step {}/{})",
                step.name(),
                batches.len(),
                idx + 1,
                step_count
            );

            let output = step.base_apply(batches, preceding, &self.run, policy);
            batches = output.batches;
            let failed = !output.errors.is_empty();
            error_stack += output.errors;

            if failed && policy == ErrorPolicy::FailFast {
                summarise(&error_stack, error_summary_path);
                return Err(RunAborted {
                    batches,
                    error_stack,
                });
            }
        }

        tracing::info!(
            "Reduction produced {} batches with {} frames",
            batches.len(),
            total_frames(&batches)
        );
        summarise(&error_stack, error_summary_path);

        Ok(Reduction {
            batches,
            error_stack,
        })
    }
}

fn summarise(error_stack: &ErrorStack, output_path: Option<&Path>) {
    if let Err(e) = error_stack.summarise(output_path) {
        tracing::error!("Failed to write error summary: {}", e);
    }
}
