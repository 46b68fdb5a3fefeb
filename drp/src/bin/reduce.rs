//! Runs one configuration of a pipeline definition for one night.
//!
//! Usage:
//!   reduce --config pipelines/winter.yaml --night 20230601
//!   reduce --config pipelines/winter.yaml --night 20230601 --configuration log_only --catch-all-errors

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use drp::{Batch, Pipeline, PipelineDefinition, ProcessorRegistry};

/// Reduce one night of detector data.
#[derive(Parser)]
#[command(name = "reduce", version)]
struct Args {
    /// Pipeline definition file (YAML or JSON).
    #[arg(long, env = "DRP_CONFIG")]
    config: PathBuf,

    /// Night identifier, e.g. 20230601.
    #[arg(long)]
    night: String,

    /// Named configuration inside the definition. Defaults to "default".
    #[arg(long)]
    configuration: Option<String>,

    /// Keep going after failures and report them all at the end.
    /// Overrides `catch_all_errors` from the definition when set.
    #[arg(long)]
    catch_all_errors: bool,

    /// Base log level; RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn run(args: Args) -> anyhow::Result<bool> {
    let definition = PipelineDefinition::from_file(&args.config)?;
    let registry = ProcessorRegistry::with_builtins();
    let mut pipeline = Pipeline::new(
        &definition,
        args.configuration.as_deref(),
        &args.night,
        &registry,
    )
    .with_context(|| format!("Failed to build pipeline '{}'", definition.name))?;

    let catch_all_errors = args.catch_all_errors || pipeline.catch_all_errors();
    let summary_path = pipeline.error_summary_path();

    match pipeline.reduce(vec![Batch::empty()], summary_path.as_deref(), catch_all_errors) {
        Ok(reduction) => {
            let summary = reduction.error_stack.summary();
            println!(
                "Reduced {} frames in {} batches, {} error(s)",
                drp::total_frames(&reduction.batches),
                reduction.batches.len(),
                summary.total
            );
            for (processor, count) in &summary.by_processor {
                println!("  {processor}: {count}");
            }
            Ok(true)
        }
        Err(aborted) => {
            if let Some(error) = aborted.first_error() {
                eprintln!("Reduction aborted: {error:#}");
            }
            Ok(false)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = common::log_setup::setup_logging(&args.log_level) {
        eprintln!("Failed to set up logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
