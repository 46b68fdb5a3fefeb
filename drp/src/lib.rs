//! DRP - batch-oriented reduction pipeline engine for astronomical detector data.
//!
//! A pipeline is an ordered list of processors that transform a list of
//! batches of (image, metadata) frames:
//! - Loading raw frames for a night
//! - Selecting and regrouping frames by metadata
//! - Calibration against cached master frames built from history (darks, flats)
//! - Saving and exporting results
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use drp::{Pipeline, PipelineDefinition, ProcessorRegistry};
//!
//! let definition = PipelineDefinition::from_file("winter.yaml".as_ref())?;
//! let registry = ProcessorRegistry::with_builtins();
//! let mut pipeline = Pipeline::new(&definition, None, "20230601", &registry)?;
//!
//! let reduction = pipeline.run(vec![drp::Batch::empty()])?;
//! println!("{} errors", reduction.error_stack.len());
//! ```

pub mod batch;
pub mod calibration;
pub mod error;
pub mod error_stack;
pub mod image;
pub mod io;
pub(crate) mod math;
pub mod metadata;
pub mod pipeline;
pub mod processor;
pub mod processors;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Data model
// ============================================================================

pub use batch::{total_frames, Batch, BatchList, Frame};
pub use image::{Image, ImageDimensions};
pub use metadata::{Metadata, Value, CORE_FIELDS};

// ============================================================================
// Errors
// ============================================================================

pub use error::{Error, Result};
pub use error_stack::{ErrorReport, ErrorStack, ErrorSummary};

// ============================================================================
// Processors and pipelines
// ============================================================================

pub use pipeline::{Pipeline, PipelineDefinition, Reduction, RunAborted, StepDefinition};
pub use processor::{
    Capability, ErrorPolicy, Processor, RunContext, Step, StepContext, StepOutput,
};
pub use registry::{BuildContext, ProcessorRegistry};

// ============================================================================
// Calibration
// ============================================================================

pub use calibration::{
    median_combine, CacheCalibrator, CalibrationKind, CandidateSelector, DarkCalibrator,
    DarkKind, FlatCalibrator, FlatKind,
};

// ============================================================================
// I/O
// ============================================================================

pub use io::{BinFrameCodec, DirectoryHistory, FrameCodec, HistoryEntry, HistorySource};
