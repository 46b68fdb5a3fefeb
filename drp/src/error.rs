//! Error types for pipeline construction and processing.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::processor::Capability;

/// Errors raised while building or running a reduction pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Processor '{processor}' requires {missing:?}, which no preceding step provides")]
    Configuration {
        processor: String,
        missing: Vec<Capability>,
    },

    #[error("Processor type '{0}' is already registered. Processor type ids must be unique")]
    DuplicateRegistration(String),

    #[error("Unknown processor type '{0}'")]
    UnknownProcessor(String),

    #[error("Unknown pipeline configuration '{0}'")]
    UnknownConfiguration(String),

    #[error("Invalid pipeline definition: {0:#}")]
    InvalidDefinition(#[source] anyhow::Error),

    #[error("Invalid parameters for processor type '{processor}': {source}")]
    InvalidParameters {
        processor: String,
        #[source]
        source: serde_yml::Error,
    },

    #[error("Essential key '{field}' not found in metadata. Available fields are: {available:?}")]
    MissingField {
        field: String,
        available: Vec<String>,
    },

    #[error("No '{category}' candidates found to build cache artifact '{path}'")]
    CacheMiss { category: String, path: PathBuf },

    #[error("Failed to build cache artifact '{path}': {reason}")]
    CacheBuild { path: PathBuf, reason: String },

    #[error("Batch has {images} images but {metadata} metadata records")]
    LengthMismatch { images: usize, metadata: usize },

    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode or encode frame '{path}': {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Processing(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Taxonomy name used in error summaries.
    pub fn type_name(&self) -> &'static str {
        match self {
            Error::Configuration { .. }
            | Error::DuplicateRegistration(_)
            | Error::UnknownProcessor(_)
            | Error::UnknownConfiguration(_)
            | Error::InvalidDefinition(_)
            | Error::InvalidParameters { .. } => "ConfigurationError",
            Error::MissingField { .. } => "MissingFieldError",
            Error::CacheMiss { .. } => "CacheMissError",
            Error::Io { .. } | Error::Codec { .. } => "IoError",
            Error::CacheBuild { .. } | Error::LengthMismatch { .. } | Error::Processing(_) => {
                "ProcessingError"
            }
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn codec(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        Error::Codec {
            path: path.into(),
            source,
        }
    }
}
