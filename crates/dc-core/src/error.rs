//! Error types for dcharvest

use std::path::PathBuf;

use thiserror::Error;

/// dcharvest error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific file
    #[error("I/O error at {}: {source}", path.display())]
    IoPath {
        /// File or directory being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or contradictory configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required template was not found by the shape extractor
    #[error("Missing shape: {0}")]
    MissingShape(String),

    /// Requested bin edges do not align with the existing binning
    #[error("Incompatible binning: {0}")]
    IncompatibleBinning(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Failure inside a named pipeline stage
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        /// Pipeline stage name.
        stage: &'static str,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach an I/O error to the path it concerns.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoPath { path: path.into(), source }
    }

    /// Wrap this error with the pipeline stage that raised it.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            // Keep the innermost stage: it is the one that actually failed.
            e @ Error::Stage { .. } => e,
            e => Error::Stage { stage, source: Box::new(e) },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
