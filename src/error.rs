//! Error types for Stepflow.
//!
//! All errors in Stepflow are represented by the `StepflowError` enum,
//! which provides specific variants for different error categories.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Stepflow operations.
///
/// Graph normalization never produces an error; the variants below cover
/// configuration problems that must be reported before a run starts and
/// failures raised while a run is in progress.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum StepflowError {
    /// Engine-level errors (startup, shutdown, configuration).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML).
    #[error("{0}")]
    Convert(String),

    /// Graph description errors.
    #[error("{0}")]
    Graph(String),

    /// Malformed loop regions: unmatched start/end, overlapping regions, bad mode.
    #[error("loop configuration error: {0}")]
    Loop(String),

    /// Node definition errors.
    #[error("{0}")]
    Node(String),

    /// Errors reported by the external node executor.
    #[error("{0}")]
    Executor(String),

    /// Errors reported by the node run recorder.
    #[error("{0}")]
    Recorder(String),

    /// Run lifecycle errors.
    #[error("{0}")]
    Run(String),

    /// The run was canceled before the operation could complete.
    #[error("canceled")]
    Canceled,

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),
}

impl From<StepflowError> for String {
    fn from(val: StepflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for StepflowError {
    fn from(error: std::io::Error) -> Self {
        StepflowError::IoError(error.to_string())
    }
}

impl From<StepflowError> for std::io::Error {
    fn from(val: StepflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for StepflowError {
    fn from(_: FromUtf8Error) -> Self {
        StepflowError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for StepflowError {
    fn from(error: serde_json::Error) -> Self {
        StepflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for StepflowError {
    fn from(error: toml::de::Error) -> Self {
        StepflowError::Config(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for StepflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        StepflowError::Node(error.to_string())
    }
}
