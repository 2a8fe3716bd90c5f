//! Exit codes and structured error reports.

use serde::Serialize;

use crate::bootstrap::{MaterializeError, RoutineError};
use crate::chunks::{ChunkError, PipelineError};
use crate::files::FilesError;
use crate::spatial::{CrsError, LayerError};

/// Exit codes of the `geostage` binary.
///
/// - 0: Success
/// - 1: General error (I/O, network, unexpected failure)
/// - 2: A creation routine left its destination missing
/// - 3: Invalid input (missing source, wrong extension, unreadable layer)
/// - 130: Interrupted by Ctrl+C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// An asset was not created.
    CreationFailed = 2,
    /// Input was missing or malformed.
    InvalidInput = 3,
    /// Interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "GS000",
            Self::GeneralError => "GS001",
            Self::CreationFailed => "GS002",
            Self::InvalidInput => "GS003",
            Self::Interrupted => "GS130",
        }
    }

    /// Classify an error by walking its cause chain.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(classify)
            .unwrap_or(Self::GeneralError)
    }
}

/// Wrapper variants marked `transparent` hide the wrapped error from the
/// cause chain, so they are matched here directly.
fn classify(cause: &(dyn std::error::Error + 'static)) -> Option<ExitCode> {
    if let Some(e) = cause.downcast_ref::<MaterializeError>() {
        return match e {
            MaterializeError::Creation(_) => Some(ExitCode::CreationFailed),
            MaterializeError::Files(_) => Some(ExitCode::InvalidInput),
            MaterializeError::Routine { .. } | MaterializeError::HashStore(_) => None,
        };
    }
    if let Some(e) = cause.downcast_ref::<RoutineError>() {
        return classify_routine(e);
    }
    if let Some(e) = cause.downcast_ref::<PipelineError>() {
        return match e {
            PipelineError::Interrupted { .. } => Some(ExitCode::Interrupted),
            PipelineError::Chunk(e) => classify_chunk(e),
            PipelineError::Files(_) => Some(ExitCode::InvalidInput),
            PipelineError::Download(e) => classify_routine(e),
            _ => None,
        };
    }
    if let Some(e) = cause.downcast_ref::<ChunkError>() {
        return classify_chunk(e);
    }
    if let Some(e) = cause.downcast_ref::<LayerError>() {
        return classify_layer(e);
    }
    if cause.is::<FilesError>() || cause.is::<CrsError>() {
        return Some(ExitCode::InvalidInput);
    }
    None
}

fn classify_routine(e: &RoutineError) -> Option<ExitCode> {
    matches!(e, RoutineError::Interrupted(_)).then_some(ExitCode::Interrupted)
}

fn classify_chunk(e: &ChunkError) -> Option<ExitCode> {
    match e {
        ChunkError::Layer(e) => classify_layer(e),
        _ => Some(ExitCode::InvalidInput),
    }
}

fn classify_layer(e: &LayerError) -> Option<ExitCode> {
    (!matches!(e, LayerError::Io { .. })).then_some(ExitCode::InvalidInput)
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "GS001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, causes included
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
