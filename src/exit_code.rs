//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success
//! - `1`: General error
//! - `2`: Blocking error, the index file cannot be trusted
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::vector::VectorError;

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Critical error that should halt automation (code 2)
    BlockingError = 2,

    /// Requested item does not exist (code 3)
    NotFound = 3,

    /// Input vectors do not fit the index (code 4)
    InvalidInput = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Operation not valid in the current index state (code 8)
    UnsupportedOperation = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

impl ExitCode {
    /// Maps a `VectorError` to the exit code scripts can act on.
    pub fn from_error(error: &VectorError) -> Self {
        match error {
            VectorError::OutOfRange { .. } => ExitCode::NotFound,

            VectorError::DimensionMismatch { .. }
            | VectorError::InvalidDimension { .. }
            | VectorError::EmptyIndex => ExitCode::InvalidInput,

            VectorError::Io { .. } => ExitCode::IoError,

            // A corrupt file is never retried
            VectorError::CorruptFile { .. } => ExitCode::BlockingError,

            VectorError::AlreadyBuilt | VectorError::NotBuilt { .. } => {
                ExitCode::UnsupportedOperation
            }
        }
    }

    /// Exit code for a top-level CLI failure.
    ///
    /// Looks through the `anyhow` context chain for a `VectorError`.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<VectorError>())
            .map_or(ExitCode::GeneralError, Self::from_error)
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Get a human-readable description of the exit code.
    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::NotFound => "Not found",
            ExitCode::InvalidInput => "Invalid input",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::UnsupportedOperation => "Unsupported operation",
        }
    }
}
