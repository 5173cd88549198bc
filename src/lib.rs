//! Approximate nearest-neighbor index built from random hyperplane trees.

/// Diagnostic event gated by an index's verbose flag.
#[macro_export]
macro_rules! diag {
    ($verbose:expr, $($arg:tt)*) => {
        if $verbose {
            tracing::info!($($arg)*);
        }
    };
}

pub mod config;
pub mod exit_code;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use exit_code::ExitCode;
pub use vector::{
    AnnIndex, IndexOptions, IndexState, ItemId, LoadMode, MetricKind, Neighbors, VectorError,
    VectorResult,
};
