//! Type-safe wrappers and core types for the forest index.
//!
//! Item and node identifiers are dense integers, so unlike symbol ids they
//! may be zero. All identifiers serialize as little-endian `u32`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a stored item vector.
///
/// Ids are dense slot numbers: the store holds `max id + 1` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u32);

impl ItemId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the id as a slot index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Creates from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

impl From<u32> for ItemId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a node record in node storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Shifts the id by `offset`, used when a tree's private node range is
    /// appended to shared storage.
    #[must_use]
    pub const fn rebase(&self, offset: u32) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions to prevent
/// dimension mismatches during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero or does not fit the
    /// file format's `u32` field.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        if u32::try_from(dim).is_err() {
            return Err(VectorError::InvalidDimension {
                dimension: dim,
                reason: "Vector dimension must fit in 32 bits",
            });
        }
        Ok(Self(dim))
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distance metric selected at index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// `sqrt(2 - 2 cos)` between the two vectors.
    #[default]
    Angular,
    /// Standard L2 distance.
    Euclidean,
}

impl MetricKind {
    /// Tag byte written to the file header.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Angular => 0,
            Self::Euclidean => 1,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Angular),
            1 => Some(Self::Euclidean),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Angular => "angular",
            Self::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "angular" | "cosine" => Ok(Self::Angular),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            other => Err(format!(
                "unknown metric '{other}' (expected 'angular' or 'euclidean')"
            )),
        }
    }
}

/// Errors that can occur during index operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors match the dimension the index was created with"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error(
        "Item {item} is out of range (index holds {count} items)\nSuggestion: Query ids between 0 and get_n_items() - 1"
    )]
    OutOfRange { item: u64, count: u64 },

    #[error("Cannot build an empty index\nSuggestion: Add at least one item before calling build")]
    EmptyIndex,

    #[error(
        "Index is already built\nSuggestion: Call unbuild() before adding items or building again"
    )]
    AlreadyBuilt,

    #[error(
        "Cannot {operation} while the index is {state}\nSuggestion: Build the index or load it from disk first"
    )]
    NotBuilt {
        operation: &'static str,
        state: &'static str,
    },

    #[error(
        "Index file '{path}' is corrupt: {reason}\nSuggestion: Rebuild the index and save it again"
    )]
    CorruptFile { path: PathBuf, reason: String },

    #[error("IO error on '{path}': {source}\nSuggestion: Check disk space and file permissions")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl VectorError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidDimension { .. } => "INVALID_DIMENSION",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::EmptyIndex => "EMPTY_INDEX",
            Self::AlreadyBuilt => "ALREADY_BUILT",
            Self::NotBuilt { .. } => "NOT_BUILT",
            Self::CorruptFile { .. } => "CORRUPT_FILE",
            Self::Io { .. } => "IO_ERROR",
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type VectorResult<T> = Result<T, VectorError>;
