//! Heap-backed item vector storage.
//!
//! Vectors live in one contiguous `f32` buffer, `dimension` values per slot,
//! so the buffer can be written to disk as the item table without reshaping.

use crate::vector::types::{ItemId, VectorDimension, VectorError, VectorResult};

/// Read access to item vectors, shared by heap and memory-mapped storage.
pub trait VectorSource {
    /// Dimension every stored vector has.
    fn dimension(&self) -> VectorDimension;

    /// Number of logical slots (max id + 1).
    fn item_count(&self) -> usize;

    /// Returns the vector stored in `item`'s slot, or `None` past the end.
    fn vector(&self, item: ItemId) -> Option<&[f32]>;
}

/// Append-only item storage keyed by dense item id.
#[derive(Debug, Clone)]
pub struct ItemStore {
    dimension: VectorDimension,
    data: Vec<f32>,
    count: usize,
}

impl ItemStore {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            data: Vec::new(),
            count: 0,
        }
    }

    /// Rebuilds a store from a flat table read back from disk.
    pub(crate) fn from_flat(dimension: VectorDimension, data: Vec<f32>) -> Self {
        let count = data.len() / dimension.get();
        Self {
            dimension,
            data,
            count,
        }
    }

    /// Copies `vector` into slot `id`, growing the table as needed.
    ///
    /// Slots skipped over by a sparse id stay zero-filled. Re-adding an id
    /// overwrites the previous vector.
    pub fn add(&mut self, id: ItemId, vector: &[f32]) -> VectorResult<()> {
        self.dimension.validate_vector(vector)?;

        let dim = self.dimension.get();
        if id.index() >= self.count {
            self.count = id.index() + 1;
            self.data.resize(self.count * dim, 0.0);
        }

        let start = id.index() * dim;
        self.data[start..start + dim].copy_from_slice(vector);
        Ok(())
    }

    /// Returns a read-only view of the vector in slot `id`.
    pub fn get(&self, id: ItemId) -> VectorResult<&[f32]> {
        self.vector(id).ok_or(VectorError::OutOfRange {
            item: u64::from(id.get()),
            count: self.count as u64,
        })
    }

    /// Number of logical items (max id + 1).
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The whole item table, slot after slot.
    #[must_use]
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }
}

impl VectorSource for ItemStore {
    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn item_count(&self) -> usize {
        self.count
    }

    fn vector(&self, item: ItemId) -> Option<&[f32]> {
        if item.index() >= self.count {
            return None;
        }
        let dim = self.dimension.get();
        let start = item.index() * dim;
        self.data.get(start..start + dim)
    }
}
