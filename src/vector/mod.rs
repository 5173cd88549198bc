//! Approximate nearest-neighbor search over a forest of random hyperplane
//! trees.
//!
//! # Architecture
//! Items are stored densely by id ([`ItemStore`]). `build` grows a forest of
//! binary trees; each split node holds a hyperplane chosen by the [`Metric`]
//! and each leaf holds a small bucket of item ids. Queries walk all trees
//! best-first through a shared priority queue, collect candidates until the
//! search budget is spent and rank them by exact distance.
//!
//! A built forest is written as one flat file (header, item table, node
//! records) that can be copied back into memory or mapped read-only.
//!
//! # Example
//! ```no_run
//! use annforest::vector::{AnnIndex, LoadMode, MetricKind};
//!
//! let mut index = AnnIndex::new(3, MetricKind::Angular)?;
//! index.add_item(0, &[1.0, 0.0, 0.0])?;
//! index.add_item(1, &[0.0, 1.0, 0.0])?;
//! index.build(10)?;
//! index.save("items.ann")?;
//!
//! let restored = AnnIndex::open("items.ann", LoadMode::Mapped)?;
//! let hits = restored.get_nns_by_item(0, 1, None, true)?;
//! assert_eq!(hits.ids(), vec![1]);
//! # Ok::<(), annforest::vector::VectorError>(())
//! ```

mod builder;
mod index;
mod metric;
mod node;
mod random;
mod search;
mod storage;
mod store;
mod types;

pub use builder::{BuiltTree, Forest, TreeBuilder, build_forest};
pub use index::{AnnIndex, IndexOptions, IndexState, LoadMode, Neighbors, default_tree_count};
pub use metric::{Angular, Euclidean, Metric};
pub use node::{Node, NodeArena, NodeRef, NodeSource, SplitPlane, leaf_capacity, record_size};
pub use random::{DEFAULT_SEED, RandomSource, SeededRandom};
pub use search::{SearchEngine, brute_force};
pub use storage::{
    HEADER_SIZE, HeapIndex, IndexHeader, MappedIndex, NodeRecords, STORAGE_VERSION, load_heap,
    read_header, save_index,
};
pub use store::{ItemStore, VectorSource};
pub use types::{ItemId, MetricKind, NodeId, VectorDimension, VectorError, VectorResult};
