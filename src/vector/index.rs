//! The forest index: the consumer-facing API over storage, build and search.
//!
//! # State Machine
//!
//! ```text
//! Empty --add_item--> Loaded --build--> Built
//!   |                   ^                 |
//!   |                   +----unbuild------+
//!   +--load/open--> Restored
//! ```
//!
//! `unload` returns any state to `Empty`. Items can only be added while
//! `Empty` or `Loaded`; queries and `save` need `Built` or `Restored`.

use std::fmt;
use std::path::Path;

use crate::vector::builder::{Forest, build_forest};
use crate::vector::metric::{Angular, Euclidean};
use crate::vector::node::NodeSource;
use crate::vector::random::DEFAULT_SEED;
use crate::vector::search::SearchEngine;
use crate::vector::storage::{self, MappedIndex, NodeRecords};
use crate::vector::store::{ItemStore, VectorSource};
use crate::vector::types::{
    ItemId, MetricKind, NodeId, VectorDimension, VectorError, VectorResult,
};

/// Trees built per doubling of the item count when no count is given.
const TREES_PER_LOG2: usize = 2;

/// Lifecycle state of an [`AnnIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Empty,
    Loaded,
    Built,
    Restored,
}

impl IndexState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Loaded => "loaded but not built",
            Self::Built => "built",
            Self::Restored => "restored",
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How [`AnnIndex::load`] restores a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Copy the file into heap storage.
    Heap,
    /// Serve vectors and nodes from a read-only memory map.
    #[default]
    Mapped,
}

/// Construction options beyond dimension and metric.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    pub metric: MetricKind,
    /// Seed for split selection; equal seeds give identical forests.
    pub seed: u64,
    /// Threads used by `build`: 1 builds inline, 0 lets rayon decide.
    pub build_threads: usize,
    /// Emit diagnostic events while building, loading and saving.
    pub verbose: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            metric: MetricKind::default(),
            seed: DEFAULT_SEED,
            build_threads: 0,
            verbose: false,
        }
    }
}

/// Query results, nearest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Neighbors {
    pub items: Vec<ItemId>,
    /// Present when distances were requested; parallel to `items`.
    pub distances: Option<Vec<f32>>,
}

impl Neighbors {
    fn from_scored(scored: Vec<(ItemId, f32)>, include_distances: bool) -> Self {
        if include_distances {
            let (items, distances) = scored.into_iter().unzip();
            Self {
                items,
                distances: Some(distances),
            }
        } else {
            Self {
                items: scored.into_iter().map(|(item, _)| item).collect(),
                distances: None,
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item ids as plain integers.
    #[must_use]
    pub fn ids(&self) -> Vec<u32> {
        self.items.iter().map(ItemId::get).collect()
    }
}

/// Storage behind the index in each state.
#[derive(Debug, Default)]
enum IndexData {
    #[default]
    Empty,
    Loaded {
        items: ItemStore,
    },
    Built {
        items: ItemStore,
        forest: Forest,
    },
    RestoredHeap {
        items: ItemStore,
        forest: Forest,
    },
    RestoredMapped(MappedIndex),
}

/// Approximate nearest-neighbor index over a forest of hyperplane trees.
///
/// # Example
/// ```no_run
/// use annforest::{AnnIndex, MetricKind};
///
/// let mut index = AnnIndex::new(2, MetricKind::Euclidean).unwrap();
/// index.add_item(0, &[0.0, 0.0]).unwrap();
/// index.add_item(1, &[1.0, 0.0]).unwrap();
/// index.build(0).unwrap();
///
/// let nearest = index.get_nns_by_vector(&[0.1, 0.0], 1, None, false).unwrap();
/// assert_eq!(nearest.ids(), vec![0]);
/// ```
#[derive(Debug)]
pub struct AnnIndex {
    dimension: VectorDimension,
    options: IndexOptions,
    data: IndexData,
}

impl AnnIndex {
    /// Creates an empty index for vectors of `dimension` components.
    pub fn new(dimension: usize, metric: MetricKind) -> VectorResult<Self> {
        Self::with_options(
            dimension,
            IndexOptions {
                metric,
                ..IndexOptions::default()
            },
        )
    }

    pub fn with_options(dimension: usize, options: IndexOptions) -> VectorResult<Self> {
        Ok(Self {
            dimension: VectorDimension::new(dimension)?,
            options,
            data: IndexData::Empty,
        })
    }

    /// Restores an index from `path`, taking dimension and metric from the
    /// file header.
    pub fn open(path: impl AsRef<Path>, mode: LoadMode) -> VectorResult<Self> {
        let header = storage::read_header(path.as_ref())?;
        let mut index = Self::new(header.dimension.get(), header.metric)?;
        index.load(path, mode)?;
        Ok(index)
    }

    #[must_use]
    pub fn state(&self) -> IndexState {
        match self.data {
            IndexData::Empty => IndexState::Empty,
            IndexData::Loaded { .. } => IndexState::Loaded,
            IndexData::Built { .. } => IndexState::Built,
            IndexData::RestoredHeap { .. } | IndexData::RestoredMapped(_) => IndexState::Restored,
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension.get()
    }

    #[must_use]
    pub fn metric(&self) -> MetricKind {
        self.options.metric
    }

    /// Toggles the diagnostic event stream. Has no effect on results.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.options.verbose = verbose;
    }

    /// Sets the build seed. Only valid before `build`.
    pub fn set_seed(&mut self, seed: u64) -> VectorResult<()> {
        self.ensure_mutable()?;
        self.options.seed = seed;
        Ok(())
    }

    /// Sets the number of build threads (1 inline, 0 automatic).
    pub fn set_build_threads(&mut self, threads: usize) {
        self.options.build_threads = threads;
    }

    /// Stores a copy of `vector` under `id`.
    pub fn add_item(&mut self, id: u32, vector: &[f32]) -> VectorResult<()> {
        self.ensure_mutable()?;
        self.dimension.validate_vector(vector)?;

        if matches!(self.data, IndexData::Empty) {
            self.data = IndexData::Loaded {
                items: ItemStore::new(self.dimension),
            };
        }
        match &mut self.data {
            IndexData::Loaded { items } => items.add(ItemId::new(id), vector),
            _ => Err(VectorError::AlreadyBuilt),
        }
    }

    /// Builds `n_trees` trees; 0 picks a count from the item count.
    ///
    /// On failure the index keeps its previous state.
    pub fn build(&mut self, n_trees: usize) -> VectorResult<()> {
        match std::mem::take(&mut self.data) {
            IndexData::Loaded { items } => {
                let n_trees = if n_trees == 0 {
                    default_tree_count(items.count())
                } else {
                    n_trees
                };
                diag!(
                    self.options.verbose,
                    "Building {} {} trees over {} items",
                    n_trees,
                    self.options.metric,
                    items.count()
                );

                match self.build_forest(&items, n_trees) {
                    Ok(forest) => {
                        self.data = IndexData::Built { items, forest };
                        Ok(())
                    }
                    Err(e) => {
                        self.data = IndexData::Loaded { items };
                        Err(e)
                    }
                }
            }
            IndexData::Empty => Err(VectorError::EmptyIndex),
            other => {
                self.data = other;
                Err(VectorError::AlreadyBuilt)
            }
        }
    }

    /// Drops the forest of a built index so more items can be added.
    pub fn unbuild(&mut self) -> VectorResult<()> {
        match std::mem::take(&mut self.data) {
            IndexData::Built { items, .. } => {
                self.data = IndexData::Loaded { items };
                Ok(())
            }
            restored @ (IndexData::RestoredHeap { .. } | IndexData::RestoredMapped(_)) => {
                self.data = restored;
                Err(VectorError::AlreadyBuilt)
            }
            other => {
                self.data = other;
                Ok(())
            }
        }
    }

    /// Writes the built index to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> VectorResult<()> {
        let path = path.as_ref();
        let metric = self.options.metric;
        match &self.data {
            IndexData::Built { items, forest } | IndexData::RestoredHeap { items, forest } => {
                storage::save_index(
                    path,
                    metric,
                    self.dimension,
                    items.as_flat(),
                    NodeRecords::Arena(&forest.nodes),
                    &forest.roots,
                )?;
            }
            IndexData::RestoredMapped(mapped) => {
                storage::save_index(
                    path,
                    metric,
                    self.dimension,
                    mapped.item_table(),
                    NodeRecords::Encoded(mapped.node_bytes()),
                    &mapped.header().roots,
                )?;
            }
            IndexData::Empty | IndexData::Loaded { .. } => {
                return Err(self.not_built("save"));
            }
        }
        diag!(
            self.options.verbose,
            "Saved {} items and {} nodes to {}",
            self.get_n_items(),
            self.n_nodes(),
            path.display()
        );
        Ok(())
    }

    /// Replaces the index contents with the file at `path`.
    ///
    /// The file must match this index's dimension and metric. If loading
    /// fails the index keeps its previous contents.
    pub fn load(&mut self, path: impl AsRef<Path>, mode: LoadMode) -> VectorResult<()> {
        let path = path.as_ref();
        let data = match mode {
            LoadMode::Mapped if cfg!(target_endian = "little") => {
                let mapped = MappedIndex::open(path)?;
                self.check_header(mapped.header(), path)?;
                diag!(
                    self.options.verbose,
                    "Mapped {} bytes of {}",
                    mapped.mapped_len(),
                    mapped.path().display()
                );
                IndexData::RestoredMapped(mapped)
            }
            LoadMode::Mapped | LoadMode::Heap => {
                if mode == LoadMode::Mapped {
                    tracing::warn!("In-place mapping needs a little-endian host, copying instead");
                }
                let heap = storage::load_heap(path)?;
                self.check_header(&heap.header, path)?;
                IndexData::RestoredHeap {
                    items: heap.items,
                    forest: Forest {
                        nodes: heap.nodes,
                        roots: heap.header.roots,
                    },
                }
            }
        };

        self.data = data;
        diag!(
            self.options.verbose,
            "Loaded {} items, {} nodes and {} trees from {}",
            self.get_n_items(),
            self.n_nodes(),
            self.n_trees(),
            path.display()
        );
        Ok(())
    }

    /// Releases all storage, including any memory map, and returns to `Empty`.
    pub fn unload(&mut self) {
        self.data = IndexData::Empty;
        diag!(self.options.verbose, "Unloaded index");
    }

    /// Number of item slots (max id + 1).
    #[must_use]
    pub fn get_n_items(&self) -> u64 {
        self.vectors().map_or(0, |v| v.item_count() as u64)
    }

    /// Number of trees in the forest, 0 before build.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.roots().len()
    }

    /// Number of node records in the forest, 0 before build.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        match &self.data {
            IndexData::Built { forest, .. } | IndexData::RestoredHeap { forest, .. } => {
                forest.nodes.len()
            }
            IndexData::RestoredMapped(mapped) => mapped.node_count(),
            IndexData::Empty | IndexData::Loaded { .. } => 0,
        }
    }

    /// Copy of the vector stored under `item`.
    pub fn get_item_vector(&self, item: u32) -> VectorResult<Vec<f32>> {
        self.item_vector(ItemId::new(item)).map(<[f32]>::to_vec)
    }

    /// Metric distance between two stored items.
    pub fn get_distance(&self, i: u32, j: u32) -> VectorResult<f32> {
        let a = self.item_vector(ItemId::new(i))?;
        let b = self.item_vector(ItemId::new(j))?;
        Ok(self.options.metric.distance(a, b))
    }

    /// Up to `n` items closest to stored item `item`, excluding `item` itself.
    ///
    /// `search_k` caps the number of distinct candidates examined; `None`
    /// uses `n * n_trees`.
    pub fn get_nns_by_item(
        &self,
        item: u32,
        n: usize,
        search_k: Option<usize>,
        include_distances: bool,
    ) -> VectorResult<Neighbors> {
        self.ensure_queryable("query by item")?;
        let item = ItemId::new(item);
        let query = self.item_vector(item)?;
        let scored = self.search(query, n, search_k, Some(item))?;
        Ok(Neighbors::from_scored(scored, include_distances))
    }

    /// Up to `n` items closest to `vector`.
    pub fn get_nns_by_vector(
        &self,
        vector: &[f32],
        n: usize,
        search_k: Option<usize>,
        include_distances: bool,
    ) -> VectorResult<Neighbors> {
        self.ensure_queryable("query by vector")?;
        self.dimension.validate_vector(vector)?;
        let scored = self.search(vector, n, search_k, None)?;
        Ok(Neighbors::from_scored(scored, include_distances))
    }

    fn search(
        &self,
        query: &[f32],
        n: usize,
        search_k: Option<usize>,
        exclude: Option<ItemId>,
    ) -> VectorResult<Vec<(ItemId, f32)>> {
        let search_k = search_k.unwrap_or_else(|| n.saturating_mul(self.n_trees()));
        match &self.data {
            IndexData::Built { items, forest } | IndexData::RestoredHeap { items, forest } => {
                Ok(self.search_in(items, &forest.nodes, &forest.roots, query, n, search_k, exclude))
            }
            IndexData::RestoredMapped(mapped) => Ok(self.search_in(
                mapped,
                mapped,
                &mapped.header().roots,
                query,
                n,
                search_k,
                exclude,
            )),
            IndexData::Empty | IndexData::Loaded { .. } => Err(self.not_built("query")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn search_in<V: VectorSource, N: NodeSource>(
        &self,
        vectors: &V,
        nodes: &N,
        roots: &[NodeId],
        query: &[f32],
        n: usize,
        search_k: usize,
        exclude: Option<ItemId>,
    ) -> Vec<(ItemId, f32)> {
        match self.options.metric {
            MetricKind::Angular => SearchEngine::<Angular, _, _>::new(vectors, nodes, roots)
                .search(query, n, search_k, exclude),
            MetricKind::Euclidean => SearchEngine::<Euclidean, _, _>::new(vectors, nodes, roots)
                .search(query, n, search_k, exclude),
        }
    }

    fn build_forest(&self, items: &ItemStore, n_trees: usize) -> VectorResult<Forest> {
        let IndexOptions {
            metric,
            seed,
            build_threads,
            verbose,
        } = self.options;
        match metric {
            MetricKind::Angular => {
                build_forest::<Angular, _>(items, n_trees, seed, build_threads, verbose)
            }
            MetricKind::Euclidean => {
                build_forest::<Euclidean, _>(items, n_trees, seed, build_threads, verbose)
            }
        }
    }

    fn vectors(&self) -> Option<&dyn VectorSource> {
        match &self.data {
            IndexData::Empty => None,
            IndexData::Loaded { items }
            | IndexData::Built { items, .. }
            | IndexData::RestoredHeap { items, .. } => Some(items),
            IndexData::RestoredMapped(mapped) => Some(mapped),
        }
    }

    fn roots(&self) -> &[NodeId] {
        match &self.data {
            IndexData::Built { forest, .. } | IndexData::RestoredHeap { forest, .. } => {
                &forest.roots
            }
            IndexData::RestoredMapped(mapped) => &mapped.header().roots,
            IndexData::Empty | IndexData::Loaded { .. } => &[],
        }
    }

    fn item_vector(&self, item: ItemId) -> VectorResult<&[f32]> {
        self.vectors()
            .and_then(|v| v.vector(item))
            .ok_or(VectorError::OutOfRange {
                item: u64::from(item.get()),
                count: self.get_n_items(),
            })
    }

    fn ensure_mutable(&self) -> VectorResult<()> {
        match self.state() {
            IndexState::Empty | IndexState::Loaded => Ok(()),
            IndexState::Built | IndexState::Restored => Err(VectorError::AlreadyBuilt),
        }
    }

    fn ensure_queryable(&self, operation: &'static str) -> VectorResult<()> {
        match self.state() {
            IndexState::Built | IndexState::Restored => Ok(()),
            IndexState::Empty | IndexState::Loaded => Err(self.not_built(operation)),
        }
    }

    fn not_built(&self, operation: &'static str) -> VectorError {
        VectorError::NotBuilt {
            operation,
            state: self.state().as_str(),
        }
    }

    fn check_header(&self, header: &storage::IndexHeader, path: &Path) -> VectorResult<()> {
        if header.dimension != self.dimension {
            return Err(VectorError::corrupt(
                path,
                format!(
                    "file holds {}-dimensional vectors, index expects {}",
                    header.dimension, self.dimension
                ),
            ));
        }
        if header.metric != self.options.metric {
            return Err(VectorError::corrupt(
                path,
                format!(
                    "file uses the {} metric, index expects {}",
                    header.metric, self.options.metric
                ),
            ));
        }
        Ok(())
    }
}

/// Tree count used when `build(0)` is called: grows with `log2(items)`.
#[must_use]
pub fn default_tree_count(item_count: usize) -> usize {
    let log2 = (item_count.max(2) as f64).log2().ceil() as usize;
    log2 * TREES_PER_LOG2
}
