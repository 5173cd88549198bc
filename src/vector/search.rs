//! Approximate k-nearest-neighbor search over a forest.
//!
//! # Algorithm
//! 1. Seed a max-priority queue with every tree root at priority +inf
//! 2. Pop the best node: leaves contribute their items to the candidate set,
//!    splits push both children with `min(parent, signed margin)` priority
//! 3. Stop once `search_k` distinct candidates are collected or the queue
//!    runs dry
//! 4. Rank candidates by exact distance and keep the best `k`
//!
//! The far side of a split is penalized but never dropped, which is what
//! lets a larger `search_k` recover neighbors the first descent missed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::marker::PhantomData;

use crate::vector::metric::Metric;
use crate::vector::node::{NodeRef, NodeSource};
use crate::vector::store::VectorSource;
use crate::vector::types::{ItemId, NodeId};

/// Queue entry: a node to explore and how promising it is.
#[derive(Debug, Clone, Copy)]
struct Pending {
    priority: f32,
    node: NodeId,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower node ids win ties so the walk order is fully deterministic
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Read-only search over a built or restored forest.
pub struct SearchEngine<'a, M, V, N> {
    vectors: &'a V,
    nodes: &'a N,
    roots: &'a [NodeId],
    _metric: PhantomData<M>,
}

impl<'a, M, V, N> SearchEngine<'a, M, V, N>
where
    M: Metric,
    V: VectorSource,
    N: NodeSource,
{
    #[must_use]
    pub fn new(vectors: &'a V, nodes: &'a N, roots: &'a [NodeId]) -> Self {
        Self {
            vectors,
            nodes,
            roots,
            _metric: PhantomData,
        }
    }

    /// Returns up to `k` `(item, distance)` pairs closest to `query`, nearest
    /// first, with distances in the metric's public unit.
    ///
    /// `exclude` is never collected as a candidate and does not count
    /// towards `search_k`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        search_k: usize,
        exclude: Option<ItemId>,
    ) -> Vec<(ItemId, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let candidates = self.collect_candidates(query, search_k, exclude);
        self.rank(query, candidates, k)
    }

    /// Walks the forest best-first and gathers distinct candidate items.
    fn collect_candidates(
        &self,
        query: &[f32],
        search_k: usize,
        exclude: Option<ItemId>,
    ) -> Vec<ItemId> {
        let mut queue: BinaryHeap<Pending> = self
            .roots
            .iter()
            .map(|&node| Pending {
                priority: f32::INFINITY,
                node,
            })
            .collect();
        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut candidates = Vec::new();

        while candidates.len() < search_k {
            let Some(Pending { priority, node }) = queue.pop() else {
                break;
            };
            match self.nodes.node(node) {
                Some(NodeRef::Leaf(items)) => {
                    for item in items.iter() {
                        if Some(item) != exclude && seen.insert(item) {
                            candidates.push(item);
                        }
                    }
                }
                Some(NodeRef::Split {
                    children,
                    bias,
                    normal,
                }) => {
                    let margin = M::margin(normal, bias, query);
                    for (child, &id) in children.iter().enumerate() {
                        queue.push(Pending {
                            priority: M::child_priority(priority, margin, child),
                            node: id,
                        });
                    }
                }
                None => {}
            }
        }
        candidates
    }

    /// Scores candidates by exact distance and keeps the best `k`.
    fn rank(&self, query: &[f32], candidates: Vec<ItemId>, k: usize) -> Vec<(ItemId, f32)> {
        let mut scored: Vec<(ItemId, f32)> = candidates
            .into_iter()
            .filter_map(|item| {
                self.vectors
                    .vector(item)
                    .map(|v| (item, M::distance(query, v)))
            })
            .collect();

        let by_distance =
            |a: &(ItemId, f32), b: &(ItemId, f32)| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0));
        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        scored
            .into_iter()
            .map(|(item, raw)| (item, M::normalized_distance(raw)))
            .collect()
    }
}

/// Exhaustive k-nearest-neighbor scan, the exact answer the forest
/// approximates.
pub fn brute_force<M: Metric, V: VectorSource>(
    vectors: &V,
    query: &[f32],
    k: usize,
    exclude: Option<ItemId>,
) -> Vec<(ItemId, f32)> {
    let mut scored: Vec<(ItemId, f32)> = (0..vectors.item_count() as u32)
        .map(ItemId::new)
        .filter(|item| Some(*item) != exclude)
        .filter_map(|item| vectors.vector(item).map(|v| (item, M::distance(query, v))))
        .collect();
    scored.sort_unstable_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
        .into_iter()
        .map(|(item, raw)| (item, M::normalized_distance(raw)))
        .collect()
}
