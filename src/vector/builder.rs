//! Forest construction by recursive random hyperplane splits.
//!
//! # Algorithm
//! For every tree, the full item set is partitioned top-down:
//! 1. Sets no larger than a leaf record's capacity become leaves
//! 2. Otherwise the metric proposes a hyperplane (up to 3 attempts) and items
//!    are routed by the sign of their margin
//! 3. If no attempt is balanced enough, a random hyperplane through a random
//!    member is tried, and as a last resort the set is cut in half by id
//!
//! Recursion runs on an explicit work stack, so depth is bounded by heap
//! memory rather than the thread stack. Every tree writes into its own node
//! list with private ids; lists are appended to shared storage in tree order,
//! which keeps the output independent of how many threads built it.

use std::marker::PhantomData;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::vector::metric::Metric;
use crate::vector::node::{Node, NodeArena, SplitPlane, leaf_capacity};
use crate::vector::random::{RandomSource, SeededRandom};
use crate::vector::store::VectorSource;
use crate::vector::types::{ItemId, NodeId, VectorError, VectorResult};

/// Hyperplane proposals tried before falling back to a random plane.
const SPLIT_ATTEMPTS: usize = 3;

/// A proposal is accepted when the larger side holds less than this share.
const MAX_IMBALANCE: f64 = 0.95;

/// Acceptance bound for the random-plane fallback.
const MAX_FALLBACK_IMBALANCE: f64 = 0.99;

/// A built forest: node storage plus one root per tree.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    pub nodes: NodeArena,
    pub roots: Vec<NodeId>,
}

/// One tree with node ids local to `nodes`.
#[derive(Debug, Clone)]
pub struct BuiltTree {
    pub nodes: Vec<Node>,
    pub root: NodeId,
}

/// Pending work on the build stack.
enum Frame {
    /// Partition these items into a subtree.
    Build(Vec<ItemId>),
    /// Both children of a split are on the result stack; emit the split.
    Join { plane: SplitPlane, descendants: u32 },
}

/// Builds single trees over a vector source.
pub struct TreeBuilder<'a, M, V> {
    vectors: &'a V,
    leaf_capacity: usize,
    _metric: PhantomData<M>,
}

impl<'a, M: Metric, V: VectorSource> TreeBuilder<'a, M, V> {
    #[must_use]
    pub fn new(vectors: &'a V) -> Self {
        Self {
            vectors,
            leaf_capacity: leaf_capacity(vectors.dimension().get()),
            _metric: PhantomData,
        }
    }

    /// Builds one tree over every item slot.
    pub fn build_tree<R: RandomSource>(&self, rng: &mut R) -> BuiltTree {
        let all: Vec<ItemId> = (0..self.vectors.item_count() as u32)
            .map(ItemId::new)
            .collect();

        let mut nodes = Vec::new();
        let mut results: Vec<NodeId> = Vec::new();
        let mut stack = vec![Frame::Build(all)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Build(items) => {
                    if items.len() <= self.leaf_capacity {
                        results.push(push_node(&mut nodes, Node::Leaf { items }));
                        continue;
                    }
                    let descendants = items.len() as u32;
                    let (plane, left, right) = self.partition(items, rng);
                    stack.push(Frame::Join { plane, descendants });
                    stack.push(Frame::Build(right));
                    stack.push(Frame::Build(left));
                }
                Frame::Join { plane, descendants } => {
                    // Left finished first, so right sits on top
                    let right = results.pop();
                    let left = results.pop();
                    if let (Some(left), Some(right)) = (left, right) {
                        let split = Node::Split {
                            descendants,
                            children: [left, right],
                            plane,
                        };
                        results.push(push_node(&mut nodes, split));
                    }
                }
            }
        }

        let root = results.pop().unwrap_or(NodeId::new(0));
        BuiltTree { nodes, root }
    }

    /// Splits `items` into two non-empty halves.
    fn partition<R: RandomSource>(
        &self,
        items: Vec<ItemId>,
        rng: &mut R,
    ) -> (SplitPlane, Vec<ItemId>, Vec<ItemId>) {
        let members: Vec<(ItemId, &[f32])> = items
            .iter()
            .filter_map(|&id| self.vectors.vector(id).map(|v| (id, v)))
            .collect();
        let vectors: Vec<&[f32]> = members.iter().map(|(_, v)| *v).collect();

        for _ in 0..SPLIT_ATTEMPTS {
            let plane = M::create_split(&vectors, rng);
            let (left, right) = route(&members, &plane, M::margin);
            if imbalance(left.len(), right.len()) < MAX_IMBALANCE {
                return (plane, left, right);
            }
        }

        let plane = M::random_split(&vectors, rng);
        let (left, right) = route(&members, &plane, M::margin);
        if imbalance(left.len(), right.len()) < MAX_FALLBACK_IMBALANCE {
            debug!(
                "Random hyperplane fallback for {} items ({} / {})",
                members.len(),
                left.len(),
                right.len()
            );
            return (plane, left, right);
        }

        // Identical or otherwise inseparable members: halve by id. A zero
        // normal gives every query margin 0, so search visits both halves.
        debug!("Forcing even split of {} inseparable items", items.len());
        let mut sorted = items;
        sorted.sort_unstable();
        let right = sorted.split_off(sorted.len() / 2);
        (
            SplitPlane::degenerate(self.vectors.dimension().get()),
            sorted,
            right,
        )
    }
}

/// Routes members by margin sign. Items exactly on the plane go by id
/// parity: odd ids to child 1.
fn route(
    members: &[(ItemId, &[f32])],
    plane: &SplitPlane,
    margin: fn(&[f32], f32, &[f32]) -> f32,
) -> (Vec<ItemId>, Vec<ItemId>) {
    let mut left = Vec::with_capacity(members.len() / 2);
    let mut right = Vec::with_capacity(members.len() / 2);
    for &(id, vector) in members {
        let m = margin(&plane.normal, plane.bias, vector);
        let to_right = if m > 0.0 {
            true
        } else if m < 0.0 {
            false
        } else {
            id.get() % 2 == 1
        };
        if to_right {
            right.push(id);
        } else {
            left.push(id);
        }
    }
    (left, right)
}

/// Share of items on the larger side, 1.0 when a side is empty.
fn imbalance(left: usize, right: usize) -> f64 {
    let total = left + right;
    if total == 0 {
        return 1.0;
    }
    left.max(right) as f64 / total as f64
}

fn push_node(nodes: &mut Vec<Node>, node: Node) -> NodeId {
    let id = NodeId::new(nodes.len() as u32);
    nodes.push(node);
    id
}

/// Builds `n_trees` trees and stitches them into one node table.
///
/// `threads == 1` builds on the calling thread; any other value uses a rayon
/// pool of that size (0 lets rayon pick).
pub fn build_forest<M, V>(
    vectors: &V,
    n_trees: usize,
    seed: u64,
    threads: usize,
    verbose: bool,
) -> VectorResult<Forest>
where
    M: Metric,
    V: VectorSource + Sync,
{
    if vectors.item_count() == 0 {
        return Err(VectorError::EmptyIndex);
    }

    let builder = TreeBuilder::<M, V>::new(vectors);
    let build_one = |tree: usize| {
        let mut rng = SeededRandom::for_tree(seed, tree);
        let built = builder.build_tree(&mut rng);
        diag!(
            verbose,
            "Built tree {}/{} with {} nodes",
            tree + 1,
            n_trees,
            built.nodes.len()
        );
        built
    };

    let trees: Vec<BuiltTree> = if threads == 1 || n_trees == 1 {
        (0..n_trees).map(build_one).collect()
    } else {
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(|| (0..n_trees).into_par_iter().map(build_one).collect()),
            Err(e) => {
                warn!("Could not start build thread pool ({e}), building sequentially");
                (0..n_trees).map(build_one).collect()
            }
        }
    };

    let mut forest = Forest::default();
    for tree in trees {
        let offset = forest.nodes.append_rebased(tree.nodes);
        forest.roots.push(tree.root.rebase(offset));
    }

    diag!(
        verbose,
        "Forest has {} trees and {} nodes over {} items",
        forest.roots.len(),
        forest.nodes.len(),
        vectors.item_count()
    );
    Ok(forest)
}
