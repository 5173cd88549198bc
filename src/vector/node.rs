//! Node storage: a flat table of fixed-size node records.
//!
//! Nodes refer to each other by [`NodeId`], an index into the table, so a
//! table can be written to disk and mapped back without pointer fixups.
//!
//! # Record Layout
//!
//! Every record is `20 + 4 * dimension` bytes, little-endian:
//! - `tag: u8` (0 leaf, 1 split), 3 reserved bytes
//! - `descendants: u32`, number of items below the node
//! - split body: `child0: u32`, `child1: u32`, `bias: f32`, `normal: [f32; dimension]`
//! - leaf body: `items: [u32; descendants]`, zero padded to the record size
//!
//! A leaf can therefore hold at most `dimension + 3` item ids.

use crate::vector::types::{ItemId, NodeId};

const TAG_LEAF: u8 = 0;
const TAG_SPLIT: u8 = 1;

/// Bytes before the record body: tag, reserved, descendants.
const RECORD_PREFIX: usize = 8;

/// Split body bytes before the normal: two children and the bias.
const SPLIT_FIXED: usize = 12;

/// Size in bytes of one node record for vectors of `dimension` components.
#[must_use]
pub const fn record_size(dimension: usize) -> usize {
    RECORD_PREFIX + SPLIT_FIXED + 4 * dimension
}

/// Maximum number of item ids a leaf record can hold.
#[must_use]
pub const fn leaf_capacity(dimension: usize) -> usize {
    (SPLIT_FIXED + 4 * dimension) / 4
}

/// Separating hyperplane of a split node.
///
/// A vector `v` routes to child 1 when `bias + normal . v` is positive.
/// Angular splits always pass through the origin (`bias == 0`).
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlane {
    pub normal: Vec<f32>,
    pub bias: f32,
}

impl SplitPlane {
    /// A plane with an all-zero normal; every vector sits on it.
    #[must_use]
    pub fn degenerate(dimension: usize) -> Self {
        Self {
            normal: vec![0.0; dimension],
            bias: 0.0,
        }
    }
}

/// An owned node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        items: Vec<ItemId>,
    },
    Split {
        descendants: u32,
        children: [NodeId; 2],
        plane: SplitPlane,
    },
}

impl Node {
    /// Number of items below this node.
    #[must_use]
    pub fn descendants(&self) -> u32 {
        match self {
            Self::Leaf { items } => items.len() as u32,
            Self::Split { descendants, .. } => *descendants,
        }
    }

    /// Borrowed view of this node.
    #[must_use]
    pub fn as_ref(&self) -> NodeRef<'_> {
        match self {
            Self::Leaf { items } => NodeRef::Leaf(LeafItems::Owned(items)),
            Self::Split {
                children, plane, ..
            } => NodeRef::Split {
                children: *children,
                bias: plane.bias,
                normal: &plane.normal,
            },
        }
    }

    /// Appends this node's fixed-size record to `out`.
    pub fn encode_into(&self, dimension: usize, out: &mut Vec<u8>) {
        let start = out.len();
        match self {
            Self::Leaf { items } => {
                debug_assert!(items.len() <= leaf_capacity(dimension));
                out.push(TAG_LEAF);
                out.extend_from_slice(&[0; 3]);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    out.extend_from_slice(&item.to_bytes());
                }
            }
            Self::Split {
                descendants,
                children,
                plane,
            } => {
                out.push(TAG_SPLIT);
                out.extend_from_slice(&[0; 3]);
                out.extend_from_slice(&descendants.to_le_bytes());
                out.extend_from_slice(&children[0].get().to_le_bytes());
                out.extend_from_slice(&children[1].get().to_le_bytes());
                out.extend_from_slice(&plane.bias.to_le_bytes());
                for value in &plane.normal {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        out.resize(start + record_size(dimension), 0);
    }

    /// Decodes a record into an owned node, copying the payload.
    pub fn decode(record: &[u8], dimension: usize) -> Result<Self, String> {
        let (tag, descendants, body) = split_record(record, dimension)?;
        match tag {
            TAG_LEAF => {
                let count = leaf_len(descendants, dimension)?;
                let items = body[..count * 4]
                    .chunks_exact(4)
                    .map(|c| ItemId::from_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(Self::Leaf { items })
            }
            TAG_SPLIT => {
                let normal = body[SPLIT_FIXED..]
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(Self::Split {
                    descendants,
                    children: split_children(body),
                    plane: SplitPlane {
                        normal,
                        bias: read_f32(&body[8..12]),
                    },
                })
            }
            other => Err(format!("unknown node tag {other}")),
        }
    }
}

/// Item ids held by a leaf, either owned or still encoded in a record.
#[derive(Debug, Clone, Copy)]
pub enum LeafItems<'a> {
    Owned(&'a [ItemId]),
    Encoded(&'a [u8]),
}

impl<'a> LeafItems<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Owned(items) => items.len(),
            Self::Encoded(bytes) => bytes.len() / 4,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> LeafIter<'a> {
        match *self {
            Self::Owned(items) => LeafIter::Owned(items.iter()),
            Self::Encoded(bytes) => LeafIter::Encoded(bytes.chunks_exact(4)),
        }
    }
}

/// Iterator over [`LeafItems`].
pub enum LeafIter<'a> {
    Owned(std::slice::Iter<'a, ItemId>),
    Encoded(std::slice::ChunksExact<'a, u8>),
}

impl Iterator for LeafIter<'_> {
    type Item = ItemId;

    fn next(&mut self) -> Option<ItemId> {
        match self {
            Self::Owned(it) => it.next().copied(),
            Self::Encoded(it) => it
                .next()
                .map(|c| ItemId::from_bytes([c[0], c[1], c[2], c[3]])),
        }
    }
}

/// Borrowed view of a node, independent of where the table lives.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Leaf(LeafItems<'a>),
    Split {
        children: [NodeId; 2],
        bias: f32,
        normal: &'a [f32],
    },
}

impl<'a> NodeRef<'a> {
    /// Decodes a record in place without copying.
    ///
    /// Fails when the split normal cannot be viewed as `f32` (big-endian host
    /// or misaligned buffer); callers fall back to [`Node::decode`].
    pub fn view(record: &'a [u8], dimension: usize) -> Result<Self, String> {
        let (tag, descendants, body) = split_record(record, dimension)?;
        match tag {
            TAG_LEAF => {
                let count = leaf_len(descendants, dimension)?;
                Ok(Self::Leaf(LeafItems::Encoded(&body[..count * 4])))
            }
            TAG_SPLIT => {
                let normal = cast_f32(&body[SPLIT_FIXED..])
                    .ok_or_else(|| "split normal cannot be viewed in place".to_string())?;
                Ok(Self::Split {
                    children: split_children(body),
                    bias: read_f32(&body[8..12]),
                    normal,
                })
            }
            other => Err(format!("unknown node tag {other}")),
        }
    }
}

/// Read access to node storage, shared by heap and memory-mapped tables.
pub trait NodeSource {
    fn node_count(&self) -> usize;

    fn node(&self, id: NodeId) -> Option<NodeRef<'_>>;
}

/// Heap node table. Nodes are appended and never modified.
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node and returns its id.
    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Appends a tree built in its own private id range, shifting every child
    /// reference by the current table length. Returns that offset.
    pub fn append_rebased(&mut self, nodes: Vec<Node>) -> u32 {
        let offset = self.nodes.len() as u32;
        self.nodes.extend(nodes.into_iter().map(|node| match node {
            Node::Split {
                descendants,
                children,
                plane,
            } => Node::Split {
                descendants,
                children: [children[0].rebase(offset), children[1].rebase(offset)],
                plane,
            },
            leaf => leaf,
        }));
        offset
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }
}

impl FromIterator<Node> for NodeArena {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

impl NodeSource for NodeArena {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, id: NodeId) -> Option<NodeRef<'_>> {
        self.nodes.get(id.index()).map(Node::as_ref)
    }
}

/// Views a little-endian byte buffer as `f32` values without copying.
///
/// Returns `None` on big-endian hosts or when the buffer is not 4-byte
/// aligned or sized.
pub(crate) fn cast_f32(bytes: &[u8]) -> Option<&[f32]> {
    if !cfg!(target_endian = "little") || bytes.len() % 4 != 0 {
        return None;
    }
    // SAFETY: every bit pattern is a valid f32 and align_to only returns the
    // correctly aligned middle section.
    let (prefix, floats, suffix) = unsafe { bytes.align_to::<f32>() };
    (prefix.is_empty() && suffix.is_empty()).then_some(floats)
}

fn split_record(record: &[u8], dimension: usize) -> Result<(u8, u32, &[u8]), String> {
    if record.len() != record_size(dimension) {
        return Err(format!(
            "node record is {} bytes, expected {}",
            record.len(),
            record_size(dimension)
        ));
    }
    let descendants = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
    Ok((record[0], descendants, &record[RECORD_PREFIX..]))
}

fn leaf_len(descendants: u32, dimension: usize) -> Result<usize, String> {
    let count = descendants as usize;
    if count == 0 || count > leaf_capacity(dimension) {
        return Err(format!(
            "leaf holds {count} items, capacity is {}",
            leaf_capacity(dimension)
        ));
    }
    Ok(count)
}

fn split_children(body: &[u8]) -> [NodeId; 2] {
    [
        NodeId::new(u32::from_le_bytes([body[0], body[1], body[2], body[3]])),
        NodeId::new(u32::from_le_bytes([body[4], body[5], body[6], body[7]])),
    ]
}

fn read_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
