//! Single-file persistence for a built forest.
//!
//! The item table and the node table are written back to back after a small
//! header, using fixed-width little-endian fields only. Loading either copies
//! the file into heap storage or memory-maps it and serves vectors and nodes
//! straight out of the mapping.
//!
//! # Storage Format
//!
//! - Header (40 bytes): magic, version, dimension, metric tag, item count,
//!   node count, tree root count
//! - Tree roots: `u64` node ids
//! - Item table: `item_count * dimension` f32 values
//! - Node table: `node_count` fixed-size records (see [`crate::vector::node`])
//!
//! Every section starts at a multiple of 4 bytes, so a page-aligned mapping
//! can be viewed as `f32` in place on little-endian hosts.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::vector::node::{Node, NodeArena, NodeRef, NodeSource, cast_f32, record_size};
use crate::vector::store::{ItemStore, VectorSource};
use crate::vector::types::{
    ItemId, MetricKind, NodeId, VectorDimension, VectorError, VectorResult,
};

/// Current storage format version.
pub const STORAGE_VERSION: u32 = 1;

/// Size of the fixed part of the header in bytes.
pub const HEADER_SIZE: usize = 40;

/// Magic bytes to identify forest index files.
const MAGIC_BYTES: &[u8; 4] = b"ANNF";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Number of bytes per stored tree root.
const BYTES_PER_ROOT: usize = 8;

/// Decoded file header.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    pub dimension: VectorDimension,
    pub metric: MetricKind,
    pub item_count: u64,
    pub node_count: u64,
    pub roots: Vec<NodeId>,
}

impl IndexHeader {
    /// Byte offset of the item table.
    fn items_offset(&self) -> usize {
        HEADER_SIZE + self.roots.len() * BYTES_PER_ROOT
    }

    fn items_len(&self) -> Option<usize> {
        usize::try_from(self.item_count)
            .ok()?
            .checked_mul(self.dimension.get())?
            .checked_mul(BYTES_PER_F32)
    }

    fn nodes_len(&self) -> Option<usize> {
        usize::try_from(self.node_count)
            .ok()?
            .checked_mul(record_size(self.dimension.get()))
    }

    /// Total file size the header implies.
    fn expected_len(&self) -> Option<usize> {
        self.items_offset()
            .checked_add(self.items_len()?)?
            .checked_add(self.nodes_len()?)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.items_offset());
        out.extend_from_slice(MAGIC_BYTES);
        out.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension.get() as u32).to_le_bytes());
        out.push(self.metric.tag());
        out.extend_from_slice(&[0; 3]);
        out.extend_from_slice(&self.item_count.to_le_bytes());
        out.extend_from_slice(&self.node_count.to_le_bytes());
        out.extend_from_slice(&(self.roots.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for root in &self.roots {
            out.extend_from_slice(&u64::from(root.get()).to_le_bytes());
        }
        out
    }

    /// Parses the header at the start of `bytes`.
    fn decode(bytes: &[u8], path: &Path) -> VectorResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(VectorError::corrupt(path, "file too small to contain header"));
        }
        if &bytes[0..4] != MAGIC_BYTES {
            return Err(VectorError::corrupt(path, "invalid magic bytes"));
        }

        let version = read_u32(bytes, 4);
        if version != STORAGE_VERSION {
            return Err(VectorError::corrupt(
                path,
                format!("unsupported format version {version} (expected {STORAGE_VERSION})"),
            ));
        }

        let dimension = VectorDimension::new(read_u32(bytes, 8) as usize)
            .map_err(|e| VectorError::corrupt(path, e.to_string()))?;
        let metric = MetricKind::from_tag(bytes[12])
            .ok_or_else(|| VectorError::corrupt(path, format!("unknown metric tag {}", bytes[12])))?;
        let item_count = read_u64(bytes, 16);
        let node_count = read_u64(bytes, 24);
        let root_count = read_u32(bytes, 32) as usize;

        let roots_end = root_count
            .checked_mul(BYTES_PER_ROOT)
            .and_then(|len| len.checked_add(HEADER_SIZE))
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| VectorError::corrupt(path, "tree root list is truncated"))?;

        let mut roots = Vec::with_capacity(root_count);
        for offset in (HEADER_SIZE..roots_end).step_by(BYTES_PER_ROOT) {
            let root = read_u64(bytes, offset);
            if root >= node_count {
                return Err(VectorError::corrupt(
                    path,
                    format!("tree root {root} is outside the {node_count} node table"),
                ));
            }
            roots.push(NodeId::new(root as u32));
        }

        if node_count > u64::from(u32::MAX) || item_count > u64::from(u32::MAX) + 1 {
            return Err(VectorError::corrupt(path, "item or node count exceeds 32-bit ids"));
        }

        Ok(Self {
            dimension,
            metric,
            item_count,
            node_count,
            roots,
        })
    }

    /// Checks the header against the actual file length.
    fn validate_len(&self, file_len: usize, path: &Path) -> VectorResult<()> {
        match self.expected_len() {
            Some(expected) if expected == file_len => Ok(()),
            Some(expected) => Err(VectorError::corrupt(
                path,
                format!("header describes {expected} bytes but file has {file_len}"),
            )),
            None => Err(VectorError::corrupt(path, "header sizes overflow")),
        }
    }
}

/// Node table to write: heap nodes or records already in file layout.
#[derive(Debug, Clone, Copy)]
pub enum NodeRecords<'a> {
    Arena(&'a NodeArena),
    Encoded(&'a [u8]),
}

/// Writes a complete index file.
pub fn save_index(
    path: &Path,
    metric: MetricKind,
    dimension: VectorDimension,
    items: &[f32],
    nodes: NodeRecords<'_>,
    roots: &[NodeId],
) -> VectorResult<()> {
    let dim = dimension.get();
    let node_count = match nodes {
        NodeRecords::Arena(arena) => arena.len(),
        NodeRecords::Encoded(bytes) => bytes.len() / record_size(dim),
    };
    let header = IndexHeader {
        dimension,
        metric,
        item_count: (items.len() / dim) as u64,
        node_count: node_count as u64,
        roots: roots.to_vec(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| VectorError::io(parent, e))?;
    }

    // Renamed over the target once complete; existing mappings keep the old file
    let tmp_path = temp_path(path);
    let written = write_file(&tmp_path, &header, items, nodes).and_then(|()| {
        std::fs::rename(&tmp_path, path).map_err(|e| VectorError::io(path, e))
    });
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    written
}

fn write_file(
    path: &Path,
    header: &IndexHeader,
    items: &[f32],
    nodes: NodeRecords<'_>,
) -> VectorResult<()> {
    let dim = header.dimension.get();
    let file = File::create(path).map_err(|e| VectorError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let io_err = |e| VectorError::io(path, e);

    writer.write_all(&header.encode()).map_err(io_err)?;
    for &value in items {
        writer.write_all(&value.to_le_bytes()).map_err(io_err)?;
    }
    match nodes {
        NodeRecords::Arena(arena) => {
            let mut record = Vec::with_capacity(record_size(dim));
            for node in arena.iter() {
                record.clear();
                node.encode_into(dim, &mut record);
                writer.write_all(&record).map_err(io_err)?;
            }
        }
        NodeRecords::Encoded(bytes) => writer.write_all(bytes).map_err(io_err)?,
    }
    writer.flush().map_err(io_err)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Reads only the header of an index file.
pub fn read_header(path: &Path) -> VectorResult<IndexHeader> {
    let mut file = File::open(path).map_err(|e| VectorError::io(path, e))?;
    let mut fixed = vec![0u8; HEADER_SIZE];
    file.read_exact(&mut fixed)
        .map_err(|_| VectorError::corrupt(path, "file too small to contain header"))?;

    if &fixed[0..4] != MAGIC_BYTES {
        return Err(VectorError::corrupt(path, "invalid magic bytes"));
    }

    let file_len = file.metadata().map_err(|e| VectorError::io(path, e))?.len();
    let roots_len = (read_u32(&fixed, 32) as usize).saturating_mul(BYTES_PER_ROOT);
    if HEADER_SIZE.saturating_add(roots_len) as u64 > file_len {
        return Err(VectorError::corrupt(path, "tree root list is truncated"));
    }
    let mut roots = vec![0u8; roots_len];
    file.read_exact(&mut roots)
        .map_err(|_| VectorError::corrupt(path, "tree root list is truncated"))?;
    fixed.extend_from_slice(&roots);

    IndexHeader::decode(&fixed, path)
}

/// A fully copied index: header, item store and node arena.
#[derive(Debug)]
pub struct HeapIndex {
    pub header: IndexHeader,
    pub items: ItemStore,
    pub nodes: NodeArena,
}

/// Loads an index file into owned heap storage.
pub fn load_heap(path: &Path) -> VectorResult<HeapIndex> {
    let bytes = std::fs::read(path).map_err(|e| VectorError::io(path, e))?;
    let header = IndexHeader::decode(&bytes, path)?;
    header.validate_len(bytes.len(), path)?;

    let dim = header.dimension.get();
    let items_start = header.items_offset();
    let nodes_start = items_start + header.items_len().unwrap_or(0);

    let items: Vec<f32> = bytes[items_start..nodes_start]
        .chunks_exact(BYTES_PER_F32)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let nodes = bytes[nodes_start..]
        .chunks_exact(record_size(dim))
        .map(|record| Node::decode(record, dim))
        .collect::<Result<NodeArena, String>>()
        .map_err(|reason| VectorError::corrupt(path, reason))?;

    validate_links(&nodes, header.item_count, path)?;

    Ok(HeapIndex {
        items: ItemStore::from_flat(header.dimension, items),
        header,
        nodes,
    })
}

/// Read-only view of an index file through a memory map.
#[derive(Debug)]
pub struct MappedIndex {
    path: PathBuf,
    mmap: Mmap,
    header: IndexHeader,
    items_start: usize,
    nodes_start: usize,
}

impl MappedIndex {
    /// Maps `path` and validates every record without copying.
    pub fn open(path: &Path) -> VectorResult<Self> {
        let file = File::open(path).map_err(|e| VectorError::io(path, e))?;
        // SAFETY: the mapping is read-only; callers must not truncate the file
        // while it is mapped.
        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| VectorError::io(path, e))?;

        let header = IndexHeader::decode(&mmap, path)?;
        header.validate_len(mmap.len(), path)?;

        let items_start = header.items_offset();
        let nodes_start = items_start + header.items_len().unwrap_or(0);
        if cast_f32(&mmap[items_start..nodes_start]).is_none() {
            return Err(VectorError::corrupt(
                path,
                "item table cannot be viewed in place on this host",
            ));
        }

        let mapped = Self {
            path: path.to_path_buf(),
            mmap,
            header,
            items_start,
            nodes_start,
        };

        // Decode every record once up front so lookups can trust the table
        let dim = mapped.header.dimension.get();
        for record in mapped.node_bytes().chunks_exact(record_size(dim)) {
            NodeRef::view(record, dim).map_err(|reason| VectorError::corrupt(path, reason))?;
        }
        validate_links(&mapped, mapped.header.item_count, path)?;

        Ok(mapped)
    }

    #[must_use]
    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The item table as stored in the file.
    #[must_use]
    pub fn item_table(&self) -> &[f32] {
        cast_f32(&self.mmap[self.items_start..self.nodes_start]).unwrap_or(&[])
    }

    /// The node table in file layout.
    #[must_use]
    pub fn node_bytes(&self) -> &[u8] {
        &self.mmap[self.nodes_start..]
    }

    /// Size of the mapping in bytes.
    #[must_use]
    pub fn mapped_len(&self) -> usize {
        self.mmap.len()
    }
}

impl VectorSource for MappedIndex {
    fn dimension(&self) -> VectorDimension {
        self.header.dimension
    }

    fn item_count(&self) -> usize {
        self.header.item_count as usize
    }

    fn vector(&self, item: ItemId) -> Option<&[f32]> {
        let dim = self.header.dimension.get();
        let start = item.index().checked_mul(dim)?;
        self.item_table().get(start..start.checked_add(dim)?)
    }
}

impl NodeSource for MappedIndex {
    fn node_count(&self) -> usize {
        self.header.node_count as usize
    }

    fn node(&self, id: NodeId) -> Option<NodeRef<'_>> {
        let size = record_size(self.header.dimension.get());
        let start = id.index().checked_mul(size)?;
        let record = self.node_bytes().get(start..start.checked_add(size)?)?;
        NodeRef::view(record, self.header.dimension.get()).ok()
    }
}

/// Checks that children point backwards in the table (so trees cannot
/// cycle) and that leaves only name stored items.
fn validate_links<N: NodeSource>(nodes: &N, item_count: u64, path: &Path) -> VectorResult<()> {
    for index in 0..nodes.node_count() {
        let id = NodeId::new(index as u32);
        match nodes.node(id) {
            Some(NodeRef::Split { children, .. }) => {
                if children.iter().any(|child| *child >= id) {
                    return Err(VectorError::corrupt(
                        path,
                        format!("split node {index} has an invalid child reference"),
                    ));
                }
            }
            Some(NodeRef::Leaf(items)) => {
                if items.iter().any(|item| u64::from(item.get()) >= item_count) {
                    return Err(VectorError::corrupt(
                        path,
                        format!("leaf node {index} references an item past {item_count}"),
                    ));
                }
            }
            None => {
                return Err(VectorError::corrupt(path, format!("node {index} is unreadable")));
            }
        }
    }
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
