//! `BOMStore` block container
//!
//! Compiled catalogs are stored inside a generic block file: a header, a
//! table of `(address, length)` blocks and a table of named variables that
//! point at the blocks holding each top-level structure. Every integer at
//! this level is big-endian.

use std::{
    collections::{HashMap, HashSet},
    io::{self, Cursor, Read},
};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::FormatError;

pub const BOM_MAGIC: &[u8; 8] = b"BOMStore";
pub const BOM_VERSION: u32 = 1;

const HEADER_LEN: usize = 32;
const TREE_MAGIC: &[u8; 4] = b"tree";

/// Location of a block inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub offset: usize,
    pub len: usize,
}

impl BlockRange {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Parsed block and variable tables of a `BOMStore` file
///
/// Holds no reference to the file bytes; every accessor takes them back so
/// the store can live next to the mapping that owns them.
#[derive(Debug)]
pub struct BomStore {
    blocks: Vec<BlockRange>,
    vars: HashMap<String, u32>,
}

struct Header {
    index_offset: usize,
    index_length: usize,
    vars_offset: usize,
    vars_length: usize,
}

impl BomStore {
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let magic = bytes.get(..8).ok_or(FormatError::Truncated("BOM header"))?;

        if magic != BOM_MAGIC {
            return Err(FormatError::bad_magic("BOM", "BOMStore", magic));
        }

        let header = bytes
            .get(8..HEADER_LEN)
            .ok_or(FormatError::Truncated("BOM header"))?;

        let mut cur = Cursor::new(header);
        let version = cur
            .read_u32::<BigEndian>()
            .map_err(|_| FormatError::Truncated("BOM header"))?;

        if version != BOM_VERSION {
            return Err(FormatError::UnsupportedVersion {
                what: "BOM",
                version,
            });
        }

        let header = read_header(&mut cur).map_err(|_| FormatError::Truncated("BOM header"))?;

        let index = slice(bytes, header.index_offset, header.index_length)
            .ok_or(FormatError::Truncated("block index"))?;
        let blocks = read_block_table(index).map_err(|_| FormatError::Truncated("block index"))?;

        let vars = slice(bytes, header.vars_offset, header.vars_length)
            .ok_or(FormatError::Truncated("variables table"))?;
        let vars = read_vars(vars).map_err(|_| FormatError::Truncated("variables table"))?;

        Ok(Self { blocks, vars })
    }

    /// Block id a named variable points at
    pub fn var(&self, name: &str) -> Option<u32> {
        self.vars.get(name).copied()
    }

    /// Block id of a variable that must be present
    pub fn required_var(&self, name: &'static str) -> Result<u32, FormatError> {
        self.var(name).ok_or(FormatError::MissingVariable(name))
    }

    /// Location of a block, checked against the size of the container
    pub fn range(&self, bytes: &[u8], id: u32) -> Result<BlockRange, FormatError> {
        let range = self
            .blocks
            .get(id as usize)
            .copied()
            .filter(|range| id != 0 && range.end() <= bytes.len())
            .ok_or(FormatError::BlockOutOfBounds { id })?;

        Ok(range)
    }

    /// Content of a block
    pub fn block<'a>(&self, bytes: &'a [u8], id: u32) -> Result<&'a [u8], FormatError> {
        let range = self.range(bytes, id)?;
        Ok(&bytes[range.offset..range.end()])
    }

    /// All `(key block, value block)` pairs of the tree stored in block `id`,
    /// in leaf order
    pub fn tree_entries(&self, bytes: &[u8], id: u32) -> Result<Vec<TreeEntry>, FormatError> {
        let tree = self.block(bytes, id)?;

        let magic = tree.get(..4).ok_or(FormatError::Truncated("tree header"))?;
        if magic != TREE_MAGIC {
            return Err(FormatError::bad_magic("tree", "tree", magic));
        }

        let mut cur = Cursor::new(&tree[4..]);
        let root = cur
            .read_u32::<BigEndian>()
            .and_then(|_version| cur.read_u32::<BigEndian>())
            .map_err(|_| FormatError::Truncated("tree header"))?;

        if root == 0 {
            return Ok(vec![]);
        }

        let mut visited = HashSet::new();
        let mut node_id = root;

        // Walk down the leftmost branch to the first leaf
        let mut node = loop {
            if !visited.insert(node_id) {
                return Err(FormatError::TreeCycle { id: node_id });
            }

            let node = PathsNode::parse(self.block(bytes, node_id)?)?;

            if node.is_leaf {
                break node;
            }

            node_id = match node.entries.first() {
                Some(first) => first.value,
                None => return Ok(vec![]),
            };
        };

        let mut entries = vec![];

        // Then follow the chain of leaves
        loop {
            entries.extend_from_slice(&node.entries);

            if node.forward == 0 {
                return Ok(entries);
            }

            node_id = node.forward;

            if !visited.insert(node_id) {
                return Err(FormatError::TreeCycle { id: node_id });
            }

            node = PathsNode::parse(self.block(bytes, node_id)?)?;
        }
    }
}

/// One entry of a leaf node: ids of the blocks holding the key and the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEntry {
    pub value: u32,
    pub key: u32,
}

struct PathsNode {
    is_leaf: bool,
    forward: u32,
    entries: Vec<TreeEntry>,
}

impl PathsNode {
    fn parse(block: &[u8]) -> Result<Self, FormatError> {
        Self::read(&mut Cursor::new(block)).map_err(|_| FormatError::Truncated("tree node"))
    }

    fn read(cur: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let is_leaf = cur.read_u16::<BigEndian>()? != 0;
        let count = cur.read_u16::<BigEndian>()?;
        let forward = cur.read_u32::<BigEndian>()?;
        let _backward = cur.read_u32::<BigEndian>()?;

        let entries = (0..count)
            .map(|_| {
                Ok(TreeEntry {
                    value: cur.read_u32::<BigEndian>()?,
                    key: cur.read_u32::<BigEndian>()?,
                })
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            is_leaf,
            forward,
            entries,
        })
    }
}

fn read_header(cur: &mut Cursor<&[u8]>) -> io::Result<Header> {
    let _block_count = cur.read_u32::<BigEndian>()?;

    Ok(Header {
        index_offset: cur.read_u32::<BigEndian>()? as usize,
        index_length: cur.read_u32::<BigEndian>()? as usize,
        vars_offset: cur.read_u32::<BigEndian>()? as usize,
        vars_length: cur.read_u32::<BigEndian>()? as usize,
    })
}

fn read_block_table(index: &[u8]) -> io::Result<Vec<BlockRange>> {
    let mut cur = Cursor::new(index);
    let count = cur.read_u32::<BigEndian>()?;

    (0..count)
        .map(|_| {
            Ok(BlockRange {
                offset: cur.read_u32::<BigEndian>()? as usize,
                len: cur.read_u32::<BigEndian>()? as usize,
            })
        })
        .collect()
}

fn read_vars(vars: &[u8]) -> io::Result<HashMap<String, u32>> {
    let mut cur = Cursor::new(vars);
    let count = cur.read_u32::<BigEndian>()?;

    (0..count)
        .map(|_| {
            let id = cur.read_u32::<BigEndian>()?;
            let len = cur.read_u8()?;
            let mut name = vec![0; usize::from(len)];
            cur.read_exact(&mut name)?;
            Ok((String::from_utf8_lossy(&name).into_owned(), id))
        })
        .collect()
}

fn slice(bytes: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    bytes.get(offset..offset.checked_add(len)?)
}
