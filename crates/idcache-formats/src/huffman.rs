//! Huffman dictionary and tree-walking decoder
//!
//! Graphics chunks are compressed with a static Huffman tree shipped per
//! installation as a 255-node dictionary file. Each node holds two child
//! references; values below 256 are literal bytes, values from 256 upward
//! point at node `value - 256`. Node 254 is always the root.
//!
//! Bits are consumed least-significant first within every input byte.

use binrw::{BinRead, BinWrite};
use std::io::Cursor;

use crate::error::{FormatError, FormatResult};

/// Number of internal nodes in a dictionary.
pub const HUFFMAN_NODE_COUNT: usize = 255;

/// Size of a dictionary file in bytes (255 nodes, two `u16` each).
pub const HUFFMAN_TABLE_SIZE: usize = HUFFMAN_NODE_COUNT * 4;

/// Index of the root node.
pub const HUFFMAN_ROOT: usize = 254;

/// Single dictionary node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct HuffNode {
    /// Child taken on a zero bit
    pub bit0: u16,
    /// Child taken on a one bit
    pub bit1: u16,
}

/// Immutable 255-node Huffman dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuffmanTable {
    nodes: Box<[HuffNode; HUFFMAN_NODE_COUNT]>,
}

impl HuffmanTable {
    /// Build a table from its nodes.
    pub fn new(nodes: [HuffNode; HUFFMAN_NODE_COUNT]) -> Self {
        Self {
            nodes: Box::new(nodes),
        }
    }

    /// Parse a dictionary file.
    ///
    /// The file must hold exactly 255 nodes.
    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        if data.len() != HUFFMAN_TABLE_SIZE {
            return Err(FormatError::TableSize {
                table: "huffman dictionary",
                expected: HUFFMAN_TABLE_SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        let mut nodes = [HuffNode::default(); HUFFMAN_NODE_COUNT];
        for node in &mut nodes {
            *node = HuffNode::read(&mut cursor)?;
        }
        Ok(Self::new(nodes))
    }

    /// Serialize the dictionary back to its on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HUFFMAN_TABLE_SIZE);
        for node in self.nodes.iter() {
            out.extend_from_slice(&node.bit0.to_le_bytes());
            out.extend_from_slice(&node.bit1.to_le_bytes());
        }
        out
    }

    /// Access the raw nodes.
    pub fn nodes(&self) -> &[HuffNode; HUFFMAN_NODE_COUNT] {
        &self.nodes
    }

    /// Expand `source` into exactly `expanded_len` bytes.
    pub fn expand(&self, source: &[u8], expanded_len: usize) -> FormatResult<Vec<u8>> {
        let mut dest = vec![0u8; expanded_len];
        self.expand_into(source, &mut dest)?;
        Ok(dest)
    }

    /// Expand `source` until `dest` is full.
    ///
    /// Decoding stops as soon as the last output byte is emitted, so trailing
    /// bits of the final input byte are ignored. A child reference past the
    /// table or running out of input bits is a format error.
    pub fn expand_into(&self, source: &[u8], dest: &mut [u8]) -> FormatResult<()> {
        if dest.is_empty() {
            return Ok(());
        }

        let mut node = &self.nodes[HUFFMAN_ROOT];
        let mut written = 0;
        let mut input = source.iter();
        let mut byte = 0u8;
        let mut mask = 0u8;

        loop {
            if mask == 0 {
                byte = *input.next().ok_or(FormatError::InputExhausted {
                    codec: "huffman",
                    produced: written,
                    expected: dest.len(),
                })?;
                mask = 0x01;
            }

            let path = if byte & mask == 0 {
                node.bit0
            } else {
                node.bit1
            };
            mask <<= 1;

            if path < 256 {
                dest[written] = path as u8;
                written += 1;
                if written == dest.len() {
                    return Ok(());
                }
                node = &self.nodes[HUFFMAN_ROOT];
            } else {
                node = self
                    .nodes
                    .get(usize::from(path - 256))
                    .ok_or(FormatError::HuffmanNodeOutOfRange(path))?;
            }
        }
    }
}
