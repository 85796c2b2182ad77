//! Chunk offset tables
//!
//! Every chunk namespace ships a table of `N + 1` file offsets. The compressed
//! length of chunk `i` is the distance to the next non-sparse offset; sparse
//! entries reserve no file space.

use crate::error::{FormatError, FormatResult};

/// Sparse marker in packed 24-bit graphics offsets.
pub const SPARSE_OFFSET_24: u32 = 0x00FF_FFFF;

/// Location of a chunk's compressed bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// File offset of the first byte
    pub offset: u32,
    /// Compressed length in bytes
    pub length: u32,
}

impl ChunkSpan {
    /// Offset one past the last byte.
    pub const fn end(&self) -> u32 {
        self.offset + self.length
    }
}

/// Offset table with sparse entries stored as `None`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetTable {
    offsets: Vec<Option<u32>>,
}

impl OffsetTable {
    /// Build a table from `N + 1` offsets.
    pub fn from_offsets(offsets: Vec<Option<u32>>) -> FormatResult<Self> {
        if offsets.is_empty() {
            return Err(FormatError::InvalidRecord(
                "offset table needs a terminating entry".to_string(),
            ));
        }
        if offsets.last().is_some_and(Option::is_none) {
            return Err(FormatError::InvalidRecord(
                "terminating offset is sparse".to_string(),
            ));
        }

        let mut previous: Option<u32> = None;
        for (index, offset) in offsets.iter().enumerate() {
            let Some(offset) = *offset else { continue };
            if let Some(previous) = previous
                && offset < previous
            {
                return Err(FormatError::OffsetOrder {
                    index,
                    offset,
                    previous,
                });
            }
            previous = Some(offset);
        }

        Ok(Self { offsets })
    }

    /// Parse `chunk_count + 1` packed little-endian 24-bit offsets.
    pub fn from_packed24(data: &[u8], chunk_count: usize) -> FormatResult<Self> {
        let expected = (chunk_count + 1) * 3;
        if data.len() < expected {
            return Err(FormatError::TableSize {
                table: "graphics header",
                expected,
                actual: data.len(),
            });
        }

        let offsets = data[..expected]
            .chunks_exact(3)
            .map(|b| {
                let value = u32::from_le_bytes([b[0], b[1], b[2], 0]);
                (value != SPARSE_OFFSET_24).then_some(value)
            })
            .collect();
        Self::from_offsets(offsets)
    }

    /// Parse native 32-bit little-endian offsets. The entry count is implied
    /// by the data length.
    pub fn from_u32_le(data: &[u8]) -> FormatResult<Self> {
        if data.len() % 4 != 0 || data.len() < 4 {
            return Err(FormatError::InvalidRecord(format!(
                "32-bit offset table has {} bytes",
                data.len()
            )));
        }
        let offsets = data
            .chunks_exact(4)
            .map(|b| Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect();
        Self::from_offsets(offsets)
    }

    /// Number of chunks (entries minus the terminator).
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Whether the table describes no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw offset of a chunk, `None` when sparse or out of range.
    pub fn offset(&self, id: usize) -> Option<u32> {
        self.offsets.get(id).copied().flatten()
    }

    /// Whether a chunk is sparse.
    pub fn is_sparse(&self, id: usize) -> bool {
        id < self.len() && self.offsets[id].is_none()
    }

    /// Resolve a chunk to its file span, `None` for sparse chunks.
    ///
    /// The length is measured to the next non-sparse offset.
    pub fn resolve(&self, id: usize) -> FormatResult<Option<ChunkSpan>> {
        if id >= self.len() {
            return Err(FormatError::ChunkOutOfRange {
                id,
                count: self.len(),
            });
        }
        let Some(offset) = self.offsets[id] else {
            return Ok(None);
        };

        // from_offsets guarantees a non-sparse terminator and ascending order
        let next = self.offsets[id + 1..]
            .iter()
            .find_map(|o| *o)
            .unwrap_or(offset);

        Ok(Some(ChunkSpan {
            offset,
            length: next - offset,
        }))
    }

    /// Index of the next non-sparse entry after `id`, possibly the terminator.
    pub fn next_present(&self, id: usize) -> usize {
        let mut next = id + 1;
        while next < self.len() && self.offsets[next].is_none() {
            next += 1;
        }
        next
    }
}
