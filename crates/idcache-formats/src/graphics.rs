//! Graphics chunk namespace
//!
//! Graphics chunks are Huffman compressed. Most carry a 4-byte little-endian
//! expanded length in front of the compressed bits; the 8×8 tile block has an
//! implicit size and no prefix. Pictures and tiles are stored in Mode-X
//! planar order and are converted to linear rows after expansion.

use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::{FormatError, FormatResult};
use crate::huffman::HuffmanTable;

/// Bytes in one 8×8 tile.
pub const TILE8_SIZE: usize = 8 * 8;

/// Chunk-id ranges of the graphics namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicsLayout {
    /// Total graphics chunks
    pub num_chunks: usize,
    /// Chunk holding the picture size table
    pub struct_pic: usize,
    /// First picture chunk
    pub start_pics: usize,
    /// Number of pictures
    pub num_pics: usize,
    /// Chunk holding all 8×8 tiles
    pub start_tile8: usize,
    /// Number of 8×8 tiles in the tile chunk
    pub num_tile8: usize,
    /// First external (non-image) chunk
    pub start_externs: usize,
}

impl Default for GraphicsLayout {
    fn default() -> Self {
        Self {
            num_chunks: 149,
            struct_pic: 0,
            start_pics: 3,
            num_pics: 132,
            start_tile8: 135,
            num_tile8: 72,
            start_externs: 136,
        }
    }
}

/// How a graphics chunk is expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkClass {
    /// Picture number `n`, deplanarized with its table size
    Pic(usize),
    /// The 8×8 tile block, implicit size
    Tile8,
    /// Anything else: prefixed length, no post-processing
    Other,
}

impl GraphicsLayout {
    /// Check that the ranges are consistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_chunks == 0 {
            return Err("num_chunks must be greater than 0".to_string());
        }
        if self.struct_pic >= self.num_chunks {
            return Err("struct_pic outside graphics namespace".to_string());
        }
        if self.start_pics + self.num_pics > self.start_tile8 {
            return Err("picture range overlaps tile range".to_string());
        }
        if self.start_tile8 > self.start_externs || self.start_externs > self.num_chunks {
            return Err("tile range outside graphics namespace".to_string());
        }
        Ok(())
    }

    /// Classify a chunk id.
    pub fn classify(&self, chunk: usize) -> ChunkClass {
        if chunk >= self.start_tile8 && chunk < self.start_externs {
            ChunkClass::Tile8
        } else if chunk >= self.start_pics && chunk < self.start_tile8 {
            ChunkClass::Pic(chunk - self.start_pics)
        } else {
            ChunkClass::Other
        }
    }

    /// Implicit expanded size of the tile chunk.
    pub const fn tile8_expanded_size(&self) -> usize {
        TILE8_SIZE * self.num_tile8
    }
}

/// Picture dimensions from the size table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct PicSize {
    /// Width in pixels
    pub width: i16,
    /// Height in pixels
    pub height: i16,
}

/// Parse `num_pics` picture sizes from an expanded size-table chunk.
pub fn parse_pic_table(data: &[u8], num_pics: usize) -> FormatResult<Vec<PicSize>> {
    let expected = num_pics * 4;
    if data.len() < expected {
        return Err(FormatError::TableSize {
            table: "picture table",
            expected,
            actual: data.len(),
        });
    }
    let mut cursor = Cursor::new(data);
    (0..num_pics)
        .map(|_| PicSize::read(&mut cursor).map_err(FormatError::from))
        .collect()
}

/// Split the 4-byte expanded-length prefix from a compressed chunk.
pub fn split_length_prefix(source: &[u8]) -> FormatResult<(usize, &[u8])> {
    let (prefix, rest) = source.split_first_chunk::<4>().ok_or_else(|| {
        FormatError::InvalidRecord(format!(
            "chunk of {} bytes has no length prefix",
            source.len()
        ))
    })?;
    let expanded = i32::from_le_bytes(*prefix);
    let expanded = usize::try_from(expanded)
        .map_err(|_| FormatError::InvalidRecord(format!("negative expanded length {expanded}")))?;
    Ok((expanded, rest))
}

/// Convert a Mode-X planar image to linear rows in place.
///
/// Planar data stores every fourth column together: plane `p` holds columns
/// `p, p + 4, ...` for all rows. Images whose width is not a multiple of four,
/// or that do not fit in `buf`, are left untouched and `false` is returned.
pub fn deplanarize(buf: &mut [u8], width: usize, height: usize) -> bool {
    let size = width * height;
    if width % 4 != 0 || size == 0 || size > buf.len() {
        return false;
    }

    let quarter = width / 4;
    let mut linear = vec![0u8; size];
    let mut src = buf[..size].iter();
    for plane in 0..4 {
        for row in linear.chunks_exact_mut(width) {
            for x in 0..quarter {
                if let Some(&b) = src.next() {
                    row[x * 4 + plane] = b;
                }
            }
        }
    }
    buf[..size].copy_from_slice(&linear);
    true
}

/// Expand one graphics chunk from its compressed bytes.
pub fn expand_chunk(
    layout: &GraphicsLayout,
    huffman: &HuffmanTable,
    pics: &[PicSize],
    chunk: usize,
    source: &[u8],
) -> FormatResult<Vec<u8>> {
    match layout.classify(chunk) {
        ChunkClass::Tile8 => {
            let mut out = huffman.expand(source, layout.tile8_expanded_size())?;
            for tile in out.chunks_exact_mut(TILE8_SIZE) {
                deplanarize(tile, 8, 8);
            }
            Ok(out)
        }
        ChunkClass::Pic(index) => {
            let (expanded, data) = split_length_prefix(source)?;
            let mut out = huffman.expand(data, expanded)?;
            if let Some(size) = pics.get(index)
                && let (Ok(w), Ok(h)) = (usize::try_from(size.width), usize::try_from(size.height))
            {
                deplanarize(&mut out, w, h);
            }
            Ok(out)
        }
        ChunkClass::Other => {
            let (expanded, data) = split_length_prefix(source)?;
            huffman.expand(data, expanded)
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{build_huffman_table, huffman_encode};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_layout_is_valid() {
        let layout = GraphicsLayout::default();
        layout.validate().expect("valid");
        assert_eq!(layout.classify(0), ChunkClass::Other);
        assert_eq!(layout.classify(3), ChunkClass::Pic(0));
        assert_eq!(layout.classify(134), ChunkClass::Pic(131));
        assert_eq!(layout.classify(135), ChunkClass::Tile8);
        assert_eq!(layout.classify(136), ChunkClass::Other);
        assert_eq!(layout.tile8_expanded_size(), 72 * 64);
    }

    #[test]
    fn test_invalid_layout() {
        let layout = GraphicsLayout {
            start_tile8: 100,
            ..GraphicsLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_deplanarize_4x2() {
        // Plane 0 holds columns 0 of rows 0,1; plane 1 columns 1; ...
        let mut buf = vec![0, 4, 1, 5, 2, 6, 3, 7];
        assert!(deplanarize(&mut buf, 4, 2));
        assert_eq!(buf, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_deplanarize_8_wide() {
        // width 8 -> two columns per plane per row
        let linear: Vec<u8> = (0..16).collect();
        let mut planar = Vec::new();
        for plane in 0..4 {
            for row in 0..2 {
                for x in 0..2 {
                    planar.push(linear[row * 8 + x * 4 + plane]);
                }
            }
        }
        assert!(deplanarize(&mut planar, 8, 2));
        assert_eq!(planar, linear);
    }

    #[test]
    fn test_deplanarize_rejects_odd_width() {
        let mut buf = vec![1, 2, 3];
        assert!(!deplanarize(&mut buf, 3, 1));
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_expand_prefixed_chunk() {
        let data = b"external chunk payload".to_vec();
        let table = build_huffman_table(&data);
        let mut source = (data.len() as i32).to_le_bytes().to_vec();
        source.extend(huffman_encode(&table, &data));

        let layout = GraphicsLayout::default();
        let out = expand_chunk(&layout, &table, &[], 140, &source).expect("expand");
        assert_eq!(out, data);
    }

    #[test]
    fn test_expand_pic_deplanarizes() {
        let planar = vec![0u8, 4, 1, 5, 2, 6, 3, 7];
        let table = build_huffman_table(&planar);
        let mut source = 8i32.to_le_bytes().to_vec();
        source.extend(huffman_encode(&table, &planar));

        let layout = GraphicsLayout::default();
        let pics = [PicSize {
            width: 4,
            height: 2,
        }];
        let out = expand_chunk(&layout, &table, &pics, layout.start_pics, &source).expect("expand");
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_pic_table_and_prefix_errors() {
        let bytes = [8, 0, 2, 0, 16, 0, 4, 0];
        let pics = parse_pic_table(&bytes, 2).expect("parse");
        assert_eq!(pics[1], PicSize {
            width: 16,
            height: 4
        });
        assert!(parse_pic_table(&bytes, 3).is_err());
        assert!(split_length_prefix(&[1, 2]).is_err());
        assert!(split_length_prefix(&(-1i32).to_le_bytes()).is_err());
    }
}
