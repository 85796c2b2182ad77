//! Map directory records and plane decoding
//!
//! The map head file starts with the installation's RLEW tag followed by up
//! to [`MAX_MAPS`] signed 32-bit offsets into the maps file. Each offset
//! points at a [`MapHeader`] giving the location of every plane.
//!
//! Planes are double encoded: the bytes on disk are a 2-byte expanded length
//! and a Carmack stream; the Carmack output starts with another (redundant)
//! 2-byte length followed by RLEW data for a 64×64 word plane.

use binrw::{BinRead, BinWrite};
use std::io::Cursor;

use crate::carmack;
use crate::error::{FormatError, FormatResult};
use crate::rlew;

/// Maximum number of maps a map head can describe.
pub const MAX_MAPS: usize = 100;

/// Plane slots in a map header.
pub const MAX_PLANES: usize = 3;

/// Side length of a map plane in tiles.
pub const MAP_SIZE: usize = 64;

/// Words in one expanded plane.
pub const PLANE_WORDS: usize = MAP_SIZE * MAP_SIZE;

/// Size of a [`MapHeader`] record in bytes.
pub const MAP_HEADER_SIZE: usize = 38;

/// Parsed map head file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapHead {
    /// Tag introducing RLEW runs in this installation
    pub rlew_tag: u16,
    /// Header offset per map, `None` for sparse maps
    pub header_offsets: Vec<Option<u32>>,
}

impl MapHead {
    /// Parse a map head file.
    ///
    /// Missing trailing entries and offsets `<= 0` are sparse.
    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        let Some((tag, rest)) = data.split_first_chunk::<2>() else {
            return Err(FormatError::TableSize {
                table: "map head",
                expected: 2,
                actual: data.len(),
            });
        };

        let mut header_offsets: Vec<Option<u32>> = rest
            .chunks_exact(4)
            .take(MAX_MAPS)
            .map(|b| {
                let offset = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                u32::try_from(offset).ok().filter(|&o| o > 0)
            })
            .collect();
        header_offsets.resize(MAX_MAPS, None);

        Ok(Self {
            rlew_tag: u16::from_le_bytes(*tag),
            header_offsets,
        })
    }

    /// Header offset of a map, `None` when sparse or out of range.
    pub fn header_offset(&self, map: usize) -> Option<u32> {
        self.header_offsets.get(map).copied().flatten()
    }
}

/// Per-map header record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct MapHeader {
    /// File offset of each plane
    pub plane_start: [i32; MAX_PLANES],
    /// Compressed length of each plane
    pub plane_length: [u16; MAX_PLANES],
    /// Width in tiles
    pub width: u16,
    /// Height in tiles
    pub height: u16,
    /// NUL-padded map name
    pub name: [u8; 16],
}

impl MapHeader {
    /// Parse a 38-byte header record.
    pub fn from_bytes(data: &[u8]) -> FormatResult<Self> {
        if data.len() < MAP_HEADER_SIZE {
            return Err(FormatError::TableSize {
                table: "map header",
                expected: MAP_HEADER_SIZE,
                actual: data.len(),
            });
        }
        Ok(Self::read(&mut Cursor::new(data))?)
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> FormatResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(MAP_HEADER_SIZE));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Map name up to the first NUL.
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// File offset and compressed length of a plane.
    pub fn plane(&self, plane: usize) -> FormatResult<(u32, usize)> {
        let (Some(&start), Some(&length)) =
            (self.plane_start.get(plane), self.plane_length.get(plane))
        else {
            return Err(FormatError::InvalidRecord(format!("no plane {plane}")));
        };
        let start = u32::try_from(start)
            .map_err(|_| FormatError::InvalidRecord(format!("plane {plane} offset {start}")))?;
        Ok((start, usize::from(length)))
    }
}

/// Decode a plane's on-disk bytes into a 64×64 word plane.
pub fn decode_plane(compressed: &[u8], rlew_tag: u16) -> FormatResult<Vec<u16>> {
    let Some((prefix, stream)) = compressed.split_first_chunk::<2>() else {
        return Err(FormatError::InvalidRecord(
            "plane has no expanded length".to_string(),
        ));
    };
    let carmack_len = usize::from(u16::from_le_bytes(*prefix));
    let rlew_words = carmack::expand(stream, carmack_len)?;

    // First word repeats the RLEW expanded length
    let body = rlew_words.get(1..).ok_or(FormatError::InputExhausted {
        codec: "rlew",
        produced: 0,
        expected: PLANE_WORDS,
    })?;
    rlew::expand(body, PLANE_WORDS * 2, rlew_tag)
}
