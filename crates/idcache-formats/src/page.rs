//! Page file directory
//!
//! The page file begins with the page count and the first sprite and sound
//! page indices, followed by one 32-bit offset and one 16-bit length per
//! page. Page payloads follow the directory.

use binrw::{BinRead, BinWrite};
use std::io::{Read, Seek};

use crate::error::{FormatError, FormatResult};

/// Offset value marking a page that must never be paged in.
pub const SPARSE_PAGE_OFFSET: u32 = 0xFFFF_FFFF;

/// Page file directory as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct PageFileHeader {
    /// Number of pages
    pub page_count: u16,
    /// Index of the first sprite page
    pub sprite_start: u16,
    /// Index of the first sound page
    pub sound_start: u16,
    /// File offset of each page
    #[br(count = page_count)]
    pub offsets: Vec<u32>,
    /// Byte length of each page
    #[br(count = page_count)]
    pub lengths: Vec<u16>,
}

/// Page classification by index range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Wall texture page
    Wall,
    /// Sprite page
    Sprite,
    /// Digitized sound page
    Sound,
}

/// Directory entry for a single page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    /// File offset of the payload
    pub offset: u32,
    /// Payload length in bytes
    pub length: u16,
}

impl PageEntry {
    /// Whether the entry points at no data.
    pub const fn is_sparse(&self) -> bool {
        self.offset == 0 || self.offset == SPARSE_PAGE_OFFSET
    }
}

impl PageFileHeader {
    /// Read and validate the directory.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> FormatResult<Self> {
        let header = Self::read(reader)?;
        header.validate()?;
        Ok(header)
    }

    /// Check range ordering.
    pub fn validate(&self) -> FormatResult<()> {
        if self.sprite_start > self.sound_start || self.sound_start > self.page_count {
            return Err(FormatError::InvalidRecord(format!(
                "page ranges out of order: sprites at {}, sounds at {}, {} pages",
                self.sprite_start, self.sound_start, self.page_count
            )));
        }
        if self.offsets.len() != usize::from(self.page_count)
            || self.lengths.len() != usize::from(self.page_count)
        {
            return Err(FormatError::InvalidRecord(
                "page table length mismatch".to_string(),
            ));
        }
        Ok(())
    }

    /// Size of the directory in bytes.
    pub fn directory_size(&self) -> usize {
        6 + usize::from(self.page_count) * 6
    }

    /// Directory entry of a page.
    pub fn entry(&self, index: usize) -> Option<PageEntry> {
        Some(PageEntry {
            offset: *self.offsets.get(index)?,
            length: *self.lengths.get(index)?,
        })
    }

    /// All entries in index order.
    pub fn entries(&self) -> impl Iterator<Item = PageEntry> + '_ {
        self.offsets
            .iter()
            .zip(&self.lengths)
            .map(|(&offset, &length)| PageEntry { offset, length })
    }

    /// Classify a page index.
    pub fn kind(&self, index: usize) -> PageKind {
        if index < usize::from(self.sprite_start) {
            PageKind::Wall
        } else if index < usize::from(self.sound_start) {
            PageKind::Sprite
        } else {
            PageKind::Sound
        }
    }
}
