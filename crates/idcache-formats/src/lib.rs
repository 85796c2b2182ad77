//! Codecs and directory formats for classic id-style game data files
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
//! This crate holds the pure, I/O-free half of the asset pipeline: the three
//! decompressors used by the data files and the records that describe where
//! each chunk lives.
//!
//! # Codecs
//!
//! - **Huffman**: static 255-node tree, LSB-first bit order (graphics)
//! - **Carmack**: word-oriented near/far back-references (map planes)
//! - **RLEW**: tagged run-length words (map planes, after Carmack)
//!
//! # Directories
//!
//! - **Offset tables**: `N + 1` offsets with sparse entries (graphics, audio)
//! - **Map head / map header**: RLEW tag and per-map plane locations
//! - **Page file**: page count, sprite/sound ranges, offsets and lengths
//!
//! Decoders never read past their input or write past the requested length;
//! malformed streams surface as [`FormatError`].

#![warn(missing_docs)]

pub mod carmack;
pub mod error;
pub mod graphics;
pub mod huffman;
pub mod map;
pub mod offsets;
pub mod page;
pub mod rlew;

/// Reference encoders for building test fixtures
#[cfg(any(test, feature = "test-utils"))]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
pub mod test_utils;

pub use error::{FormatError, FormatResult};
pub use graphics::{ChunkClass, GraphicsLayout, PicSize};
pub use huffman::{HuffNode, HuffmanTable};
pub use map::{MapHead, MapHeader};
pub use offsets::{ChunkSpan, OffsetTable};
pub use page::{PageEntry, PageFileHeader, PageKind};
