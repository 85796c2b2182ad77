//! Chunk cache and tiered page manager for classic id-style game data.
//!
//! This crate owns the stateful half of the asset pipeline. Decoders and
//! directory records live in `idcache-formats`; this crate opens the data
//! files, resolves chunk ids, decompresses on demand and decides what stays
//! in memory.
//!
//! - **Asset directory**: Huffman dictionary, graphics/audio offset tables
//!   and the map head, loaded once per session
//! - **Asset cache**: graphics, map and audio chunks with per-level
//!   "needed" marks and batched sweeps
//! - **Page manager**: fixed-size pages across primary, secondary and
//!   overflow stores with global LRU, locking and thrash detection
//! - **Asset system**: startup/shutdown boundary owning everything above
//!
//! Everything is single-threaded and runs to completion; the frame counter
//! used for LRU is advanced by the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use idcache_storage::{AssetSystem, StorageConfig};
//!
//! let config = StorageConfig::new("/games/wolf3d").with_extension("WL6");
//! let mut system = AssetSystem::startup(config)?;
//! system.cache.cache_chunk(7)?;
//! let pic = system.cache.chunk(7);
//! let wall = system.pages.get_page(0)?;
//! # Ok::<(), idcache_storage::StorageError>(())
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use idcache_formats::FormatError;
use std::path::PathBuf;
use thiserror::Error;

// Chunk cache manager
pub mod cache;

// Configuration
pub mod config;

// Directory tables
pub mod directory;

// Low-level file helpers
pub mod io;

// Tiered page manager
pub mod page;

// Startup/shutdown boundary
mod system;

pub use cache::{AssetCache, ChunkId, DataFiles, SweepReport};
pub use config::{AudioLayout, PageConfig, StorageConfig};
pub use directory::AssetDirectory;
pub use page::{PageManager, PageStats, Tier};
pub use system::AssetSystem;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by the cache and page managers.
///
/// Every variant is unrecoverable for the caller: the expected response is
/// to flush what state it can and terminate. Recoverable conditions (double
/// uncache, steady-state pool pressure) never surface as errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A data file could not be opened.
    #[error("Can't open {}: {source}", .path.display())]
    Open {
        /// File that failed to open
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A read hit end-of-file or returned fewer bytes than requested.
    #[error("Short read at offset {offset:#x}: {actual} of {expected} bytes")]
    ShortRead {
        /// File offset of the read
        offset: u64,
        /// Bytes requested
        expected: usize,
        /// Bytes actually read
        actual: usize,
    },

    /// A write stored fewer bytes than requested.
    #[error("Short write: {actual} of {expected} bytes")]
    ShortWrite {
        /// Bytes requested
        expected: usize,
        /// Bytes actually written
        actual: usize,
    },

    /// Decoder or record format violation.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Invalid data format.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A sparse entry was dereferenced.
    #[error("{namespace} {id} is sparse")]
    Sparse {
        /// Namespace of the id
        namespace: &'static str,
        /// Requested id
        id: usize,
    },

    /// Index outside its namespace.
    #[error("{namespace} {id} out of range ({count} entries)")]
    OutOfRange {
        /// Namespace of the id
        namespace: &'static str,
        /// Requested id
        id: usize,
        /// Entries in the namespace
        count: usize,
    },

    /// Invalid nesting-level transition.
    #[error("Invalid level change: {0}")]
    InvalidLevel(String),

    /// Resource exhausted.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error taxonomy used when reporting a fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Open, seek, read or write failure
    Io,
    /// Malformed data or unexpected sparse dereference
    Format,
    /// Allocation shortfall
    ResourceExhausted,
    /// Caller passed an invalid index or level change
    Misuse,
}

impl StorageError {
    /// Classify the error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) | Self::Open { .. } | Self::ShortRead { .. } | Self::ShortWrite { .. } => {
                ErrorCategory::Io
            }
            Self::Format(_) | Self::InvalidFormat(_) | Self::Sparse { .. } => ErrorCategory::Format,
            Self::ResourceExhausted(_) => ErrorCategory::ResourceExhausted,
            Self::OutOfRange { .. } | Self::InvalidLevel(_) | Self::Config(_) => {
                ErrorCategory::Misuse
            }
        }
    }
}

/// Version information for the storage system.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Huffman dictionary base name.
pub const GRAPHICS_DICT_FILE: &str = "vgadict";

/// Graphics offset table base name.
pub const GRAPHICS_HEAD_FILE: &str = "vgahead";

/// Graphics data base name.
pub const GRAPHICS_DATA_FILE: &str = "vgagraph";

/// Map head base name.
pub const MAP_HEAD_FILE: &str = "maphead";

/// Map data base name.
pub const MAP_DATA_FILE: &str = "gamemaps";

/// Audio offset table base name.
pub const AUDIO_HEAD_FILE: &str = "audiohed";

/// Audio data base name.
pub const AUDIO_DATA_FILE: &str = "audiot";

/// Page file base name.
pub const PAGE_FILE: &str = "vswap";
