//! Startup and shutdown of the whole storage layer

use std::fs::File;
use tracing::info;

use crate::cache::AssetCache;
use crate::config::StorageConfig;
use crate::page::PageManager;
use crate::{Result, StorageError};

/// Owns every open file and table for one session
#[derive(Debug)]
pub struct AssetSystem {
    /// Chunk cache for graphics, maps and audio
    pub cache: AssetCache<File>,
    /// Page manager for the page file
    pub pages: PageManager<File>,
}

impl AssetSystem {
    /// Validate the configuration, then open the page file followed by the
    /// map, graphics and audio files.
    pub fn startup(config: StorageConfig) -> Result<Self> {
        config.validate().map_err(StorageError::Config)?;
        info!(
            "Starting asset system in {} (.{})",
            config.data_dir.display(),
            config.extension
        );

        let pages = PageManager::open(&config)?;
        let cache = AssetCache::open(config)?;
        Ok(Self { cache, pages })
    }

    /// Release every file and buffer, logging a summary.
    pub fn shutdown(self) {
        let stats = self.pages.stats();
        info!(
            "Shutting down asset system: {} chunk bytes resident, {} page loads, {} evictions, {} panics",
            self.cache.resident_bytes(),
            stats.disk_loads,
            stats.evictions,
            stats.panics
        );
    }
}
