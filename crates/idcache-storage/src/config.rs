//! Configuration for the cache and page managers

use idcache_formats::GraphicsLayout;
use idcache_formats::map::{MAX_MAPS, MAX_PLANES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, StorageError};

/// Chunk ranges of the audio namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioLayout {
    /// Total audio chunks
    pub num_chunks: usize,
    /// First AdLib sound effect chunk
    pub start_adlib_sounds: usize,
    /// Number of sound effects per device
    pub num_sounds: usize,
}

impl Default for AudioLayout {
    fn default() -> Self {
        Self {
            num_chunks: 288,
            start_adlib_sounds: 87,
            num_sounds: 87,
        }
    }
}

/// Page manager sizing and eviction tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageConfig {
    /// Size of one page slot in bytes
    pub page_size: usize,
    /// Slots in the primary store
    pub primary_pages: usize,
    /// Slots in the secondary store
    pub secondary_pages: usize,
    /// Slots in the overflow store (0 disables it)
    pub overflow_pages: usize,
    /// Minimum primary + secondary slots required at startup
    pub min_pages: usize,
    /// Re-requests of just-evicted pages within one frame before panicking
    pub thrash_threshold: u32,
    /// Frames the panic window lasts once entered
    pub panic_cooldown_frames: u64,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            primary_pages: 64,
            secondary_pages: 128,
            overflow_pages: 512,
            min_pages: 8,
            thrash_threshold: 4,
            panic_cooldown_frames: 8,
        }
    }
}

impl PageConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.page_size == 0 {
            return Err("page_size must be greater than 0".to_string());
        }
        if self.primary_pages + self.secondary_pages == 0 {
            return Err("primary_pages + secondary_pages must be greater than 0".to_string());
        }
        if self.thrash_threshold == 0 {
            return Err("thrash_threshold must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for the storage system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the data files
    pub data_dir: PathBuf,

    /// Installation extension appended to every base file name
    pub extension: String,

    /// Graphics namespace ranges
    pub graphics: GraphicsLayout,

    /// Audio namespace ranges
    pub audio: AudioLayout,

    /// Maps described by the map head
    pub num_maps: usize,

    /// Planes decoded per map
    pub map_planes: usize,

    /// Capacity of the batched-read scratch buffer
    pub scratch_buffer_size: usize,

    /// Largest gap of unneeded bytes a batched read may span
    pub max_empty_read: usize,

    /// Budget for decompressed chunk buffers (None for unlimited)
    pub max_resident_bytes: Option<usize>,

    /// Page manager settings
    pub pages: PageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            extension: "WL6".to_string(),
            graphics: GraphicsLayout::default(),
            audio: AudioLayout::default(),
            num_maps: 60,
            map_planes: 2,
            scratch_buffer_size: 0x1000,
            max_empty_read: 1024,
            max_resident_bytes: None,
            pages: PageConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Create a new configuration with the specified data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = crate::io::load_file(path.as_ref())?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.as_ref().display())))?;
        config.validate().map_err(StorageError::Config)?;
        Ok(config)
    }

    /// Set the data directory
    #[must_use]
    pub fn with_data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// Set the installation extension
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set the graphics layout
    #[must_use]
    pub fn with_graphics(mut self, graphics: GraphicsLayout) -> Self {
        self.graphics = graphics;
        self
    }

    /// Set the audio layout
    #[must_use]
    pub fn with_audio(mut self, audio: AudioLayout) -> Self {
        self.audio = audio;
        self
    }

    /// Set the number of maps
    #[must_use]
    pub const fn with_num_maps(mut self, num_maps: usize) -> Self {
        self.num_maps = num_maps;
        self
    }

    /// Set the decoded-buffer budget
    #[must_use]
    pub const fn with_max_resident_bytes(mut self, max: usize) -> Self {
        self.max_resident_bytes = Some(max);
        self
    }

    /// Set the page manager settings
    #[must_use]
    pub fn with_pages(mut self, pages: PageConfig) -> Self {
        self.pages = pages;
        self
    }

    /// Full path of a data file, e.g. `vgagraph` -> `<data_dir>/vgagraph.WL6`.
    pub fn file_path(&self, base: &str) -> PathBuf {
        self.data_dir.join(format!("{base}.{}", self.extension))
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.graphics.validate()?;
        self.pages.validate()?;

        if self.audio.start_adlib_sounds + self.audio.num_sounds > self.audio.num_chunks {
            return Err("sound range outside audio namespace".to_string());
        }
        if self.num_maps > MAX_MAPS {
            return Err(format!("num_maps must be at most {MAX_MAPS}"));
        }
        if self.map_planes == 0 || self.map_planes > MAX_PLANES {
            return Err(format!("map_planes must be between 1 and {MAX_PLANES}"));
        }
        if self.scratch_buffer_size == 0 {
            return Err("scratch_buffer_size must be greater than 0".to_string());
        }
        if let Some(max) = self.max_resident_bytes
            && max == 0
        {
            return Err("max_resident_bytes must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        StorageConfig::default().validate().expect("valid");
    }

    #[test]
    fn test_file_path_uses_extension() {
        let config = StorageConfig::new("/data").with_extension("SOD");
        assert_eq!(config.file_path("vswap"), PathBuf::from("/data/vswap.SOD"));
    }

    #[test]
    fn test_validation_failures() {
        let config = StorageConfig::default().with_num_maps(101);
        assert!(config.validate().is_err());

        let mut config = StorageConfig::default();
        config.map_planes = 4;
        assert!(config.validate().is_err());

        let config = StorageConfig::default().with_pages(PageConfig {
            primary_pages: 0,
            secondary_pages: 0,
            ..PageConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("idcache.json");
        let config = StorageConfig::new(dir.path())
            .with_extension("WL1")
            .with_max_resident_bytes(1 << 20);
        std::fs::write(&path, serde_json::to_vec(&config).expect("serialize")).expect("write");

        let loaded = StorageConfig::from_json_file(&path).expect("load");
        assert_eq!(loaded, config);

        std::fs::write(&path, b"{ not json").expect("write");
        assert!(matches!(
            StorageConfig::from_json_file(&path),
            Err(StorageError::Config(_))
        ));
    }
}
