//! Per-session directory tables
//!
//! The directory is loaded once at startup and never mutated afterwards. It
//! answers "where are the compressed bytes of chunk N" for the graphics and
//! audio namespaces and holds the Huffman dictionary and the map head.

use idcache_formats::{ChunkSpan, HuffmanTable, MapHead, OffsetTable};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::io::load_file;
use crate::{
    AUDIO_HEAD_FILE, GRAPHICS_DICT_FILE, GRAPHICS_HEAD_FILE, MAP_HEAD_FILE, Result, StorageError,
};

/// Directory tables of one installation
#[derive(Debug, Clone)]
pub struct AssetDirectory {
    /// Graphics dictionary
    pub huffman: HuffmanTable,
    /// Graphics offsets (24-bit, sparse aware)
    pub graphics: OffsetTable,
    /// RLEW tag and map header offsets
    pub map_head: MapHead,
    /// Audio offsets
    pub audio: OffsetTable,
}

impl AssetDirectory {
    /// Load every directory file named by `config`.
    pub fn load(config: &StorageConfig) -> Result<Self> {
        let huffman = HuffmanTable::from_bytes(&load_file(&config.file_path(GRAPHICS_DICT_FILE))?)?;
        let graphics = OffsetTable::from_packed24(
            &load_file(&config.file_path(GRAPHICS_HEAD_FILE))?,
            config.graphics.num_chunks,
        )?;
        let map_head = MapHead::from_bytes(&load_file(&config.file_path(MAP_HEAD_FILE))?)?;
        let audio = OffsetTable::from_u32_le(&load_file(&config.file_path(AUDIO_HEAD_FILE))?)?;

        if audio.len() < config.audio.num_chunks {
            warn!(
                "Audio header describes {} chunks, layout expects {}",
                audio.len(),
                config.audio.num_chunks
            );
        }

        let directory = Self::from_parts(huffman, graphics, map_head, audio);
        info!(
            "Loaded asset directory from {}: {} graphics chunks, {} audio chunks, RLEW tag {:#06x}",
            config.data_dir.display(),
            directory.graphics.len(),
            directory.audio.len(),
            directory.map_head.rlew_tag
        );
        Ok(directory)
    }

    /// Assemble a directory from already parsed tables.
    pub const fn from_parts(
        huffman: HuffmanTable,
        graphics: OffsetTable,
        map_head: MapHead,
        audio: OffsetTable,
    ) -> Self {
        Self {
            huffman,
            graphics,
            map_head,
            audio,
        }
    }

    /// File span of a graphics chunk, `None` when sparse.
    pub fn resolve_graphics(&self, id: usize) -> Result<Option<ChunkSpan>> {
        resolve(&self.graphics, "graphics chunk", id)
    }

    /// File span of an audio chunk, `None` when sparse.
    pub fn resolve_audio(&self, id: usize) -> Result<Option<ChunkSpan>> {
        resolve(&self.audio, "audio chunk", id)
    }
}

fn resolve(table: &OffsetTable, namespace: &'static str, id: usize) -> Result<Option<ChunkSpan>> {
    if id >= table.len() {
        return Err(StorageError::OutOfRange {
            namespace,
            id,
            count: table.len(),
        });
    }
    let span = table.resolve(id)?;
    if span.is_none() {
        debug!("{} {} is sparse", namespace, id);
    }
    Ok(span)
}
