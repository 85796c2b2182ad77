//! Decompressed chunk cache
//!
//! The cache owns one slot per chunk id in the graphics and audio namespaces
//! plus the planes of the current map. A slot is either absent or holds the
//! decompressed bytes of its chunk; resident chunks may be flagged purgeable,
//! which makes them the first thing released by [`AssetCache::purge`] or when
//! the configured residency budget is exceeded.
//!
//! Graphics chunks additionally carry an 8-level "needed" mask used by the
//! batched sweep in [`AssetCache::cache_marks`].

mod audio;
mod map;
mod marks;

pub use marks::{MAX_LEVEL, SweepReport};

use idcache_formats::graphics::{self, parse_pic_table};
use idcache_formats::{MapHeader, PicSize};
use std::fs::File;
use std::io::{Read, Seek};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::directory::AssetDirectory;
use crate::io::{open_file, read_exact_at};
use crate::{AUDIO_DATA_FILE, GRAPHICS_DATA_FILE, MAP_DATA_FILE, Result, StorageError};

/// A chunk id qualified by its namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkId {
    /// Graphics chunk
    Graphics(usize),
    /// Map (all configured planes)
    Map(usize),
    /// Audio chunk
    Audio(usize),
}

/// Slot-backed chunk namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bank {
    Graphics,
    Audio,
}

/// Open data files the cache reads chunks from
#[derive(Debug)]
pub struct DataFiles<R> {
    /// Graphics data (`vgagraph`)
    pub graphics: R,
    /// Map data (`gamemaps`)
    pub maps: R,
    /// Audio data (`audiot`)
    pub audio: R,
}

impl DataFiles<File> {
    /// Open the data files named by `config`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            graphics: open_file(&config.file_path(GRAPHICS_DATA_FILE))?,
            maps: open_file(&config.file_path(MAP_DATA_FILE))?,
            audio: open_file(&config.file_path(AUDIO_DATA_FILE))?,
        })
    }
}

#[derive(Debug, Default)]
struct ChunkSlot {
    data: Option<Vec<u8>>,
    purgeable: bool,
}

/// Chunk cache over one installation's data files
#[derive(Debug)]
pub struct AssetCache<R: Read + Seek = File> {
    config: StorageConfig,
    directory: AssetDirectory,
    files: DataFiles<R>,
    scratch: Vec<u8>,
    pics: Vec<PicSize>,
    graphics: Vec<ChunkSlot>,
    marks: Vec<u8>,
    level: u8,
    map_headers: Vec<Option<MapHeader>>,
    current_map: Option<usize>,
    planes: Vec<Vec<u16>>,
    audio: Vec<ChunkSlot>,
    resident_bytes: usize,
}

impl AssetCache<File> {
    /// Load the directory and open the data files named by `config`.
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate().map_err(StorageError::Config)?;
        let directory = AssetDirectory::load(&config)?;
        let files = DataFiles::open(&config)?;
        Self::new(config, directory, files)
    }
}

impl<R: Read + Seek> AssetCache<R> {
    /// Build a cache from a loaded directory and open data sources.
    ///
    /// Reads every non-sparse map header and the picture size table.
    pub fn new(config: StorageConfig, directory: AssetDirectory, files: DataFiles<R>) -> Result<Self> {
        if directory.graphics.len() != config.graphics.num_chunks {
            return Err(StorageError::Config(format!(
                "graphics header has {} chunks, layout expects {}",
                directory.graphics.len(),
                config.graphics.num_chunks
            )));
        }

        let graphics_count = directory.graphics.len();
        let audio_count = directory.audio.len();
        let mut cache = Self {
            scratch: vec![0; config.scratch_buffer_size],
            pics: Vec::new(),
            graphics: (0..graphics_count).map(|_| ChunkSlot::default()).collect(),
            marks: vec![0; graphics_count],
            level: 0,
            map_headers: Vec::new(),
            current_map: None,
            planes: Vec::new(),
            audio: (0..audio_count).map(|_| ChunkSlot::default()).collect(),
            resident_bytes: 0,
            config,
            directory,
            files,
        };

        cache.load_map_headers()?;
        cache.load_pic_table()?;
        info!(
            "Asset cache ready: {} graphics, {} maps, {} audio chunks",
            graphics_count,
            cache.map_headers.iter().flatten().count(),
            audio_count
        );
        Ok(cache)
    }

    fn load_pic_table(&mut self) -> Result<()> {
        let layout = &self.config.graphics;
        if layout.num_pics == 0 {
            return Ok(());
        }
        let id = layout.struct_pic;
        let span = self
            .directory
            .resolve_graphics(id)?
            .ok_or(StorageError::Sparse {
                namespace: "picture table",
                id,
            })?;

        let mut source = vec![0u8; span.length as usize];
        read_exact_at(&mut self.files.graphics, span.offset.into(), &mut source)?;
        let (expanded, data) = graphics::split_length_prefix(&source)?;
        let table = self.directory.huffman.expand(data, expanded)?;
        self.pics = parse_pic_table(&table, layout.num_pics)?;
        debug!("Loaded {} picture sizes", self.pics.len());
        Ok(())
    }

    /// Configuration the cache was built with.
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Directory tables.
    pub const fn directory(&self) -> &AssetDirectory {
        &self.directory
    }

    /// Picture dimensions from the size table.
    pub fn pic_sizes(&self) -> &[PicSize] {
        &self.pics
    }

    /// Bytes held by resident graphics and audio chunks.
    pub const fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    /// Load any chunk by qualified id.
    pub fn cache(&mut self, id: ChunkId) -> Result<()> {
        match id {
            ChunkId::Graphics(n) => self.cache_chunk(n),
            ChunkId::Map(n) => self.cache_map(n),
            ChunkId::Audio(n) => self.cache_audio_chunk(n),
        }
    }

    /// Make a graphics chunk resident.
    ///
    /// A resident chunk is only touched (its purge flag cleared). A sparse
    /// chunk is a no-op and stays absent.
    pub fn cache_chunk(&mut self, id: usize) -> Result<()> {
        let slot = self.graphics_slot_mut(id)?;
        if slot.data.is_some() {
            slot.purgeable = false;
            return Ok(());
        }

        let Some(span) = self.directory.resolve_graphics(id)? else {
            return Ok(());
        };
        let length = span.length as usize;

        let data = if length <= self.scratch.len() {
            read_exact_at(&mut self.files.graphics, span.offset.into(), &mut self.scratch[..length])?;
            self.expand_graphics(id, &self.scratch[..length])?
        } else {
            let mut temp = vec![0u8; length];
            read_exact_at(&mut self.files.graphics, span.offset.into(), &mut temp)?;
            self.expand_graphics(id, &temp)?
        };

        debug!("Cached graphics chunk {} ({} -> {} bytes)", id, length, data.len());
        self.store(Bank::Graphics, id, data);
        Ok(())
    }

    /// Release a graphics chunk. Releasing an absent chunk only warns.
    pub fn uncache_chunk(&mut self, id: usize) -> Result<()> {
        let slot = self.graphics_slot_mut(id)?;
        match slot.data.take() {
            Some(data) => {
                slot.purgeable = false;
                self.resident_bytes -= data.len();
                Ok(())
            }
            None => {
                warn!("Tried to uncache graphics chunk {} which is not cached", id);
                Ok(())
            }
        }
    }

    /// Decompressed bytes of a graphics chunk, `None` when absent.
    pub fn chunk(&self, id: usize) -> Option<&[u8]> {
        self.graphics.get(id)?.data.as_deref()
    }

    /// Whether a graphics chunk is resident.
    pub fn is_resident(&self, id: usize) -> bool {
        self.graphics.get(id).is_some_and(|s| s.data.is_some())
    }

    /// Whether a resident graphics chunk may be purged.
    pub fn is_purgeable(&self, id: usize) -> bool {
        self.graphics
            .get(id)
            .is_some_and(|s| s.data.is_some() && s.purgeable)
    }

    /// Release every purgeable chunk. Returns the number released.
    pub fn purge(&mut self) -> usize {
        let mut released = 0;
        for slot in self.graphics.iter_mut().chain(self.audio.iter_mut()) {
            if slot.purgeable
                && let Some(data) = slot.data.take()
            {
                slot.purgeable = false;
                self.resident_bytes -= data.len();
                released += 1;
            }
        }
        if released > 0 {
            debug!("Purged {} chunks", released);
        }
        released
    }

    fn expand_graphics(&self, id: usize, source: &[u8]) -> Result<Vec<u8>> {
        Ok(graphics::expand_chunk(
            &self.config.graphics,
            &self.directory.huffman,
            &self.pics,
            id,
            source,
        )?)
    }

    fn graphics_slot_mut(&mut self, id: usize) -> Result<&mut ChunkSlot> {
        let count = self.graphics.len();
        self.graphics.get_mut(id).ok_or(StorageError::OutOfRange {
            namespace: "graphics chunk",
            id,
            count,
        })
    }

    /// Store a freshly loaded chunk as non-purgeable, releasing purgeable
    /// chunks first if the residency budget would be exceeded.
    fn store(&mut self, bank: Bank, id: usize, data: Vec<u8>) {
        if let Some(max) = self.config.max_resident_bytes {
            self.make_room(max, data.len());
        }
        let slots = match bank {
            Bank::Graphics => &mut self.graphics,
            Bank::Audio => &mut self.audio,
        };
        let Some(slot) = slots.get_mut(id) else {
            return;
        };
        self.resident_bytes += data.len();
        slot.data = Some(data);
        slot.purgeable = false;
    }

    /// Release purgeable chunks in ascending id order, graphics before
    /// audio, until `incoming` more bytes fit in `max`.
    fn make_room(&mut self, max: usize, incoming: usize) {
        let mut released = 0;
        for slot in self.graphics.iter_mut().chain(self.audio.iter_mut()) {
            if self.resident_bytes + incoming <= max {
                break;
            }
            if slot.purgeable
                && let Some(data) = slot.data.take()
            {
                slot.purgeable = false;
                self.resident_bytes -= data.len();
                released += 1;
            }
        }
        if released > 0 {
            debug!("Released {} purgeable chunks to stay within {} bytes", released, max);
        }
        if self.resident_bytes + incoming > max {
            debug!(
                "Residency budget exceeded: {} + {} > {} bytes",
                self.resident_bytes, incoming, max
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use idcache_formats::test_utils::{build_huffman_table, huffman_encode};
    use idcache_formats::{GraphicsLayout, HuffmanTable, MapHead, OffsetTable};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    /// In-memory installation: graphics chunks with optional gaps, no pics.
    pub(crate) struct Fixture {
        pub config: StorageConfig,
        pub directory: AssetDirectory,
        pub files: DataFiles<Cursor<Vec<u8>>>,
        pub payloads: Vec<Option<Vec<u8>>>,
    }

    /// Build a fixture; `None` payloads are sparse, `gap` unneeded bytes
    /// follow each chunk.
    pub(crate) fn fixture(payloads: Vec<Option<Vec<u8>>>, gap: usize) -> Fixture {
        let all: Vec<u8> = payloads.iter().flatten().flatten().copied().collect();
        let table: HuffmanTable = build_huffman_table(&all);

        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for payload in &payloads {
            match payload {
                Some(bytes) => {
                    offsets.push(Some(data.len() as u32));
                    data.extend((bytes.len() as i32).to_le_bytes());
                    data.extend(huffman_encode(&table, bytes));
                    data.extend(std::iter::repeat_n(0xEE, gap));
                }
                None => offsets.push(None),
            }
        }
        offsets.push(Some(data.len() as u32));

        let count = payloads.len();
        let mut config = StorageConfig::default().with_graphics(GraphicsLayout {
            num_chunks: count,
            struct_pic: 0,
            start_pics: 0,
            num_pics: 0,
            start_tile8: count,
            num_tile8: 0,
            start_externs: count,
        });
        config.num_maps = 0;

        let directory = AssetDirectory::from_parts(
            table,
            OffsetTable::from_offsets(offsets).expect("offsets"),
            MapHead::from_bytes(&[0xCD, 0xAB]).expect("map head"),
            OffsetTable::from_offsets(vec![Some(0)]).expect("audio"),
        );
        let files = DataFiles {
            graphics: Cursor::new(data),
            maps: Cursor::new(Vec::new()),
            audio: Cursor::new(Vec::new()),
        };
        Fixture {
            config,
            directory,
            files,
            payloads,
        }
    }

    impl Fixture {
        pub(crate) fn build(self) -> AssetCache<Cursor<Vec<u8>>> {
            AssetCache::new(self.config, self.directory, self.files).expect("cache")
        }
    }

    fn payload(len: usize, seed: u8) -> Option<Vec<u8>> {
        Some((0..len).map(|i| seed.wrapping_add((i % 13) as u8)).collect())
    }

    #[test]
    fn test_sparse_chunk_stays_absent() {
        let f = fixture(vec![payload(40, 1), payload(10, 2), None, payload(300, 3)], 0);
        let expected = f.payloads.clone();
        let mut cache = f.build();

        for id in 0..4 {
            cache.cache_chunk(id).expect("cache");
        }
        assert_eq!(cache.chunk(2), None);
        assert!(!cache.is_resident(2));
        for id in [0, 1, 3] {
            assert_eq!(cache.chunk(id), expected[id].as_deref());
        }
        assert_eq!(cache.resident_bytes(), 350);
    }

    #[test]
    fn test_cache_resident_chunk_clears_purge_flag() {
        let mut cache = fixture(vec![payload(16, 0)], 0).build();
        cache.cache_chunk(0).expect("cache");
        cache.graphics[0].purgeable = true;
        cache.cache_chunk(0).expect("touch");
        assert!(!cache.is_purgeable(0));
    }

    #[test]
    fn test_large_chunk_uses_temporary_buffer() {
        let mut f = fixture(vec![payload(64, 0), payload(5000, 9)], 0);
        f.config.scratch_buffer_size = 16;
        let expected = f.payloads[1].clone();
        let mut cache = f.build();
        cache.cache_chunk(1).expect("cache");
        assert_eq!(cache.chunk(1), expected.as_deref());
    }

    #[test]
    fn test_uncache_absent_chunk_is_not_fatal() {
        let mut cache = fixture(vec![payload(16, 0), payload(8, 1)], 0).build();
        cache.uncache_chunk(1).expect("warn only");
        cache.cache_chunk(1).expect("cache");
        cache.uncache_chunk(1).expect("release");
        assert!(!cache.is_resident(1));
        assert_eq!(cache.resident_bytes(), 0);
    }

    #[test]
    fn test_out_of_range_chunk_is_fatal() {
        let mut cache = fixture(vec![payload(16, 0)], 0).build();
        assert!(matches!(
            cache.cache_chunk(1),
            Err(StorageError::OutOfRange { id: 1, count: 1, .. })
        ));
        assert!(cache.uncache_chunk(5).is_err());
    }

    #[test]
    fn test_purge_releases_only_purgeable() {
        let mut cache = fixture(vec![payload(16, 0), payload(8, 1)], 0).build();
        cache.cache(ChunkId::Graphics(0)).expect("cache");
        cache.cache(ChunkId::Graphics(1)).expect("cache");
        cache.graphics[0].purgeable = true;

        assert_eq!(cache.purge(), 1);
        assert!(!cache.is_resident(0));
        assert!(cache.is_resident(1));
        assert_eq!(cache.resident_bytes(), 8);
    }

    #[test]
    fn test_budget_releases_purgeable_in_id_order() {
        let mut f = fixture(vec![payload(100, 0), payload(100, 1), payload(100, 2)], 0);
        f.config.max_resident_bytes = Some(250);
        let mut cache = f.build();

        cache.cache_chunk(0).expect("cache");
        cache.cache_chunk(1).expect("cache");
        cache.graphics[0].purgeable = true;
        cache.graphics[1].purgeable = true;

        cache.cache_chunk(2).expect("cache");
        assert!(!cache.is_resident(0));
        assert!(cache.is_resident(1));
        assert!(cache.is_resident(2));
        assert_eq!(cache.resident_bytes(), 200);
    }

    #[test]
    fn test_budget_overrun_without_purgeable_still_stores() {
        let mut f = fixture(vec![payload(100, 0), payload(100, 1)], 0);
        f.config.max_resident_bytes = Some(150);
        let mut cache = f.build();
        cache.cache_chunk(0).expect("cache");
        cache.cache_chunk(1).expect("cache");
        assert_eq!(cache.resident_bytes(), 200);
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let mut f = fixture(vec![payload(4, 0)], 0);
        f.config.graphics.num_chunks = 2;
        f.config.graphics.start_tile8 = 2;
        f.config.graphics.start_externs = 2;
        assert!(matches!(
            AssetCache::new(f.config, f.directory, f.files),
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn test_pic_table_loaded_and_pics_deplanarized() {
        // chunk 0: size table, chunk 1: one 4x2 planar pic
        let sizes = vec![4u8, 0, 2, 0];
        let planar = vec![0u8, 4, 1, 5, 2, 6, 3, 7];
        let mut f = fixture(vec![Some(sizes), Some(planar)], 0);
        f.config.graphics = GraphicsLayout {
            num_chunks: 2,
            struct_pic: 0,
            start_pics: 1,
            num_pics: 1,
            start_tile8: 2,
            num_tile8: 0,
            start_externs: 2,
        };
        let mut cache = f.build();
        assert_eq!(cache.pic_sizes(), &[PicSize {
            width: 4,
            height: 2
        }]);
        cache.cache_chunk(1).expect("cache");
        assert_eq!(cache.chunk(1), Some(&[0u8, 1, 2, 3, 4, 5, 6, 7][..]));
    }

    #[test]
    fn test_missing_pic_table_is_sparse_error() {
        let mut f = fixture(vec![None, payload(4, 0)], 0);
        f.config.graphics.num_pics = 1;
        f.config.graphics.start_pics = 1;
        assert!(matches!(
            AssetCache::new(f.config, f.directory, f.files),
            Err(StorageError::Sparse { .. })
        ));
    }

    #[test]
    fn test_truncated_data_is_short_read() {
        let mut f = fixture(vec![payload(40, 1), payload(40, 2)], 0);
        f.files.graphics.get_mut().truncate(20);
        let mut cache = f.build();
        assert!(matches!(
            cache.cache_chunk(1),
            Err(StorageError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_sparse_chunk_at_start_of_table() {
        let mut cache = fixture(vec![None, payload(4, 0)], 0).build();
        cache.cache_chunk(0).expect("no-op");
        cache.cache_chunk(1).expect("cache");
        assert!(cache.chunk(0).is_none());
        assert_eq!(cache.chunk(1).map(<[u8]>::len), Some(4));
    }
}
