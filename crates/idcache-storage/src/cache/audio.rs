//! Raw audio chunks

use std::io::{Read, Seek};
use tracing::{debug, warn};

use super::{AssetCache, Bank};
use crate::io::read_exact_at;
use crate::{Result, StorageError};

impl<R: Read + Seek> AssetCache<R> {
    /// Make an audio chunk resident. Audio is stored uncompressed.
    pub fn cache_audio_chunk(&mut self, id: usize) -> Result<()> {
        let count = self.audio.len();
        let slot = self.audio.get_mut(id).ok_or(StorageError::OutOfRange {
            namespace: "audio chunk",
            id,
            count,
        })?;
        if slot.data.is_some() {
            slot.purgeable = false;
            return Ok(());
        }

        let Some(span) = self.directory.resolve_audio(id)? else {
            return Ok(());
        };
        let mut data = vec![0u8; span.length as usize];
        read_exact_at(&mut self.files.audio, span.offset.into(), &mut data)?;
        debug!("Cached audio chunk {} ({} bytes)", id, data.len());
        self.store(Bank::Audio, id, data);
        Ok(())
    }

    /// Release an audio chunk. Releasing an absent chunk only warns.
    pub fn uncache_audio_chunk(&mut self, id: usize) -> Result<()> {
        let count = self.audio.len();
        let slot = self.audio.get_mut(id).ok_or(StorageError::OutOfRange {
            namespace: "audio chunk",
            id,
            count,
        })?;
        if let Some(data) = slot.data.take() {
            slot.purgeable = false;
            self.resident_bytes -= data.len();
        } else {
            warn!("Tried to uncache audio chunk {} which is not cached", id);
        }
        Ok(())
    }

    /// Cache every sound effect of the AdLib range.
    pub fn load_all_sounds(&mut self) -> Result<()> {
        let start = self.config.audio.start_adlib_sounds;
        for id in start..start + self.config.audio.num_sounds {
            self.cache_audio_chunk(id)?;
        }
        Ok(())
    }

    /// Bytes of an audio chunk, `None` when absent.
    pub fn audio_chunk(&self, id: usize) -> Option<&[u8]> {
        self.audio.get(id)?.data.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use crate::cache::tests::{Fixture, fixture};
    use crate::config::AudioLayout;
    use idcache_formats::OffsetTable;
    use pretty_assertions::assert_eq;

    fn with_audio(sounds: &[&[u8]]) -> Fixture {
        let mut f = fixture(vec![Some(vec![0])], 0);
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for sound in sounds {
            offsets.push(Some(data.len() as u32));
            data.extend_from_slice(sound);
        }
        offsets.push(Some(data.len() as u32));
        f.directory.audio = OffsetTable::from_offsets(offsets).expect("offsets");
        *f.files.audio.get_mut() = data;
        f.config.audio = AudioLayout {
            num_chunks: sounds.len(),
            start_adlib_sounds: 1,
            num_sounds: 2,
        };
        f
    }

    #[test]
    fn test_cache_and_uncache_audio() {
        let mut cache = with_audio(&[b"pc speaker", b"adlib", b"", b"digi"]).build();
        cache.cache_audio_chunk(1).expect("cache");
        assert_eq!(cache.audio_chunk(1), Some(&b"adlib"[..]));
        assert_eq!(cache.audio_chunk(0), None);

        cache.cache_audio_chunk(2).expect("empty chunk");
        assert_eq!(cache.audio_chunk(2), Some(&[][..]));

        cache.uncache_audio_chunk(1).expect("release");
        cache.uncache_audio_chunk(1).expect("warn only");
        assert_eq!(cache.audio_chunk(1), None);
        assert!(cache.cache_audio_chunk(4).is_err());
    }

    #[test]
    fn test_load_all_sounds() {
        let mut cache = with_audio(&[b"pc", b"ad1", b"ad2", b"digi"]).build();
        cache.load_all_sounds().expect("load");
        assert_eq!(cache.audio_chunk(0), None);
        assert_eq!(cache.audio_chunk(1), Some(&b"ad1"[..]));
        assert_eq!(cache.audio_chunk(2), Some(&b"ad2"[..]));
        assert_eq!(cache.audio_chunk(3), None);
        assert_eq!(cache.resident_bytes(), 6);
    }

    #[test]
    fn test_audio_through_qualified_id() {
        let mut cache = with_audio(&[b"one", b"two"]).build();
        cache.cache(crate::ChunkId::Audio(0)).expect("cache");
        assert_eq!(cache.audio_chunk(0), Some(&b"one"[..]));
    }

    #[test]
    fn test_resident_bytes_follow_graphics_and_audio() {
        let mut cache = with_audio(&[b"pc", b"adlib", b"", b"digi"]).build();
        cache.cache_chunk(0).expect("graphics");
        cache.cache_audio_chunk(1).expect("audio");
        assert_eq!(cache.resident_bytes(), 6);

        cache.cache_audio_chunk(1).expect("already resident");
        assert_eq!(cache.resident_bytes(), 6);

        cache.uncache_chunk(0).expect("graphics");
        cache.uncache_audio_chunk(1).expect("audio");
        assert_eq!(cache.resident_bytes(), 0);
    }
}
