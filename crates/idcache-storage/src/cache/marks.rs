//! Needed marks, nesting levels and the batched sweep

use idcache_formats::ChunkSpan;
use std::io::{Read, Seek};
use tracing::{debug, info};

use super::{AssetCache, Bank};
use crate::io::read_exact_at;
use crate::{Result, StorageError};

/// Highest nesting level.
pub const MAX_LEVEL: u8 = 7;

/// Outcome of one [`AssetCache::cache_marks`] sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Chunks decompressed by this sweep
    pub loaded: usize,
    /// Resident chunks newly flagged purgeable
    pub marked_purgeable: usize,
    /// Disk reads issued
    pub reads: usize,
    /// Bytes read, including gaps between batched chunks
    pub bytes_read: usize,
}

impl<R: Read + Seek> AssetCache<R> {
    /// Current nesting level (0 is outermost).
    pub const fn level(&self) -> u8 {
        self.level
    }

    const fn level_bit(&self) -> u8 {
        1 << self.level
    }

    /// Mark a graphics chunk as needed at the current level.
    pub fn mark_chunk(&mut self, id: usize) -> Result<()> {
        let bit = self.level_bit();
        let count = self.marks.len();
        let mark = self.marks.get_mut(id).ok_or(StorageError::OutOfRange {
            namespace: "graphics chunk",
            id,
            count,
        })?;
        *mark |= bit;
        Ok(())
    }

    /// Whether a graphics chunk is needed at the current level.
    pub fn is_marked(&self, id: usize) -> bool {
        self.marks
            .get(id)
            .is_some_and(|&mark| mark & self.level_bit() != 0)
    }

    /// Clear the current level's mark on every chunk.
    pub fn clear_marks(&mut self) {
        let bit = self.level_bit();
        for mark in &mut self.marks {
            *mark &= !bit;
        }
    }

    /// Clear the marks of every level.
    pub fn clear_all_marks(&mut self) {
        self.marks.fill(0);
    }

    /// Enter a new nesting level.
    ///
    /// Every resident chunk becomes purgeable and the new level starts with
    /// no marks.
    pub fn up_level(&mut self) -> Result<()> {
        if self.level == MAX_LEVEL {
            return Err(StorageError::InvalidLevel(format!(
                "up past level {MAX_LEVEL}"
            )));
        }

        for slot in &mut self.graphics {
            if slot.data.is_some() {
                slot.purgeable = true;
            }
        }
        self.level += 1;
        let bit = self.level_bit();
        for mark in &mut self.marks {
            *mark &= !bit;
        }
        info!("Entered cache level {}", self.level);
        Ok(())
    }

    /// Leave the current nesting level and re-sweep for the level below.
    pub fn down_level(&mut self) -> Result<SweepReport> {
        if self.level == 0 {
            return Err(StorageError::InvalidLevel("down past level 0".to_string()));
        }
        self.level -= 1;
        info!("Returned to cache level {}", self.level);
        self.cache_marks()
    }

    fn needs_load(&self, id: usize, bit: u8) -> bool {
        self.marks[id] & bit != 0 && self.graphics[id].data.is_none()
    }

    /// Load every chunk marked at the current level and flag every other
    /// resident chunk purgeable.
    ///
    /// Small chunks are read through the scratch buffer in batched windows:
    /// a window grows forward over following needed chunks while the gap of
    /// unneeded bytes stays within `max_empty_read` and the window fits the
    /// scratch buffer. Running the sweep twice without changes in between
    /// loads nothing the second time.
    pub fn cache_marks(&mut self) -> Result<SweepReport> {
        let bit = self.level_bit();
        let mut report = SweepReport::default();
        let mut pending = 0;

        for (slot, &mark) in self.graphics.iter_mut().zip(&self.marks) {
            let needed = mark & bit != 0;
            match (slot.data.is_some(), needed) {
                (true, true) => slot.purgeable = false,
                (true, false) if !slot.purgeable => {
                    slot.purgeable = true;
                    report.marked_purgeable += 1;
                }
                (false, true) => pending += 1,
                _ => {}
            }
        }

        if pending == 0 {
            debug!(
                "Cache sweep at level {}: nothing to load, {} newly purgeable",
                self.level, report.marked_purgeable
            );
            return Ok(report);
        }

        // Byte range of the graphics file currently held in the scratch buffer
        let mut window: Option<(u32, u32)> = None;

        for id in 0..self.graphics.len() {
            if !self.needs_load(id, bit) {
                continue;
            }
            let Some(span) = self.directory.resolve_graphics(id)? else {
                continue;
            };
            let length = span.length as usize;

            let data = if length <= self.scratch.len() {
                let start = match window {
                    Some((start, end)) if start <= span.offset && end >= span.end() => start,
                    _ => {
                        let end = self.window_end(id, span, bit)?;
                        let size = (end - span.offset) as usize;
                        read_exact_at(
                            &mut self.files.graphics,
                            span.offset.into(),
                            &mut self.scratch[..size],
                        )?;
                        report.reads += 1;
                        report.bytes_read += size;
                        debug!("Batched read of {} bytes at {:#x}", size, span.offset);
                        window = Some((span.offset, end));
                        span.offset
                    }
                };
                let at = (span.offset - start) as usize;
                self.expand_graphics(id, &self.scratch[at..at + length])?
            } else {
                let mut temp = vec![0u8; length];
                read_exact_at(&mut self.files.graphics, span.offset.into(), &mut temp)?;
                report.reads += 1;
                report.bytes_read += length;
                self.expand_graphics(id, &temp)?
            };

            self.store(Bank::Graphics, id, data);
            report.loaded += 1;
        }

        info!(
            "Cache sweep at level {}: loaded {} chunks in {} reads ({} bytes), {} newly purgeable",
            self.level, report.loaded, report.reads, report.bytes_read, report.marked_purgeable
        );
        Ok(report)
    }

    /// End offset of a batched read starting at chunk `id`.
    fn window_end(&self, id: usize, span: ChunkSpan, bit: u8) -> Result<u32> {
        let count = self.graphics.len();
        let mut end = span.end();
        let mut next = id + 1;

        loop {
            while next < count && !self.needs_load(next, bit) {
                next += 1;
            }
            if next >= count {
                break;
            }
            let Some(candidate) = self.directory.resolve_graphics(next)? else {
                next += 1;
                continue;
            };

            let gap = candidate.offset.saturating_sub(end) as usize;
            let size = (candidate.end() - span.offset) as usize;
            if gap > self.config.max_empty_read || size > self.scratch.len() {
                break;
            }
            end = candidate.end();
            next += 1;
        }
        Ok(end)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use crate::StorageError;
    use crate::cache::SweepReport;
    use crate::cache::tests::fixture;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn payloads(count: usize, len: usize) -> Vec<Option<Vec<u8>>> {
        (0..count)
            .map(|c| Some((0..len).map(|i| (c * 31 + i % 7) as u8).collect()))
            .collect()
    }

    #[test]
    fn test_marks_per_level() {
        let mut cache = fixture(payloads(3, 8), 0).build();
        cache.mark_chunk(1).expect("mark");
        assert!(cache.is_marked(1));

        cache.up_level().expect("up");
        assert!(!cache.is_marked(1));
        cache.mark_chunk(2).expect("mark");

        cache.down_level().expect("down");
        assert!(cache.is_marked(1));
        assert!(!cache.is_marked(2));

        cache.clear_marks();
        assert!(!cache.is_marked(1));
        assert!(cache.mark_chunk(3).is_err());
    }

    #[test]
    fn test_clear_all_marks() {
        let mut cache = fixture(payloads(2, 8), 0).build();
        cache.mark_chunk(0).expect("mark");
        cache.up_level().expect("up");
        cache.mark_chunk(1).expect("mark");
        cache.clear_all_marks();
        assert!(!cache.is_marked(1));
        cache.down_level().expect("down");
        assert!(!cache.is_marked(0));
    }

    #[test]
    fn test_sweep_loads_marked_and_purges_others() {
        let f = fixture(payloads(4, 20), 0);
        let expected = f.payloads.clone();
        let mut cache = f.build();

        cache.cache_chunk(0).expect("cache");
        cache.mark_chunk(1).expect("mark");
        cache.mark_chunk(3).expect("mark");

        let report = cache.cache_marks().expect("sweep");
        assert_eq!(report.loaded, 2);
        assert_eq!(report.marked_purgeable, 1);
        assert!(cache.is_purgeable(0));
        assert_eq!(cache.chunk(1), expected[1].as_deref());
        assert_eq!(cache.chunk(3), expected[3].as_deref());
        assert!(!cache.is_resident(2));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let mut cache = fixture(payloads(6, 24), 4).build();
        cache.cache_chunk(5).expect("cache");
        for id in [0, 2, 3] {
            cache.mark_chunk(id).expect("mark");
        }

        let first = cache.cache_marks().expect("sweep");
        assert_eq!(first.loaded, 3);
        let resident: Vec<bool> = (0..6).map(|id| cache.is_resident(id)).collect();

        let second = cache.cache_marks().expect("sweep");
        assert_eq!(second, SweepReport::default());
        let after: Vec<bool> = (0..6).map(|id| cache.is_resident(id)).collect();
        assert_eq!(resident, after);
    }

    #[test]
    fn test_adjacent_chunks_share_one_read() {
        let mut cache = fixture(payloads(4, 16), 8).build();
        for id in 0..4 {
            cache.mark_chunk(id).expect("mark");
        }
        let report = cache.cache_marks().expect("sweep");
        assert_eq!(report.loaded, 4);
        assert_eq!(report.reads, 1);
    }

    #[test]
    fn test_gap_beyond_tolerance_splits_reads() {
        let mut f = fixture(payloads(3, 16), 64);
        f.config.max_empty_read = 16;
        let expected = f.payloads.clone();
        let mut cache = f.build();
        for id in 0..3 {
            cache.mark_chunk(id).expect("mark");
        }
        let report = cache.cache_marks().expect("sweep");
        assert_eq!(report.reads, 3);
        for id in 0..3 {
            assert_eq!(cache.chunk(id), expected[id].as_deref());
        }
    }

    #[test]
    fn test_window_limited_by_scratch_size() {
        let mut f = fixture(payloads(4, 40), 0);
        f.config.scratch_buffer_size = 64;
        let mut cache = f.build();
        for id in 0..4 {
            cache.mark_chunk(id).expect("mark");
        }
        let report = cache.cache_marks().expect("sweep");
        assert_eq!(report.loaded, 4);
        assert!(report.reads > 1);
        assert!(report.bytes_read <= 4 * 64);
    }

    #[test]
    fn test_skipped_unneeded_chunks_are_read_but_not_cached() {
        let mut cache = fixture(payloads(3, 12), 0).build();
        cache.mark_chunk(0).expect("mark");
        cache.mark_chunk(2).expect("mark");
        let report = cache.cache_marks().expect("sweep");
        assert_eq!(report.reads, 1);
        assert!(!cache.is_resident(1));
    }

    #[test]
    fn test_sparse_marked_chunk_is_skipped() {
        let mut data = payloads(3, 12);
        data[1] = None;
        let mut cache = fixture(data, 0).build();
        for id in 0..3 {
            cache.mark_chunk(id).expect("mark");
        }
        let report = cache.cache_marks().expect("sweep");
        assert_eq!(report.loaded, 2);
        assert!(cache.chunk(1).is_none());
    }

    #[test]
    fn test_up_level_makes_resident_purgeable() {
        let mut cache = fixture(payloads(2, 8), 0).build();
        cache.cache_chunk(0).expect("cache");
        cache.up_level().expect("up");
        assert!(cache.is_purgeable(0));
        assert_eq!(cache.level(), 1);
    }

    #[test]
    fn test_down_level_reloads_outer_needs() {
        let mut cache = fixture(payloads(3, 8), 0).build();
        cache.mark_chunk(0).expect("mark");
        cache.cache_marks().expect("sweep");

        cache.up_level().expect("up");
        cache.mark_chunk(1).expect("mark");
        cache.cache_marks().expect("sweep");
        cache.purge();
        assert!(!cache.is_resident(0));

        let report = cache.down_level().expect("down");
        assert_eq!(report.loaded, 1);
        assert!(cache.is_resident(0));
        assert!(cache.is_purgeable(1));
    }

    #[test]
    fn test_level_bounds() {
        let mut cache = fixture(payloads(1, 8), 0).build();
        assert!(matches!(
            cache.down_level(),
            Err(StorageError::InvalidLevel(_))
        ));
        for _ in 0..7 {
            cache.up_level().expect("up");
        }
        assert_eq!(cache.level(), 7);
        assert!(matches!(cache.up_level(), Err(StorageError::InvalidLevel(_))));
    }

    proptest! {
        #[test]
        fn prop_sweep_loads_exactly_marked_chunks(
            lens in prop::collection::vec(prop::option::weighted(0.8, 1usize..200), 1..12),
            marked in prop::collection::vec(any::<bool>(), 12),
            gap in 0usize..64,
            max_empty_read in 0usize..96,
            scratch in 16usize..600,
        ) {
            let data: Vec<Option<Vec<u8>>> = lens
                .iter()
                .enumerate()
                .map(|(c, len)| len.map(|n| (0..n).map(|i| (c * 17 + i % 5) as u8).collect()))
                .collect();
            let mut f = fixture(data, gap);
            f.config.max_empty_read = max_empty_read;
            f.config.scratch_buffer_size = scratch;
            let expected = f.payloads.clone();
            let mut cache = f.build();

            for id in 0..expected.len() {
                if marked[id] {
                    cache.mark_chunk(id).expect("mark");
                }
            }
            cache.cache_marks().expect("sweep");
            for (id, payload) in expected.iter().enumerate() {
                let want = if marked[id] { payload.as_deref() } else { None };
                prop_assert_eq!(cache.chunk(id), want);
            }
            prop_assert_eq!(cache.cache_marks().expect("sweep"), SweepReport::default());
        }
    }
}
