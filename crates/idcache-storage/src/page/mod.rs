//! Tiered page manager
//!
//! Pages of the page file (walls, sprites and digitized sounds) are paged
//! into fixed-size slots on demand. A miss takes a free primary slot, then a
//! free secondary slot, and otherwise evicts the least recently used
//! unlocked page from those two tiers. Evicted pages are parked in the
//! overflow arena when it has room so the next request is a copy rather than
//! a disk read.
//!
//! Recency is measured in frames. The frame counter belongs to the caller's
//! game loop and only moves through [`PageManager::advance_frame`].

mod store;

pub use store::{BackingStore, PageHandle, SlotPool, Tier};

use idcache_formats::{PageFileHeader, PageKind};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use tracing::{debug, info, warn};

use crate::config::{PageConfig, StorageConfig};
use crate::io::{open_file, read_exact_at};
use crate::{PAGE_FILE, Result, StorageError};

/// Page manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    /// Requests served from a fast tier
    pub hits: u64,
    /// Pages read from disk
    pub disk_loads: u64,
    /// Pages copied back from overflow
    pub promotions: u64,
    /// Pages displaced from a fast tier
    pub evictions: u64,
    /// Evicted pages parked in overflow
    pub overflow_copies: u64,
    /// Requests for a page evicted earlier in the same frame
    pub thrash_events: u64,
    /// Times the panic window was entered
    pub panics: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PageState {
    resident: Option<PageHandle>,
    locked: bool,
    last_frame: u64,
    evicted_frame: Option<u64>,
}

/// Demand pager over the page file
#[derive(Debug)]
pub struct PageManager<R: Read + Seek = File> {
    config: PageConfig,
    header: PageFileHeader,
    file: R,
    pages: Vec<PageState>,
    primary: SlotPool,
    secondary: SlotPool,
    overflow: SlotPool,
    frame: u64,
    thrash_count: u32,
    panic: Option<(u64, u64)>,
    stats: PageStats,
}

impl PageManager<File> {
    /// Open the page file named by `config`.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let file = open_file(&config.file_path(PAGE_FILE))?;
        Self::new(config.pages.clone(), file)
    }
}

impl<R: Read + Seek> PageManager<R> {
    /// Read the page directory and allocate the tiers.
    ///
    /// Fails when fewer than `min_pages` fast slots could be reserved.
    pub fn new(config: PageConfig, mut file: R) -> Result<Self> {
        config.validate().map_err(StorageError::Config)?;
        file.seek(SeekFrom::Start(0))?;
        let header = PageFileHeader::parse(&mut file)?;

        let primary = SlotPool::heap(Tier::Primary, config.page_size, config.primary_pages);
        let secondary = SlotPool::heap(Tier::Secondary, config.page_size, config.secondary_pages);
        let fast = primary.capacity() + secondary.capacity();
        if fast < config.min_pages {
            return Err(StorageError::ResourceExhausted(format!(
                "{} page slots available, {} required",
                fast, config.min_pages
            )));
        }
        let overflow = SlotPool::mapped(Tier::Overflow, config.page_size, config.overflow_pages);

        info!(
            "Page file: {} pages ({} walls, {} sprites, {} sounds); slots {}/{}/{}",
            header.page_count,
            header.sprite_start,
            header.sound_start - header.sprite_start,
            header.page_count - header.sound_start,
            primary.capacity(),
            secondary.capacity(),
            overflow.capacity()
        );

        Ok(Self {
            pages: vec![PageState::default(); usize::from(header.page_count)],
            config,
            header,
            file,
            primary,
            secondary,
            overflow,
            frame: 0,
            thrash_count: 0,
            panic: None,
            stats: PageStats::default(),
        })
    }

    /// Page file directory.
    pub const fn header(&self) -> &PageFileHeader {
        &self.header
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Classify a page index.
    pub fn kind(&self, index: usize) -> PageKind {
        self.header.kind(index)
    }

    /// Counters since startup.
    pub const fn stats(&self) -> PageStats {
        self.stats
    }

    /// Current frame.
    pub const fn frame(&self) -> u64 {
        self.frame
    }

    /// Whether the panic window is open.
    pub fn in_panic(&self) -> bool {
        self.panic_start().is_some()
    }

    fn panic_start(&self) -> Option<u64> {
        self.panic
            .filter(|&(_, until)| self.frame <= until)
            .map(|(start, _)| start)
    }

    /// Advance the LRU clock by one frame.
    pub fn advance_frame(&mut self) {
        self.frame += 1;
        self.thrash_count = 0;
        if let Some((_, until)) = self.panic
            && self.frame > until
        {
            self.panic = None;
            debug!("Page panic window closed at frame {}", self.frame);
        }
    }

    /// Tier a page currently occupies.
    pub fn residency(&self, index: usize) -> Option<Tier> {
        self.pages.get(index)?.resident.map(|h| h.tier)
    }

    /// Whether a page is pinned.
    pub fn is_locked(&self, index: usize) -> bool {
        self.pages.get(index).is_some_and(|p| p.locked)
    }

    /// Pin a page so it is never chosen for eviction.
    pub fn lock_page(&mut self, index: usize) -> Result<()> {
        self.state_mut(index)?.locked = true;
        Ok(())
    }

    /// Unpin a page. Unlocking an unlocked page only warns.
    pub fn unlock_page(&mut self, index: usize) -> Result<()> {
        let state = self.state_mut(index)?;
        if !state.locked {
            warn!("Tried to unlock page {} which is not locked", index);
        }
        state.locked = false;
        Ok(())
    }

    /// Pin every page in `range`.
    pub fn lock_range(&mut self, range: Range<usize>) -> Result<()> {
        for index in range {
            self.lock_page(index)?;
        }
        Ok(())
    }

    /// Unpin every page in `range`.
    pub fn unlock_range(&mut self, range: Range<usize>) -> Result<()> {
        for index in range {
            self.unlock_page(index)?;
        }
        Ok(())
    }

    /// Page `n` of the sprite range.
    pub fn sprite_page(&mut self, n: usize) -> Result<&[u8]> {
        self.get_page(usize::from(self.header.sprite_start) + n)
    }

    /// Page `n` of the sound range.
    pub fn sound_page(&mut self, n: usize) -> Result<&[u8]> {
        self.get_page(usize::from(self.header.sound_start) + n)
    }

    /// Bytes of a page, paging it in if needed.
    ///
    /// An out-of-range index or a sparse page is fatal.
    pub fn get_page(&mut self, index: usize) -> Result<&[u8]> {
        let length = self.entry_length(index)?;
        let state = self.pages[index];

        let handle = match state.resident {
            Some(handle) if handle.tier != Tier::Overflow => {
                self.stats.hits += 1;
                handle
            }
            Some(parked) => {
                self.note_reload(index, state);
                self.promote(index, parked)?
            }
            None => {
                self.note_reload(index, state);
                self.load(index)?
            }
        };

        self.pages[index].last_frame = self.frame;
        let slot = self
            .store(handle.tier)
            .read(handle.slot)
            .ok_or_else(|| StorageError::InvalidFormat(format!("page {index} lost its slot")))?;
        Ok(&slot[..length])
    }

    /// Fill free slots of every tier from cold, reporting progress after each
    /// page. The last report always has `loaded == total`.
    pub fn preload<F: FnMut(usize, usize)>(&mut self, mut progress: F) -> Result<()> {
        let free = (self.primary.capacity() - self.primary.in_use())
            + (self.secondary.capacity() - self.secondary.in_use())
            + (self.overflow.capacity() - self.overflow.in_use());
        let candidates: Vec<usize> = (0..self.pages.len())
            .filter(|&i| self.pages[i].resident.is_none())
            .filter(|&i| self.header.entry(i).is_some_and(|e| !e.is_sparse()))
            .take(free)
            .collect();

        let total = candidates.len();
        if total == 0 {
            progress(1, 1);
            return Ok(());
        }

        for (done, index) in candidates.into_iter().enumerate() {
            let length = self.entry_length(index)?;
            let handle = self.alloc_free().ok_or_else(|| {
                StorageError::ResourceExhausted("preload ran out of free slots".to_string())
            })?;
            self.read_into(index, handle, length)?;
            self.pages[index].resident = Some(handle);
            self.pages[index].last_frame = self.frame;
            self.stats.disk_loads += 1;
            progress(done + 1, total);
        }
        info!("Preloaded {} pages", total);
        Ok(())
    }

    fn state_mut(&mut self, index: usize) -> Result<&mut PageState> {
        let count = self.pages.len();
        self.pages.get_mut(index).ok_or(StorageError::OutOfRange {
            namespace: "page",
            id: index,
            count,
        })
    }

    fn entry_length(&self, index: usize) -> Result<usize> {
        let entry = self.header.entry(index).ok_or(StorageError::OutOfRange {
            namespace: "page",
            id: index,
            count: self.pages.len(),
        })?;
        if entry.is_sparse() {
            return Err(StorageError::Sparse {
                namespace: "page",
                id: index,
            });
        }
        let length = usize::from(entry.length);
        if length > self.config.page_size {
            return Err(StorageError::InvalidFormat(format!(
                "page {} is {} bytes, slots hold {}",
                index, length, self.config.page_size
            )));
        }
        Ok(length)
    }

    fn store(&self, tier: Tier) -> &SlotPool {
        match tier {
            Tier::Primary => &self.primary,
            Tier::Secondary => &self.secondary,
            Tier::Overflow => &self.overflow,
        }
    }

    fn store_mut(&mut self, tier: Tier) -> &mut SlotPool {
        match tier {
            Tier::Primary => &mut self.primary,
            Tier::Secondary => &mut self.secondary,
            Tier::Overflow => &mut self.overflow,
        }
    }

    fn alloc_free(&mut self) -> Option<PageHandle> {
        [Tier::Primary, Tier::Secondary, Tier::Overflow]
            .into_iter()
            .find_map(|tier| {
                self.store_mut(tier)
                    .try_alloc()
                    .map(|slot| PageHandle { tier, slot })
            })
    }

    fn note_reload(&mut self, index: usize, state: PageState) {
        if state.evicted_frame != Some(self.frame) {
            return;
        }
        self.thrash_count += 1;
        self.stats.thrash_events += 1;
        if self.thrash_count >= self.config.thrash_threshold && !self.in_panic() {
            self.panic = Some((self.frame, self.frame + self.config.panic_cooldown_frames));
            self.stats.panics += 1;
            warn!(
                "Page thrashing at frame {} (page {}), panic window for {} frames",
                self.frame, index, self.config.panic_cooldown_frames
            );
        }
    }

    fn read_into(&mut self, index: usize, handle: PageHandle, length: usize) -> Result<()> {
        let offset = self.header.offsets[index];
        let slot = match handle.tier {
            Tier::Primary => self.primary.write(handle.slot),
            Tier::Secondary => self.secondary.write(handle.slot),
            Tier::Overflow => self.overflow.write(handle.slot),
        }
        .ok_or_else(|| StorageError::InvalidFormat(format!("page {index} has no slot")))?;
        read_exact_at(&mut self.file, offset.into(), &mut slot[..length])
    }

    /// Read a page from disk into a fast slot.
    fn load(&mut self, index: usize) -> Result<PageHandle> {
        let length = self.entry_length(index)?;
        let handle = self.fast_slot()?;
        self.read_into(index, handle, length)?;
        self.pages[index].resident = Some(handle);
        self.stats.disk_loads += 1;
        debug!("Paged in {} to {:?} slot {}", index, handle.tier, handle.slot);
        Ok(handle)
    }

    /// Copy a parked page back into a fast slot.
    fn promote(&mut self, index: usize, parked: PageHandle) -> Result<PageHandle> {
        let handle = self.fast_slot()?;
        let (Some(src), Some(dest)) = (
            self.overflow.read(parked.slot),
            match handle.tier {
                Tier::Primary => self.primary.write(handle.slot),
                _ => self.secondary.write(handle.slot),
            },
        ) else {
            return Err(StorageError::InvalidFormat(format!(
                "page {index} lost its overflow slot"
            )));
        };
        dest.copy_from_slice(src);
        self.overflow.free(parked.slot);
        self.pages[index].resident = Some(handle);
        self.stats.promotions += 1;
        debug!("Promoted page {} from overflow to {:?}", index, handle.tier);
        Ok(handle)
    }

    /// A primary or secondary slot, evicting if both are full.
    fn fast_slot(&mut self) -> Result<PageHandle> {
        if let Some(slot) = self.primary.try_alloc() {
            return Ok(PageHandle {
                tier: Tier::Primary,
                slot,
            });
        }
        if let Some(slot) = self.secondary.try_alloc() {
            return Ok(PageHandle {
                tier: Tier::Secondary,
                slot,
            });
        }

        self.evict_victim()
    }

    /// Least recently used unlocked page in a fast tier. While panicking,
    /// pages evicted since the panic began are only taken when nothing else
    /// is left.
    fn select_victim(&self) -> Option<usize> {
        let panic_start = self.panic_start();
        self.pages
            .iter()
            .enumerate()
            .filter(|&(_, p)| {
                !p.locked && p.resident.is_some_and(|h| h.tier != Tier::Overflow)
            })
            .min_by_key(|&(i, p)| {
                let thrashed = panic_start
                    .zip(p.evicted_frame)
                    .is_some_and(|(start, evicted)| evicted >= start);
                (thrashed, p.last_frame, i)
            })
            .map(|(i, _)| i)
    }

    /// Evict the LRU victim and hand its slot over.
    fn evict_victim(&mut self) -> Result<PageHandle> {
        let victim = self.select_victim().ok_or_else(|| {
            StorageError::ResourceExhausted("every page slot is locked".to_string())
        })?;
        let Some(handle) = self.pages[victim].resident else {
            return Err(StorageError::InvalidFormat(format!(
                "victim page {victim} is not resident"
            )));
        };

        let parked = self.park(handle);
        self.pages[victim].resident = parked;
        self.pages[victim].evicted_frame = Some(self.frame);
        self.stats.evictions += 1;
        if parked.is_some() {
            self.stats.overflow_copies += 1;
        }
        debug!(
            "Evicted page {} from {:?} slot {}{}",
            victim,
            handle.tier,
            handle.slot,
            if parked.is_some() { " to overflow" } else { "" }
        );
        Ok(handle)
    }

    /// Copy a fast slot into a free overflow slot, if there is one.
    fn park(&mut self, handle: PageHandle) -> Option<PageHandle> {
        let slot = self.overflow.try_alloc()?;
        let src = match handle.tier {
            Tier::Primary => self.primary.read(handle.slot),
            Tier::Secondary => self.secondary.read(handle.slot),
            Tier::Overflow => None,
        };
        let copied = match (src, self.overflow.write(slot)) {
            (Some(src), Some(dest)) => {
                dest.copy_from_slice(src);
                true
            }
            _ => false,
        };
        if copied {
            Some(PageHandle {
                tier: Tier::Overflow,
                slot,
            })
        } else {
            self.overflow.free(slot);
            None
        }
    }
}
