//! Fixed-size page slot stores
//!
//! Each tier is a flat arena of `page_size` slots addressed by index. The
//! fast tiers live on the heap; the overflow tier is an anonymous memory map
//! so a large spill area does not count against the heap.

use memmap2::MmapMut;
use tracing::{debug, warn};

/// Storage tier of a resident page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Fastest in-process pool
    Primary,
    /// Second in-process pool
    Secondary,
    /// Spill arena; pages here are promoted before use
    Overflow,
}

/// Location of a resident page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle {
    /// Tier holding the page
    pub tier: Tier,
    /// Slot index within the tier
    pub slot: usize,
}

/// A fixed-capacity store of page-sized slots
pub trait BackingStore {
    /// Tier this store implements.
    fn tier(&self) -> Tier;

    /// Total slots.
    fn capacity(&self) -> usize;

    /// Slots currently allocated.
    fn in_use(&self) -> usize;

    /// Allocate a free slot, `None` when full.
    fn try_alloc(&mut self) -> Option<usize>;

    /// Return a slot to the free list.
    fn free(&mut self, slot: usize);

    /// Contents of an allocated slot.
    fn read(&self, slot: usize) -> Option<&[u8]>;

    /// Mutable contents of an allocated slot.
    fn write(&mut self, slot: usize) -> Option<&mut [u8]>;

    /// Whether every slot is allocated.
    fn is_full(&self) -> bool {
        self.in_use() == self.capacity()
    }
}

#[derive(Debug)]
enum Arena {
    Heap(Vec<u8>),
    Mapped(MmapMut),
}

impl Arena {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Heap(v) => v,
            Self::Mapped(m) => m,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Heap(v) => v,
            Self::Mapped(m) => m,
        }
    }
}

/// Arena-backed [`BackingStore`]
#[derive(Debug)]
pub struct SlotPool {
    tier: Tier,
    page_size: usize,
    arena: Arena,
    used: Vec<bool>,
    free: Vec<usize>,
}

impl SlotPool {
    fn with_arena(tier: Tier, page_size: usize, slots: usize, arena: Arena) -> Self {
        Self {
            tier,
            page_size,
            arena,
            used: vec![false; slots],
            free: (0..slots).rev().collect(),
        }
    }

    /// Heap pool of up to `slots` pages.
    ///
    /// When the full reservation fails the request is halved until it
    /// succeeds, so the returned pool may be smaller than asked for.
    pub fn heap(tier: Tier, page_size: usize, slots: usize) -> Self {
        let mut slots = slots;
        loop {
            let Some(len) = slots.checked_mul(page_size) else {
                slots /= 2;
                continue;
            };
            let mut buf = Vec::new();
            if buf.try_reserve_exact(len).is_ok() {
                buf.resize(len, 0);
                debug!("{:?} pool: {} slots of {} bytes", tier, slots, page_size);
                return Self::with_arena(tier, page_size, slots, Arena::Heap(buf));
            }
            warn!("{:?} pool: could not reserve {} slots", tier, slots);
            if slots == 0 {
                return Self::with_arena(tier, page_size, 0, Arena::Heap(Vec::new()));
            }
            slots /= 2;
        }
    }

    /// Pool backed by an anonymous memory map. A failed mapping yields an
    /// empty pool.
    pub fn mapped(tier: Tier, page_size: usize, slots: usize) -> Self {
        let len = slots.saturating_mul(page_size);
        if len == 0 {
            return Self::with_arena(tier, page_size, 0, Arena::Heap(Vec::new()));
        }
        match MmapMut::map_anon(len) {
            Ok(map) => {
                debug!("{:?} pool: mapped {} slots of {} bytes", tier, slots, page_size);
                Self::with_arena(tier, page_size, slots, Arena::Mapped(map))
            }
            Err(e) => {
                warn!("{:?} pool disabled, mapping {} bytes failed: {}", tier, len, e);
                Self::with_arena(tier, page_size, 0, Arena::Heap(Vec::new()))
            }
        }
    }

    fn range(&self, slot: usize) -> Option<std::ops::Range<usize>> {
        self.used
            .get(slot)
            .copied()
            .filter(|&used| used)
            .map(|_| slot * self.page_size..(slot + 1) * self.page_size)
    }
}

impl BackingStore for SlotPool {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn capacity(&self) -> usize {
        self.used.len()
    }

    fn in_use(&self) -> usize {
        self.used.len() - self.free.len()
    }

    fn try_alloc(&mut self) -> Option<usize> {
        let slot = self.free.pop()?;
        self.used[slot] = true;
        Some(slot)
    }

    fn free(&mut self, slot: usize) {
        if let Some(used) = self.used.get_mut(slot)
            && *used
        {
            *used = false;
            self.free.push(slot);
        }
    }

    fn read(&self, slot: usize) -> Option<&[u8]> {
        let range = self.range(slot)?;
        self.arena.bytes().get(range)
    }

    fn write(&mut self, slot: usize) -> Option<&mut [u8]> {
        let range = self.range(slot)?;
        self.arena.bytes_mut().get_mut(range)
    }
}
