//! Write-back LRU cache over a fixed-size block device.
//!
//! The cache is an arena of slots indexed by a hash map (block number ->
//! slot index) with an intrusive doubly linked list threading the slots in
//! least-to-most-recently-used order. This avoids the untracked aliasing of
//! a hand-rolled intrusive pointer list while keeping lookup and LRU touches
//! O(1).
//!
//! Single-threaded by contract: callers serialize access to the cache
//! themselves (see the engine's request dispatch loop), so the cache uses
//! plain interior mutability rather than a lock.

use std::{cell::RefCell, collections::HashMap};

/// A raw block device addressed by sector number.
pub trait BlockDevice<const BLOCK_SIZE: usize> {
    type Error;

    fn read_sector(&mut self, n: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
    fn write_sector(&mut self, n: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
}

struct Slot<const BLOCK_SIZE: usize> {
    number: u32,
    dirty: bool,
    data: Box<[u8; BLOCK_SIZE]>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<const BLOCK_SIZE: usize> {
    capacity: usize,
    slots: Vec<Slot<BLOCK_SIZE>>,
    index: HashMap<u32, usize>,
    /// Most-recently-used end of the list.
    mru: Option<usize>,
    /// Least-recently-used end of the list.
    lru: Option<usize>,
}

impl<const BLOCK_SIZE: usize> Inner<BLOCK_SIZE> {
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.mru = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.lru = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_mru(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.mru;
        if let Some(old_mru) = self.mru {
            self.slots[old_mru].prev = Some(slot);
        }
        self.mru = Some(slot);
        if self.lru.is_none() {
            self.lru = Some(slot);
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.mru == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_mru(slot);
    }
}

/// A write-back LRU cache of fixed-size blocks.
pub struct BlockCache<Device, const BLOCK_SIZE: usize> {
    device: Device,
    inner: RefCell<Inner<BLOCK_SIZE>>,
}

impl<Device, const BLOCK_SIZE: usize> BlockCache<Device, BLOCK_SIZE>
where
    Device: BlockDevice<BLOCK_SIZE>,
{
    /// Creates a cache with a fixed `capacity` of resident blocks.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(device: Device, capacity: usize) -> Self {
        assert!(capacity > 0, "block cache capacity must be positive");
        Self {
            device,
            inner: RefCell::new(Inner {
                capacity,
                slots: Vec::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
                mru: None,
                lru: None,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity
    }

    /// Consumes the cache and returns the underlying device. Callers that
    /// care about durability should [`Self::sync`] first.
    pub fn into_device(self) -> Device {
        self.device
    }

    /// Returns a copy of block `n`'s contents, reading through to the
    /// device on a cache miss. On eviction of a dirty block, the evicted
    /// block is written back first.
    ///
    /// # Errors
    ///
    /// Returns the device error if a read or eviction writeback fails.
    pub fn get_block(&mut self, n: u32) -> Result<[u8; BLOCK_SIZE], Device::Error> {
        if let Some(&slot) = self.inner.borrow().index.get(&n) {
            self.inner.borrow_mut().touch(slot);
            return Ok(*self.inner.borrow().slots[slot].data);
        }

        let capacity = self.inner.borrow().capacity;
        let slot = if self.inner.borrow().slots.len() < capacity {
            let idx = self.inner.borrow().slots.len();
            self.inner.borrow_mut().slots.push(Slot {
                number: n,
                dirty: false,
                data: Box::new([0; BLOCK_SIZE]),
                prev: None,
                next: None,
            });
            idx
        } else {
            self.evict_lru()?
        };

        let mut buf = [0; BLOCK_SIZE];
        self.device.read_sector(n, &mut buf)?;

        {
            let mut inner = self.inner.borrow_mut();
            inner.slots[slot].number = n;
            inner.slots[slot].dirty = false;
            *inner.slots[slot].data = buf;
            inner.index.insert(n, slot);
            inner.push_mru(slot);
        }

        Ok(buf)
    }

    /// Writes `data` into the cached copy of block `n` and marks it dirty.
    /// The block must already be resident (callers obtain it via
    /// [`Self::get_block`] first).
    ///
    /// # Panics
    ///
    /// Panics if block `n` is not resident.
    pub fn put_block(&mut self, n: u32, data: [u8; BLOCK_SIZE]) {
        let slot = *self
            .inner
            .borrow()
            .index
            .get(&n)
            .expect("put_block on a non-resident block");
        let mut inner = self.inner.borrow_mut();
        *inner.slots[slot].data = data;
        inner.slots[slot].dirty = true;
    }

    /// Marks block `n` dirty without changing its contents.
    ///
    /// # Panics
    ///
    /// Panics if block `n` is not resident.
    pub fn mark_dirty(&mut self, n: u32) {
        let slot = *self
            .inner
            .borrow()
            .index
            .get(&n)
            .expect("mark_dirty on a non-resident block");
        self.inner.borrow_mut().slots[slot].dirty = true;
    }

    fn evict_lru(&mut self) -> Result<usize, Device::Error> {
        let lru = self.inner.borrow().lru.expect("cache is non-empty");
        let (number, dirty, data) = {
            let inner = self.inner.borrow();
            let s = &inner.slots[lru];
            (s.number, s.dirty, *s.data)
        };
        if dirty {
            self.device.write_sector(number, &data)?;
            tracing::trace!(block = number, "evicted dirty block, wrote back");
        }
        let mut inner = self.inner.borrow_mut();
        inner.index.remove(&number);
        inner.unlink(lru);
        Ok(lru)
    }

    /// Writes back every dirty block, in LRU order, clearing their dirty
    /// bits.
    ///
    /// # Errors
    ///
    /// Returns the first device error encountered; later dirty blocks are
    /// left untouched.
    pub fn sync(&mut self) -> Result<(), Device::Error> {
        let order: Vec<usize> = {
            let inner = self.inner.borrow();
            let mut order = Vec::with_capacity(inner.slots.len());
            let mut cur = inner.lru;
            while let Some(s) = cur {
                order.push(s);
                cur = inner.slots[s].prev;
            }
            order
        };
        for slot in order {
            let (number, dirty, data) = {
                let inner = self.inner.borrow();
                let s = &inner.slots[slot];
                (s.number, s.dirty, *s.data)
            };
            if dirty {
                self.device.write_sector(number, &data)?;
                self.inner.borrow_mut().slots[slot].dirty = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: usize = 8;

    #[derive(Default)]
    struct MemDevice {
        sectors: Vec<[u8; BLOCK_SIZE]>,
        reads: usize,
        writes: usize,
    }

    impl MemDevice {
        fn new(n: usize) -> Self {
            Self {
                sectors: vec![[0; BLOCK_SIZE]; n],
                reads: 0,
                writes: 0,
            }
        }
    }

    impl BlockDevice<BLOCK_SIZE> for MemDevice {
        type Error = std::convert::Infallible;

        fn read_sector(&mut self, n: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
            self.reads += 1;
            *buf = self.sectors[n as usize];
            Ok(())
        }

        fn write_sector(&mut self, n: u32, buf: &[u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
            self.writes += 1;
            self.sectors[n as usize] = *buf;
            Ok(())
        }
    }

    #[test]
    fn miss_then_hit_reads_device_once() {
        let mut cache: BlockCache<MemDevice, BLOCK_SIZE> = BlockCache::new(MemDevice::new(4), 2);
        cache.get_block(0).unwrap();
        cache.get_block(0).unwrap();
        assert_eq!(cache.device.reads, 1);
    }

    #[test]
    fn dirty_eviction_writes_back() {
        let mut cache: BlockCache<MemDevice, BLOCK_SIZE> = BlockCache::new(MemDevice::new(4), 2);
        cache.get_block(0).unwrap();
        cache.put_block(0, [1; BLOCK_SIZE]);
        cache.get_block(1).unwrap();
        // Fill cache, then evict slot holding block 0.
        cache.get_block(2).unwrap();
        assert_eq!(cache.device.writes, 1);
        assert_eq!(cache.device.sectors[0], [1; BLOCK_SIZE]);
    }

    #[test]
    fn sync_clears_dirty_bits() {
        let mut cache: BlockCache<MemDevice, BLOCK_SIZE> = BlockCache::new(MemDevice::new(4), 2);
        cache.get_block(0).unwrap();
        cache.put_block(0, [9; BLOCK_SIZE]);
        cache.sync().unwrap();
        assert_eq!(cache.device.sectors[0], [9; BLOCK_SIZE]);
        assert_eq!(cache.device.writes, 1);
        cache.sync().unwrap();
        assert_eq!(cache.device.writes, 1, "sync is idempotent on a clean cache");
    }

    #[test]
    fn lru_order_is_respected() {
        let mut cache: BlockCache<MemDevice, BLOCK_SIZE> = BlockCache::new(MemDevice::new(4), 2);
        cache.get_block(0).unwrap();
        cache.get_block(1).unwrap();
        cache.get_block(0).unwrap(); // touch 0, so 1 becomes LRU
        cache.get_block(2).unwrap(); // evicts 1, not 0
        assert_eq!(cache.device.reads, 3);
        cache.get_block(0).unwrap();
        assert_eq!(cache.device.reads, 3, "block 0 should still be resident");
        cache.get_block(1).unwrap();
        assert_eq!(cache.device.reads, 4, "block 1 should have been evicted");
    }
}
