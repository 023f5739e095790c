//! Write-back LRU cache of decoded inode records, layered on top of the
//! block cache.
//!
//! Shaped the same way as [`block_cache::BlockCache`] (an arena of slots,
//! a hash map index, and an intrusive LRU list), but the unit of caching is
//! a decoded [`fs_types::Inode`] rather than a raw sector, and eviction
//! writes the inode back into the block cache (not straight to the device):
//! the block cache's own dirty tracking and `sync` are what eventually
//! reach the device.

use std::{cell::RefCell, collections::HashMap};

use block_cache::{BlockCache, BlockDevice};
use dataview::PodMethods as _;
use fs_types::{Inode, InodeNum, SuperBlock, SECTOR_SIZE};

struct Slot {
    inum: InodeNum,
    dirty: bool,
    data: Inode,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner {
    capacity: usize,
    slots: Vec<Slot>,
    index: HashMap<InodeNum, usize>,
    mru: Option<usize>,
    lru: Option<usize>,
}

impl Inner {
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

/// A write-back LRU cache of inode records, backed by a [`BlockCache`].
pub struct InodeCache<Device> {
    blocks: BlockCache<Device, SECTOR_SIZE>,
    sb: SuperBlock,
    inner: RefCell<Inner>,
}

impl<Device> InodeCache<Device>
where
    Device: BlockDevice<SECTOR_SIZE>,
{
    /// Creates an inode cache with a fixed `capacity` of resident inodes,
    /// on top of an already-constructed block cache.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(blocks: BlockCache<Device, SECTOR_SIZE>, sb: SuperBlock, capacity: usize) -> Self {
        assert!(capacity > 0, "inode cache capacity must be positive");
        Self {
            blocks,
            sb,
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
    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    pub fn block_cache_mut(&mut self) -> &mut BlockCache<Device, SECTOR_SIZE> {
        &mut self.blocks
    }

    /// Consumes the cache and returns the underlying device. Callers that
    /// care about durability should [`Self::sync`] first.
    pub fn into_device(self) -> Device {
        self.blocks.into_device()
    }

    /// Reads inode `inum`, reading through the block cache on a miss.
    ///
    /// # Errors
    ///
    /// Returns the device error if the backing sector read or an eviction
    /// writeback fails.
    pub fn get_inode(&mut self, inum: InodeNum) -> Result<Inode, Device::Error> {
        if let Some(&slot) = self.inner.borrow().index.get(&inum) {
            self.inner.borrow_mut().touch(slot);
            return Ok(self.inner.borrow().slots[slot].data);
        }

        let sector_no = self.sb.inode_sector(inum);
        let offset = self.sb.inode_offset(inum);
        let sector = self.blocks.get_block(sector_no)?;
        let inode: Inode = *sector.as_data_view().get(offset);

        let capacity = self.inner.borrow().capacity;
        let slot = if self.inner.borrow().slots.len() < capacity {
            let idx = self.inner.borrow().slots.len();
            self.inner.borrow_mut().slots.push(Slot {
                inum,
                dirty: false,
                data: inode,
                prev: None,
                next: None,
            });
            idx
        } else {
            self.evict_lru()?
        };

        let mut inner = self.inner.borrow_mut();
        inner.slots[slot].inum = inum;
        inner.slots[slot].dirty = false;
        inner.slots[slot].data = inode;
        inner.index.insert(inum, slot);
        inner.push_mru(slot);
        drop(inner);

        Ok(inode)
    }

    /// Writes `inode` into the cached copy of `inum` and marks it dirty.
    /// `inum` must already be resident (callers obtain it via
    /// [`Self::get_inode`] first).
    ///
    /// # Panics
    ///
    /// Panics if `inum` is not resident.
    pub fn put_inode(&mut self, inum: InodeNum, inode: Inode) {
        let slot = *self
            .inner
            .borrow()
            .index
            .get(&inum)
            .expect("put_inode on a non-resident inode");
        let mut inner = self.inner.borrow_mut();
        inner.slots[slot].data = inode;
        inner.slots[slot].dirty = true;
    }

    fn evict_lru(&mut self) -> Result<usize, Device::Error> {
        let lru = self.inner.borrow().lru.expect("cache is non-empty");
        let (inum, dirty, data) = {
            let inner = self.inner.borrow();
            let s = &inner.slots[lru];
            (s.inum, s.dirty, s.data)
        };
        if dirty {
            self.writeback(inum, data)?;
        }
        let mut inner = self.inner.borrow_mut();
        inner.index.remove(&inum);
        inner.unlink(lru);
        Ok(lru)
    }

    fn writeback(&mut self, inum: InodeNum, data: Inode) -> Result<(), Device::Error> {
        let sector_no = self.sb.inode_sector(inum);
        let offset = self.sb.inode_offset(inum);
        let mut sector = self.blocks.get_block(sector_no)?;
        *sector.as_data_view_mut().get_mut(offset) = data;
        self.blocks.put_block(sector_no, sector);
        tracing::trace!(inode = inum, "evicted dirty inode, wrote back to block cache");
        Ok(())
    }

    /// Writes every dirty inode back into the block cache, then flushes the
    /// block cache through to the device.
    ///
    /// # Errors
    ///
    /// Returns the first device error encountered.
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
            let (inum, dirty, data) = {
                let inner = self.inner.borrow();
                let s = &inner.slots[slot];
                (s.inum, s.dirty, s.data)
            };
            if dirty {
                self.writeback(inum, data)?;
                self.inner.borrow_mut().slots[slot].dirty = false;
            }
        }
        self.blocks.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use fs_types::{InodeType, ROOTINODE};

    fn fresh_cache(num_sectors: usize, inode_cache_cap: usize) -> InodeCache<MemDevice> {
        let sb = SuperBlock {
            num_blocks: i32::try_from(num_sectors).unwrap(),
            num_inodes: 64,
        };
        let device = MemDevice::new(num_sectors);
        let blocks = BlockCache::new(device, 8);
        InodeCache::new(blocks, sb, inode_cache_cap)
    }

    #[test]
    fn roundtrips_through_eviction() {
        let mut cache = fresh_cache(64, 2);
        let mut root = cache.get_inode(ROOTINODE).unwrap();
        root.ty = InodeType::Directory as i16;
        root.nlink = 2;
        cache.put_inode(ROOTINODE, root);

        // Evict by touching two more distinct inodes.
        cache.get_inode(2).unwrap();
        cache.get_inode(3).unwrap();

        let reread = cache.get_inode(ROOTINODE).unwrap();
        assert_eq!(reread.kind(), Some(InodeType::Directory));
        assert_eq!(reread.nlink, 2);
    }

    #[test]
    fn sync_persists_to_device() {
        let mut cache = fresh_cache(64, 4);
        let mut root = cache.get_inode(ROOTINODE).unwrap();
        root.ty = InodeType::Directory as i16;
        cache.put_inode(ROOTINODE, root);
        cache.sync().unwrap();

        let sb = *cache.superblock();
        let sector = cache
            .block_cache_mut()
            .get_block(sb.inode_sector(ROOTINODE))
            .unwrap();
        let reread: Inode = *sector.as_data_view().get(sb.inode_offset(ROOTINODE));
        assert_eq!(reread.kind(), Some(InodeType::Directory));
    }
}
