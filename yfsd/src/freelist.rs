//! Free inode and free block allocators.
//!
//! The on-disk image carries no persistent free list; instead the server
//! rebuilds one at startup by scanning every inode and marking the blocks it
//! references as taken. Once built, both lists live purely in memory as
//! LIFO stacks of numbers.

use std::collections::HashSet;

use block_cache::BlockDevice;
use fs_types::{BlockNum, IndirectBlock, InodeNum, SuperBlock, SECTOR_SIZE, ROOTINODE};

use crate::inode_cache::InodeCache;

/// In-memory free inode and free block allocators, rebuilt at startup.
pub struct FreeLists {
    free_blocks: Vec<BlockNum>,
    free_inodes: Vec<InodeNum>,
}

impl FreeLists {
    /// Scans the whole inode table, marking every block any live inode
    /// references as used, then collects whatever is left over into the two
    /// free lists.
    ///
    /// # Errors
    ///
    /// Returns the device error if a sector read fails partway through the
    /// scan.
    pub fn bootstrap<Device>(inodes: &mut InodeCache<Device>) -> Result<Self, Device::Error>
    where
        Device: BlockDevice<SECTOR_SIZE>,
    {
        let sb: SuperBlock = *inodes.superblock();
        let mut used_blocks: HashSet<BlockNum> = (0..sb.first_data_block()).collect();
        let mut free_inodes = Vec::new();

        for inum in 1..sb.num_inodes as u32 {
            let inode = inodes.get_inode(inum)?;
            if inode.is_free() {
                if inum != ROOTINODE {
                    free_inodes.push(inum);
                }
                continue;
            }
            for direct in inode.direct {
                if direct != 0 {
                    used_blocks.insert(direct);
                }
            }
            if inode.indirect != 0 {
                used_blocks.insert(inode.indirect);
                let sector = inodes.block_cache_mut().get_block(inode.indirect)?;
                let indirect = IndirectBlock::from_sector(&sector);
                for i in 0..fs_types::Inode::num_indirect() {
                    let bn = indirect.get(i);
                    if bn != 0 {
                        used_blocks.insert(bn);
                    }
                }
            }
        }

        // Reverse so allocation hands out low numbers first; easier to
        // reason about in tests and disk dumps.
        let mut free_blocks: Vec<BlockNum> = (sb.first_data_block()..sb.num_blocks as u32)
            .filter(|b| !used_blocks.contains(b))
            .collect();
        free_blocks.reverse();
        free_inodes.reverse();

        Ok(Self {
            free_blocks,
            free_inodes,
        })
    }

    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    #[must_use]
    pub fn free_inode_count(&self) -> usize {
        self.free_inodes.len()
    }

    pub fn alloc_block(&mut self) -> Option<BlockNum> {
        self.free_blocks.pop()
    }

    pub fn free_block(&mut self, block: BlockNum) {
        debug_assert!(block != 0, "block 0 is never free");
        self.free_blocks.push(block);
    }

    pub fn alloc_inode(&mut self) -> Option<InodeNum> {
        self.free_inodes.pop()
    }

    pub fn free_inode(&mut self, inum: InodeNum) {
        debug_assert!(inum != 0 && inum != ROOTINODE, "inode 0/root is never free");
        self.free_inodes.push(inum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use block_cache::BlockCache;
    use fs_types::{Inode, InodeType};

    fn format(num_sectors: usize, num_inodes: i32) -> InodeCache<MemDevice> {
        let sb = SuperBlock {
            num_blocks: i32::try_from(num_sectors).unwrap(),
            num_inodes,
        };
        let device = MemDevice::new(num_sectors);
        let blocks = BlockCache::new(device, 16);
        let mut cache = InodeCache::new(blocks, sb, 16);

        let mut root = cache.get_inode(ROOTINODE).unwrap();
        root.ty = InodeType::Directory as i16;
        root.nlink = 2;
        root.direct[0] = sb.first_data_block();
        cache.put_inode(ROOTINODE, root);
        cache.sync().unwrap();
        cache
    }

    #[test]
    fn bootstrap_excludes_root_block_and_metadata() {
        let mut cache = format(64, 16);
        let sb = *cache.superblock();
        let free = FreeLists::bootstrap(&mut cache).unwrap();

        assert!(!free_blocks_contains(&free, 0));
        assert!(!free_blocks_contains(&free, sb.first_data_block()));
        assert_eq!(
            free.free_block_count(),
            (sb.num_blocks as u32 - sb.first_data_block() - 1) as usize
        );
    }

    #[test]
    fn bootstrap_excludes_root_inode() {
        let mut cache = format(64, 16);
        let free = FreeLists::bootstrap(&mut cache).unwrap();
        assert_eq!(free.free_inode_count(), 14);
    }

    #[test]
    fn alloc_and_free_roundtrip() {
        let mut cache = format(64, 16);
        let mut free = FreeLists::bootstrap(&mut cache).unwrap();
        let b = free.alloc_block().unwrap();
        let before = free.free_block_count();
        free.free_block(b);
        assert_eq!(free.free_block_count(), before + 1);
    }

    fn free_blocks_contains(free: &FreeLists, b: BlockNum) -> bool {
        free.free_blocks.contains(&b)
    }
}
