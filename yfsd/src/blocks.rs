//! Logical-to-physical block mapping (`bmap`): turns a file-relative block
//! index into a device block number, growing the direct array and the
//! single indirect block on demand.

use block_cache::BlockDevice;
use fs_types::{BlockNum, IndirectBlock, Inode, SECTOR_SIZE};

use crate::{
    error::{EngineError, EngineResult},
    freelist::FreeLists,
    inode_cache::InodeCache,
};

/// Maximum logical block index addressable by an inode (direct + indirect).
#[must_use]
pub fn max_blocks() -> usize {
    fs_types::NUM_DIRECT + Inode::num_indirect()
}

/// Returns the device block number holding logical block `k` of `inode`,
/// allocating (and zeroing) a fresh block, and the indirect block itself if
/// needed, when `allocate` is set and the slot is currently empty.
/// Mutates `inode` in place when a new pointer is recorded; the caller is
/// responsible for writing the inode back to the cache.
///
/// # Errors
///
/// Returns [`EngineError::InvalidArgument`] if `k` is beyond what an inode
/// can address, [`EngineError::NoFreeBlocks`] if allocation is requested but
/// the free list is exhausted, or an I/O error from the underlying device.
pub fn bmap<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    inode: &mut Inode,
    k: usize,
    allocate: bool,
) -> EngineResult<Option<BlockNum>>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    if k < fs_types::NUM_DIRECT {
        let existing = inode.direct[k];
        if existing != 0 {
            return Ok(Some(existing));
        }
        if !allocate {
            return Ok(None);
        }
        let bn = alloc_zeroed(inodes, free)?;
        inode.direct[k] = bn;
        return Ok(Some(bn));
    }

    let indirect_k = k - fs_types::NUM_DIRECT;
    if indirect_k >= Inode::num_indirect() {
        return Err(EngineError::InvalidArgument);
    }

    let indirect_bn = if inode.indirect != 0 {
        inode.indirect
    } else {
        if !allocate {
            return Ok(None);
        }
        let bn = alloc_zeroed(inodes, free)?;
        inode.indirect = bn;
        bn
    };

    let sector = inodes
        .block_cache_mut()
        .get_block(indirect_bn)
        .map_err(io_err)?;
    let mut block = IndirectBlock::from_sector(&sector);
    let existing = block.get(indirect_k);
    if existing != 0 {
        return Ok(Some(existing));
    }
    if !allocate {
        return Ok(None);
    }
    let bn = alloc_zeroed(inodes, free)?;
    block.set(indirect_k, bn);
    let mut sector = sector;
    block.write_into(&mut sector);
    inodes.block_cache_mut().put_block(indirect_bn, sector);
    Ok(Some(bn))
}

fn alloc_zeroed<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
) -> EngineResult<BlockNum>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let bn = free.alloc_block().ok_or(EngineError::NoFreeBlocks)?;
    // Touch the block into the cache as all zeroes and mark it dirty so a
    // crash before the real payload is written never resurrects stale data.
    inodes.block_cache_mut().get_block(bn).map_err(io_err)?;
    inodes.block_cache_mut().put_block(bn, [0; SECTOR_SIZE]);
    Ok(bn)
}

pub(crate) fn io_err<E: std::fmt::Display>(e: E) -> EngineError {
    EngineError::Io(e.to_string())
}

/// Reads up to `buf.len()` bytes starting at byte `offset` of `inode`'s
/// data, stopping at the inode's recorded size. Returns the number of bytes
/// actually read.
///
/// # Errors
///
/// Returns [`EngineError::InvalidArgument`] if `offset` is past the end of
/// the file, or propagates device I/O errors.
pub fn read_at<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    inode: &mut Inode,
    offset: u32,
    buf: &mut [u8],
) -> EngineResult<usize>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let size = inode.size;
    if offset > size {
        return Err(EngineError::InvalidArgument);
    }
    if offset == size {
        return Ok(0);
    }
    let to_read = (buf.len() as u32).min(size - offset) as usize;
    let mut done = 0;
    while done < to_read {
        let pos = offset as usize + done;
        let k = pos / SECTOR_SIZE;
        let within = pos % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - within).min(to_read - done);
        match bmap(inodes, free, inode, k, false)? {
            Some(bn) => {
                let sector = inodes.block_cache_mut().get_block(bn).map_err(io_err)?;
                buf[done..done + chunk].copy_from_slice(&sector[within..within + chunk]);
            }
            None => buf[done..done + chunk].fill(0),
        }
        done += chunk;
    }
    Ok(done)
}

/// Writes `buf` starting at byte `offset` of `inode`'s data, allocating and
/// extending as needed, and growing `inode.size` to cover the write.
///
/// # Errors
///
/// Propagates allocation/I/O errors.
pub fn write_at<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    inode: &mut Inode,
    offset: u32,
    buf: &[u8],
) -> EngineResult<usize>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let mut done = 0;
    while done < buf.len() {
        let pos = offset as usize + done;
        let k = pos / SECTOR_SIZE;
        let within = pos % SECTOR_SIZE;
        let chunk = (SECTOR_SIZE - within).min(buf.len() - done);
        let bn = bmap(inodes, free, inode, k, true)?.expect("allocate=true always returns Some");
        let mut sector = inodes.block_cache_mut().get_block(bn).map_err(io_err)?;
        sector[within..within + chunk].copy_from_slice(&buf[done..done + chunk]);
        inodes.block_cache_mut().put_block(bn, sector);
        done += chunk;
    }
    let end = offset + done as u32;
    if end > inode.size {
        inode.size = end;
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use block_cache::BlockCache;
    use fs_types::{InodeType, SuperBlock, ROOTINODE};

    fn fresh(num_sectors: usize) -> (InodeCache<MemDevice>, FreeLists) {
        let sb = SuperBlock {
            num_blocks: i32::try_from(num_sectors).unwrap(),
            num_inodes: 32,
        };
        let device = MemDevice::new(num_sectors);
        let blocks = BlockCache::new(device, 16);
        let mut inodes = InodeCache::new(blocks, sb, 16);
        let mut root = inodes.get_inode(ROOTINODE).unwrap();
        root.ty = InodeType::Directory as i16;
        inodes.put_inode(ROOTINODE, root);
        inodes.sync().unwrap();
        let free = FreeLists::bootstrap(&mut inodes).unwrap();
        (inodes, free)
    }

    #[test]
    fn direct_blocks_allocate_lazily() {
        let (mut inodes, mut free) = fresh(128);
        let mut inode = inodes.get_inode(ROOTINODE).unwrap();
        assert_eq!(bmap(&mut inodes, &mut free, &mut inode, 0, false).unwrap(), None);
        let bn = bmap(&mut inodes, &mut free, &mut inode, 0, true).unwrap().unwrap();
        assert_ne!(bn, 0);
        assert_eq!(
            bmap(&mut inodes, &mut free, &mut inode, 0, true).unwrap(),
            Some(bn),
            "second call returns the same block"
        );
    }

    #[test]
    fn crosses_into_indirect_block() {
        let (mut inodes, mut free) = fresh(600);
        let mut inode = inodes.get_inode(ROOTINODE).unwrap();
        let k = fs_types::NUM_DIRECT;
        let bn = bmap(&mut inodes, &mut free, &mut inode, k, true).unwrap().unwrap();
        assert_ne!(bn, 0);
        assert_ne!(inode.indirect, 0);
    }

    #[test]
    fn out_of_range_is_invalid_argument() {
        let (mut inodes, mut free) = fresh(128);
        let mut inode = inodes.get_inode(ROOTINODE).unwrap();
        let k = max_blocks();
        let err = bmap(&mut inodes, &mut free, &mut inode, k, true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument));
    }
}
