//! Directory contents: linear scan for a name, insertion with free-slot
//! reuse, removal, and the emptiness check `rmdir` needs.
//!
//! A directory's data is just its regular file bytes, reinterpreted as an
//! array of [`DirEntry`] records packed into its data blocks, using the
//! same [`crate::blocks::bmap`] indirection a regular file uses for storage.

use block_cache::BlockDevice;
use dataview::PodMethods as _;
use fs_types::{DirEntry, Inode, InodeNum, DIRENTRY_SIZE, SECTOR_SIZE};

use crate::{
    blocks::{bmap, io_err},
    error::{EngineError, EngineResult},
    freelist::FreeLists,
    inode_cache::InodeCache,
};

const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIRENTRY_SIZE;

/// Number of directory entries currently addressable by `inode`'s allocated
/// blocks (i.e. its logical size in entries, rounded down).
fn entry_capacity(inode: &Inode) -> usize {
    (inode.size as usize / DIRENTRY_SIZE).max(0)
}

fn read_entry<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    inode: &mut Inode,
    index: usize,
) -> EngineResult<DirEntry>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let k = index / ENTRIES_PER_SECTOR;
    let slot = index % ENTRIES_PER_SECTOR;
    let Some(bn) = bmap(inodes, free, inode, k, false)? else {
        return Ok(DirEntry::free());
    };
    let sector = inodes.block_cache_mut().get_block(bn).map_err(io_err)?;
    Ok(*sector.as_data_view().get(slot * DIRENTRY_SIZE))
}

fn write_entry<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    inode: &mut Inode,
    index: usize,
    entry: DirEntry,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let k = index / ENTRIES_PER_SECTOR;
    let slot = index % ENTRIES_PER_SECTOR;
    let bn = bmap(inodes, free, inode, k, true)?.expect("allocate=true always returns Some");
    let mut sector = inodes.block_cache_mut().get_block(bn).map_err(io_err)?;
    *sector.as_data_view_mut().get_mut(slot * DIRENTRY_SIZE) = entry;
    inodes.block_cache_mut().put_block(bn, sector);

    let needed_size = ((index + 1) * DIRENTRY_SIZE) as u32;
    if needed_size > inode.size {
        inode.size = needed_size;
    }
    Ok(())
}

/// Looks up `name` among `dir_inode`'s entries.
///
/// # Errors
///
/// Propagates device I/O errors encountered while scanning.
pub fn lookup<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    dir_inode: &mut Inode,
    name: &[u8],
) -> EngineResult<Option<InodeNum>>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let count = entry_capacity(dir_inode);
    for i in 0..count {
        let entry = read_entry(inodes, free, dir_inode, i)?;
        if !entry.is_free() && entry.matches(name) {
            return Ok(entry.inode_num());
        }
    }
    Ok(None)
}

/// Inserts `(name, inum)` into `dir_inode`, reusing a free slot if one
/// exists, otherwise appending (growing the directory's allocation).
///
/// # Errors
///
/// Returns [`EngineError::AlreadyExists`] if `name` is already present, or
/// propagates allocation/I/O errors.
pub fn insert<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    dir_inode: &mut Inode,
    name: &[u8],
    inum: InodeNum,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    if lookup(inodes, free, dir_inode, name)?.is_some() {
        return Err(EngineError::AlreadyExists);
    }

    let count = entry_capacity(dir_inode);
    let mut free_slot = None;
    for i in 0..count {
        if read_entry(inodes, free, dir_inode, i)?.is_free() {
            free_slot = Some(i);
            break;
        }
    }
    let index = free_slot.unwrap_or(count);

    let mut entry = DirEntry::free();
    entry.set_name(name);
    entry.set_inode_num(inum);
    write_entry(inodes, free, dir_inode, index, entry)
}

/// Clears the entry for `name`, if present.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if `name` is absent, or propagates I/O
/// errors.
pub fn remove<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    dir_inode: &mut Inode,
    name: &[u8],
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let count = entry_capacity(dir_inode);
    for i in 0..count {
        let entry = read_entry(inodes, free, dir_inode, i)?;
        if !entry.is_free() && entry.matches(name) {
            write_entry(inodes, free, dir_inode, i, DirEntry::free())?;
            return Ok(());
        }
    }
    Err(EngineError::NotFound)
}

/// True if `dir_inode` has no entries besides `.` and `..`.
///
/// # Errors
///
/// Propagates device I/O errors encountered while scanning.
pub fn is_empty<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    dir_inode: &mut Inode,
) -> EngineResult<bool>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let count = entry_capacity(dir_inode);
    for i in 0..count {
        let entry = read_entry(inodes, free, dir_inode, i)?;
        if entry.is_free() {
            continue;
        }
        if entry.name() != b"." && entry.name() != b".." {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use block_cache::BlockCache;
    use fs_types::{InodeType, SuperBlock, ROOTINODE};

    fn fresh() -> (InodeCache<MemDevice>, FreeLists, Inode) {
        let sb = SuperBlock {
            num_blocks: 1024,
            num_inodes: 64,
        };
        let device = MemDevice::new(1024);
        let blocks = BlockCache::new(device, 32);
        let mut inodes = InodeCache::new(blocks, sb, 32);
        let mut root = inodes.get_inode(ROOTINODE).unwrap();
        root.ty = InodeType::Directory as i16;
        inodes.put_inode(ROOTINODE, root);
        inodes.sync().unwrap();
        let free = FreeLists::bootstrap(&mut inodes).unwrap();
        (inodes, free, root)
    }

    #[test]
    fn insert_then_lookup() {
        let (mut inodes, mut free, mut root) = fresh();
        insert(&mut inodes, &mut free, &mut root, b"foo", 5).unwrap();
        assert_eq!(lookup(&mut inodes, &mut free, &mut root, b"foo").unwrap(), Some(5));
        assert_eq!(lookup(&mut inodes, &mut free, &mut root, b"bar").unwrap(), None);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let (mut inodes, mut free, mut root) = fresh();
        insert(&mut inodes, &mut free, &mut root, b"foo", 5).unwrap();
        let err = insert(&mut inodes, &mut free, &mut root, b"foo", 6).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists));
    }

    #[test]
    fn remove_frees_slot_for_reuse() {
        let (mut inodes, mut free, mut root) = fresh();
        insert(&mut inodes, &mut free, &mut root, b"foo", 5).unwrap();
        remove(&mut inodes, &mut free, &mut root, b"foo").unwrap();
        assert_eq!(lookup(&mut inodes, &mut free, &mut root, b"foo").unwrap(), None);
        let size_before = root.size;
        insert(&mut inodes, &mut free, &mut root, b"bar", 6).unwrap();
        assert_eq!(root.size, size_before, "reused the freed slot instead of growing");
    }

    #[test]
    fn grows_past_one_block() {
        let (mut inodes, mut free, mut root) = fresh();
        for i in 0..(ENTRIES_PER_SECTOR + 3) {
            let name = format!("f{i}");
            insert(&mut inodes, &mut free, &mut root, name.as_bytes(), 2).unwrap();
        }
        assert!(root.direct[1] != 0, "second data block should be allocated");
    }

    #[test]
    fn empty_directory_has_only_dot_entries() {
        let (mut inodes, mut free, mut root) = fresh();
        let mut entry = DirEntry::free();
        entry.set_name(b".");
        entry.set_inode_num(ROOTINODE);
        write_entry(&mut inodes, &mut free, &mut root, 0, entry).unwrap();
        let mut parent = DirEntry::free();
        parent.set_name(b"..");
        parent.set_inode_num(ROOTINODE);
        write_entry(&mut inodes, &mut free, &mut root, 1, parent).unwrap();

        assert!(is_empty(&mut inodes, &mut free, &mut root).unwrap());
        insert(&mut inodes, &mut free, &mut root, b"child", 9).unwrap();
        assert!(!is_empty(&mut inodes, &mut free, &mut root).unwrap());
    }
}
