//! The file system operations proper: create, open, read, write, link,
//! unlink, symlink, readlink, mkdir, rmdir, stat, seek.
//!
//! Each function is a plain, independently testable transform over the
//! caches and free lists; [`crate::engine::Engine`] is the thin struct that
//! owns those collaborators and the dispatcher calls into.

use block_cache::BlockDevice;
use dataview::PodMethods as _;
use fs_types::{Inode, InodeNum, InodeType, SECTOR_SIZE};

use crate::{
    blocks::{self, io_err},
    dirent,
    error::{EngineError, EngineResult},
    freelist::FreeLists,
    inode_cache::InodeCache,
    path::{self, Resolved},
};

/// Metadata returned by [`stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub inum: InodeNum,
    pub ty: i16,
    pub nlink: i16,
    pub size: u32,
}

/// Resolves `path`, following a trailing symlink.
///
/// # Errors
///
/// See [`path::resolve`].
pub fn open<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
) -> EngineResult<Resolved>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    path::resolve(inodes, free, cwd, path, max_symlinks, true)
}

fn new_inode<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    kind: InodeType,
) -> EngineResult<(InodeNum, Inode)>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let inum = free.alloc_inode().ok_or(EngineError::NoFreeInodes)?;
    inodes.get_inode(inum).map_err(io_err)?;
    let mut inode = Inode::zeroed();
    inode.ty = kind as i16;
    inode.nlink = 1;
    inodes.put_inode(inum, inode);
    Ok((inum, inode))
}

fn resolve_create_parent<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
) -> EngineResult<(Resolved, Inode, Vec<u8>)>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let (parent, name) = path::resolve_parent(inodes, free, cwd, path, max_symlinks)?;
    let parent_inode = inodes.get_inode(parent.inum).map_err(io_err)?;
    if parent_inode.kind() != Some(InodeType::Directory) {
        return Err(EngineError::NotADirectory);
    }
    Ok((parent, parent_inode, name))
}

/// Creates a new entry of kind `kind` at `path`, relative to `cwd`.
///
/// If `kind` is [`InodeType::Regular`] and `path` already names a regular
/// file, that file is truncated to size zero and its inode returned, rather
/// than failing — the "create new, or truncate" hint a caller gets by
/// passing `wire::CREATE_NEW`. Any other clash (existing directory, existing
/// symlink, or a non-regular `kind`) is still an error.
///
/// # Errors
///
/// Returns [`EngineError::AlreadyExists`] if `path`'s final component is
/// already present and the clash isn't a regular-file-over-regular-file
/// truncation, [`EngineError::NoFreeInodes`] if the inode free list is
/// exhausted, or propagates path-resolution/I/O errors.
pub fn create<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
    kind: InodeType,
) -> EngineResult<(InodeNum, Inode)>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let (parent, mut parent_inode, name) = resolve_create_parent(inodes, free, cwd, path, max_symlinks)?;

    if let Some(existing_inum) = dirent::lookup(inodes, free, &mut parent_inode, &name)? {
        let existing = inodes.get_inode(existing_inum).map_err(io_err)?;
        if kind != InodeType::Regular || existing.kind() != Some(InodeType::Regular) {
            return Err(EngineError::AlreadyExists);
        }
        let mut truncated = existing;
        free_blocks_of(inodes, free, &truncated)?;
        truncated.direct = [0; fs_types::NUM_DIRECT];
        truncated.indirect = 0;
        truncated.size = 0;
        inodes.put_inode(existing_inum, truncated);
        return Ok((existing_inum, truncated));
    }

    let (child_inum, mut child) = new_inode(inodes, free, kind)?;

    if kind == InodeType::Directory {
        dirent::insert(inodes, free, &mut child, b".", child_inum)?;
        dirent::insert(inodes, free, &mut child, b"..", parent.inum)?;
        inodes.put_inode(child_inum, child);
        parent_inode.nlink += 1;
    }

    dirent::insert(inodes, free, &mut parent_inode, &name, child_inum)?;
    inodes.put_inode(parent.inum, parent_inode);
    inodes.put_inode(child_inum, child);

    Ok((child_inum, child))
}

/// Creates a symlink at `link_path` whose contents are `target`.
///
/// # Errors
///
/// Returns [`EngineError::PathTooLong`] if `target` overflows the maximum
/// pathname length, or the errors documented on [`create`].
pub fn symlink<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    link_path: &[u8],
    target: &[u8],
    max_symlinks: u32,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    if target.len() > fs_types::MAXPATHNAMELEN {
        return Err(EngineError::PathTooLong);
    }
    let (inum, mut inode) = create(inodes, free, cwd, link_path, max_symlinks, InodeType::Symlink)?;
    blocks::write_at(inodes, free, &mut inode, 0, target)?;
    inodes.put_inode(inum, inode);
    Ok(())
}

/// Reads `path`'s symlink target into `buf`, without following it.
///
/// # Errors
///
/// Returns [`EngineError::InvalidArgument`] if `path` does not name a
/// symlink, or propagates path-resolution/I/O errors.
pub fn readlink<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
    buf: &mut [u8],
) -> EngineResult<usize>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let resolved = path::resolve(inodes, free, cwd, path, max_symlinks, false)?;
    if resolved.inode.kind() != Some(InodeType::Symlink) {
        return Err(EngineError::InvalidArgument);
    }
    let mut inode = resolved.inode;
    blocks::read_at(inodes, free, &mut inode, 0, buf)
}

/// Creates a hard link at `new_path` pointing at `old_path`'s inode.
///
/// # Errors
///
/// Returns [`EngineError::IsADirectory`] if `old_path` names a directory
/// (hard-linking directories is not supported), or propagates
/// resolution/creation errors.
pub fn link<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    old_path: &[u8],
    new_path: &[u8],
    max_symlinks: u32,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let old = path::resolve(inodes, free, cwd, old_path, max_symlinks, true)?;
    if old.inode.kind() == Some(InodeType::Directory) {
        return Err(EngineError::IsADirectory);
    }

    let (parent, name) = path::resolve_parent(inodes, free, cwd, new_path, max_symlinks)?;
    let mut parent_inode = inodes.get_inode(parent.inum).map_err(io_err)?;
    if parent_inode.kind() != Some(InodeType::Directory) {
        return Err(EngineError::NotADirectory);
    }
    dirent::insert(inodes, free, &mut parent_inode, &name, old.inum)?;
    inodes.put_inode(parent.inum, parent_inode);

    let mut old_inode = old.inode;
    old_inode.nlink += 1;
    inodes.put_inode(old.inum, old_inode);
    Ok(())
}

/// Frees every data block and the indirect block (if any) an inode
/// references, without touching the inode slot itself.
fn free_blocks_of<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    inode: &Inode,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    for &bn in &inode.direct {
        if bn != 0 {
            free.free_block(bn);
        }
    }
    if inode.indirect != 0 {
        let sector = inodes.block_cache_mut().get_block(inode.indirect).map_err(io_err)?;
        let indirect = fs_types::IndirectBlock::from_sector(&sector);
        for i in 0..Inode::num_indirect() {
            let bn = indirect.get(i);
            if bn != 0 {
                free.free_block(bn);
            }
        }
        free.free_block(inode.indirect);
    }
    Ok(())
}

/// Releases an inode once its link count hits zero: its data blocks, its
/// indirect block, and the inode slot itself.
fn release_inode<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    inum: InodeNum,
    inode: &Inode,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    free_blocks_of(inodes, free, inode)?;
    inodes.put_inode(inum, Inode::zeroed());
    free.free_inode(inum);
    Ok(())
}

/// Removes the entry for `path`. If it was the last link, the inode and its
/// blocks are released.
///
/// # Errors
///
/// Returns [`EngineError::IsADirectory`] if `path` names a directory (use
/// [`rmdir`]), or propagates resolution/I/O errors.
pub fn unlink<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let (parent, name) = path::resolve_parent(inodes, free, cwd, path, max_symlinks)?;
    let mut parent_inode = inodes.get_inode(parent.inum).map_err(io_err)?;
    let target_inum = dirent::lookup(inodes, free, &mut parent_inode, &name)?
        .ok_or(EngineError::NotFound)?;
    let mut target = inodes.get_inode(target_inum).map_err(io_err)?;
    if target.kind() == Some(InodeType::Directory) {
        return Err(EngineError::IsADirectory);
    }

    dirent::remove(inodes, free, &mut parent_inode, &name)?;
    inodes.put_inode(parent.inum, parent_inode);

    target.nlink -= 1;
    if target.nlink <= 0 {
        release_inode(inodes, free, target_inum, &target)?;
    } else {
        inodes.put_inode(target_inum, target);
    }
    Ok(())
}

/// Removes an empty directory at `path`.
///
/// # Errors
///
/// Returns [`EngineError::NotADirectory`] if `path` doesn't name a
/// directory, [`EngineError::DirectoryNotEmpty`] if it has entries besides
/// `.`/`..`, [`EngineError::InvalidArgument`] if `path` names the root
/// directory, or propagates resolution/I/O errors.
pub fn rmdir<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
) -> EngineResult<()>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let (parent, name) = path::resolve_parent(inodes, free, cwd, path, max_symlinks)?;
    let mut parent_inode = inodes.get_inode(parent.inum).map_err(io_err)?;
    let target_inum = dirent::lookup(inodes, free, &mut parent_inode, &name)?
        .ok_or(EngineError::NotFound)?;
    if target_inum == fs_types::ROOTINODE {
        return Err(EngineError::InvalidArgument);
    }
    let mut target = inodes.get_inode(target_inum).map_err(io_err)?;
    if target.kind() != Some(InodeType::Directory) {
        return Err(EngineError::NotADirectory);
    }
    if !dirent::is_empty(inodes, free, &mut target)? {
        return Err(EngineError::DirectoryNotEmpty);
    }

    dirent::remove(inodes, free, &mut parent_inode, &name)?;
    parent_inode.nlink -= 1;
    inodes.put_inode(parent.inum, parent_inode);

    release_inode(inodes, free, target_inum, &target)
}

/// Computes `stat` metadata for `path`.
///
/// # Errors
///
/// Propagates resolution/I/O errors.
pub fn stat<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
) -> EngineResult<Stat>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    let resolved = path::resolve(inodes, free, cwd, path, max_symlinks, true)?;
    Ok(Stat {
        inum: resolved.inum,
        ty: resolved.inode.ty,
        nlink: resolved.inode.nlink,
        size: resolved.inode.size,
    })
}

/// Computes a new seek position from `whence` (`0` = set, `1` = current,
/// `2` = end), mirroring POSIX `lseek`.
///
/// # Errors
///
/// Returns [`EngineError::InvalidArgument`] if `whence` is unrecognized or
/// the computed position would be negative.
pub fn seek(file_size: u32, cur_pos: i32, offset: i32, whence: i32) -> EngineResult<i32> {
    let base = match whence {
        0 => 0,
        1 => cur_pos,
        2 => i32::try_from(file_size).map_err(|_| EngineError::InvalidArgument)?,
        _ => return Err(EngineError::InvalidArgument),
    };
    let new_pos = base.checked_add(offset).ok_or(EngineError::InvalidArgument)?;
    if new_pos < 0 {
        return Err(EngineError::InvalidArgument);
    }
    Ok(new_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use block_cache::BlockCache;
    use fs_types::{SuperBlock, ROOTINODE};

    fn fresh() -> (InodeCache<MemDevice>, FreeLists) {
        let sb = SuperBlock {
            num_blocks: 1024,
            num_inodes: 64,
        };
        let device = MemDevice::new(1024);
        let blocks = BlockCache::new(device, 32);
        let mut inodes = InodeCache::new(blocks, sb, 32);
        let mut root = inodes.get_inode(ROOTINODE).unwrap();
        root.ty = InodeType::Directory as i16;
        root.nlink = 2;
        inodes.put_inode(ROOTINODE, root);
        inodes.sync().unwrap();
        let free = FreeLists::bootstrap(&mut inodes).unwrap();
        (inodes, free)
    }

    #[test]
    fn create_write_read_stat_roundtrip() {
        let (mut inodes, mut free) = fresh();
        let (inum, _) = create(&mut inodes, &mut free, ROOTINODE, b"/hello", 8, InodeType::Regular)
            .unwrap();

        let mut inode = inodes.get_inode(inum).unwrap();
        blocks::write_at(&mut inodes, &mut free, &mut inode, 0, b"hi there").unwrap();
        inodes.put_inode(inum, inode);

        let mut buf = [0u8; 8];
        let mut inode = inodes.get_inode(inum).unwrap();
        let n = blocks::read_at(&mut inodes, &mut free, &mut inode, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi there");

        let st = stat(&mut inodes, &mut free, ROOTINODE, b"/hello", 8).unwrap();
        assert_eq!(st.size, 8);
        assert_eq!(st.ty, InodeType::Regular as i16);
    }

    #[test]
    fn create_over_existing_regular_file_truncates() {
        let (mut inodes, mut free) = fresh();
        let (inum, _) = create(&mut inodes, &mut free, ROOTINODE, b"/hello", 8, InodeType::Regular)
            .unwrap();
        let mut inode = inodes.get_inode(inum).unwrap();
        blocks::write_at(&mut inodes, &mut free, &mut inode, 0, b"hi there").unwrap();
        inodes.put_inode(inum, inode);

        let (reused_inum, reused) =
            create(&mut inodes, &mut free, ROOTINODE, b"/hello", 8, InodeType::Regular).unwrap();
        assert_eq!(reused_inum, inum);
        assert_eq!(reused.size, 0);
        assert_eq!(inodes.get_inode(inum).unwrap().size, 0);
    }

    #[test]
    fn create_over_existing_directory_still_fails() {
        let (mut inodes, mut free) = fresh();
        create(&mut inodes, &mut free, ROOTINODE, b"/sub", 8, InodeType::Directory).unwrap();
        let err =
            create(&mut inodes, &mut free, ROOTINODE, b"/sub", 8, InodeType::Regular).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyExists));
    }

    #[test]
    fn symlink_then_open_follows_through() {
        let (mut inodes, mut free) = fresh();
        create(&mut inodes, &mut free, ROOTINODE, b"/real", 8, InodeType::Regular).unwrap();
        symlink(&mut inodes, &mut free, ROOTINODE, b"/link", b"/real", 8).unwrap();

        let resolved = open(&mut inodes, &mut free, ROOTINODE, b"/link", 8).unwrap();
        assert_eq!(resolved.inode.kind(), Some(InodeType::Regular));

        let mut buf = [0u8; 64];
        let n = readlink(&mut inodes, &mut free, ROOTINODE, b"/link", 8, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"/real");
    }

    #[test]
    fn link_unlink_tracks_nlink() {
        let (mut inodes, mut free) = fresh();
        let (inum, _) = create(&mut inodes, &mut free, ROOTINODE, b"/a", 8, InodeType::Regular)
            .unwrap();
        link(&mut inodes, &mut free, ROOTINODE, b"/a", b"/b", 8).unwrap();
        assert_eq!(inodes.get_inode(inum).unwrap().nlink, 2);

        unlink(&mut inodes, &mut free, ROOTINODE, b"/a", 8).unwrap();
        assert_eq!(inodes.get_inode(inum).unwrap().nlink, 1);

        unlink(&mut inodes, &mut free, ROOTINODE, b"/b", 8).unwrap();
        assert!(inodes.get_inode(inum).unwrap().is_free());
    }

    #[test]
    fn mkdir_then_rmdir() {
        let (mut inodes, mut free) = fresh();
        let (dir_inum, _) =
            create(&mut inodes, &mut free, ROOTINODE, b"/sub", 8, InodeType::Directory).unwrap();
        let root_nlink_before = inodes.get_inode(ROOTINODE).unwrap().nlink;

        create(&mut inodes, &mut free, dir_inum, b"/sub/child", 8, InodeType::Regular).unwrap();
        let err = rmdir(&mut inodes, &mut free, ROOTINODE, b"/sub", 8).unwrap_err();
        assert!(matches!(err, EngineError::DirectoryNotEmpty));

        unlink(&mut inodes, &mut free, dir_inum, b"child", 8).unwrap();
        rmdir(&mut inodes, &mut free, ROOTINODE, b"/sub", 8).unwrap();
        assert!(inodes.get_inode(dir_inum).unwrap().is_free());
        assert_eq!(
            inodes.get_inode(ROOTINODE).unwrap().nlink,
            root_nlink_before - 1
        );
    }

    #[test]
    fn seek_modes() {
        assert_eq!(seek(100, 0, 10, 0).unwrap(), 10);
        assert_eq!(seek(100, 10, 5, 1).unwrap(), 15);
        assert_eq!(seek(100, 0, 0, 2).unwrap(), 100);
        assert!(seek(100, 0, -1, 0).is_err());
    }
}
