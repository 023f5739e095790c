//! Iterative pathname resolution.
//!
//! Walked with an explicit work queue rather than recursion, so a pathname
//! riddled with symlinks costs no extra stack: only a shared expansion
//! budget ([`MAXSYMLINKS`](fs_types)-style counter) bounds the work,
//! matching the redesign away from naive recursive `namex`.

use block_cache::BlockDevice;
use fs_types::{Inode, InodeNum, InodeType, MAXPATHNAMELEN, ROOTINODE, SECTOR_SIZE};

use crate::{
    blocks::read_at,
    dirent,
    error::{EngineError, EngineResult},
    freelist::FreeLists,
    inode_cache::InodeCache,
};

/// The result of resolving a path: the inode it names, and that inode's
/// number.
pub struct Resolved {
    pub inum: InodeNum,
    pub inode: Inode,
}

/// Resolves `path` relative to `cwd`, following a trailing symlink only if
/// `follow_final` is set.
///
/// # Errors
///
/// Returns [`EngineError::NotFound`] if a component is absent,
/// [`EngineError::NotADirectory`] if a non-terminal component isn't a
/// directory, [`EngineError::TooManySymlinks`] if expansion exceeds
/// `max_symlinks`, or [`EngineError::PathTooLong`] if an expanded path
/// overflows the maximum pathname length.
pub fn resolve<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
    follow_final: bool,
) -> EngineResult<Resolved>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    if path.len() >= MAXPATHNAMELEN {
        return Err(EngineError::PathTooLong);
    }

    let mut cur_inum = if path.first() == Some(&b'/') {
        ROOTINODE
    } else {
        cwd
    };
    let mut cur = inodes.get_inode(cur_inum).map_err(crate::blocks::io_err)?;
    let mut rest: Vec<u8> = path.to_vec();
    let mut symlinks_left = max_symlinks;

    loop {
        // Collapse any run of leading slashes uniformly, whether this is
        // the very first component or a symlink target was just spliced in.
        while rest.first() == Some(&b'/') {
            rest.remove(0);
        }
        if rest.is_empty() {
            return Ok(Resolved {
                inum: cur_inum,
                inode: cur,
            });
        }

        let split = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
        let (component, remainder) = rest.split_at(split);
        let component = component.to_vec();
        let remainder = remainder.to_vec();
        let is_last = remainder.is_empty();

        if cur.kind() != Some(InodeType::Directory) {
            return Err(EngineError::NotADirectory);
        }

        let next_inum = if component == b"." {
            cur_inum
        } else {
            dirent::lookup(inodes, free, &mut cur, &component)?.ok_or(EngineError::NotFound)?
        };
        let mut next = inodes.get_inode(next_inum).map_err(crate::blocks::io_err)?;

        if next.kind() == Some(InodeType::Symlink) && (!is_last || follow_final) {
            if symlinks_left == 0 {
                return Err(EngineError::TooManySymlinks);
            }
            symlinks_left -= 1;

            let mut target = vec![0u8; next.size as usize];
            read_at(inodes, free, &mut next, 0, &mut target)?;

            let mut spliced = target;
            if !remainder.is_empty() {
                if spliced.last() != Some(&b'/') {
                    spliced.push(b'/');
                }
                spliced.extend_from_slice(&remainder);
            }
            if spliced.len() >= MAXPATHNAMELEN {
                return Err(EngineError::PathTooLong);
            }

            if spliced.first() == Some(&b'/') {
                cur_inum = ROOTINODE;
                cur = inodes.get_inode(cur_inum).map_err(crate::blocks::io_err)?;
            }
            rest = spliced;
            continue;
        }

        cur_inum = next_inum;
        cur = next;
        rest = remainder;
    }
}

/// Resolves every component but the last, returning the parent directory
/// and the final component's raw bytes, the shape `create`/`link`/`mkdir`
/// need.
///
/// # Errors
///
/// Returns [`EngineError::InvalidArgument`] if `path` has a trailing slash
/// (e.g. `"foo/"`) or its final component is empty, `.`, or `..`; otherwise
/// the same errors as [`resolve`], applied to every component except the
/// last.
pub fn resolve_parent<Device>(
    inodes: &mut InodeCache<Device>,
    free: &mut FreeLists,
    cwd: InodeNum,
    path: &[u8],
    max_symlinks: u32,
) -> EngineResult<(Resolved, Vec<u8>)>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    if path.len() > 1 && path.last() == Some(&b'/') {
        return Err(EngineError::InvalidArgument);
    }
    let split = path.iter().rposition(|&b| b == b'/');
    let (dir_part, name) = match split {
        Some(i) => (&path[..=i], &path[i + 1..]),
        None => (&b"."[..], path),
    };
    if name.is_empty() || name == b"." || name == b".." {
        return Err(EngineError::InvalidArgument);
    }
    let dir = resolve(inodes, free, cwd, dir_part, max_symlinks, true)?;
    Ok((dir, name.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use block_cache::BlockCache;
    use fs_types::SuperBlock;

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
        inodes.put_inode(ROOTINODE, root);
        inodes.sync().unwrap();
        let free = FreeLists::bootstrap(&mut inodes).unwrap();
        (inodes, free)
    }

    fn mkdir_entry(
        inodes: &mut InodeCache<MemDevice>,
        free: &mut FreeLists,
        parent: InodeNum,
        name: &[u8],
        inum: InodeNum,
        kind: InodeType,
    ) {
        let mut child = inodes.get_inode(inum).unwrap();
        child.ty = kind as i16;
        inodes.put_inode(inum, child);
        let mut parent_inode = inodes.get_inode(parent).unwrap();
        dirent::insert(inodes, free, &mut parent_inode, name, inum).unwrap();
        inodes.put_inode(parent, parent_inode);
    }

    #[test]
    fn resolves_absolute_path() {
        let (mut inodes, mut free) = fresh();
        mkdir_entry(&mut inodes, &mut free, ROOTINODE, b"etc", 2, InodeType::Directory);
        mkdir_entry(&mut inodes, &mut free, 2, b"passwd", 3, InodeType::Regular);

        let resolved = resolve(&mut inodes, &mut free, ROOTINODE, b"/etc/passwd", 8, true).unwrap();
        assert_eq!(resolved.inum, 3);
    }

    #[test]
    fn missing_component_is_not_found() {
        let (mut inodes, mut free) = fresh();
        let err = resolve(&mut inodes, &mut free, ROOTINODE, b"/nope", 8, true).unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }

    #[test]
    fn follows_symlink_to_target() {
        let (mut inodes, mut free) = fresh();
        mkdir_entry(&mut inodes, &mut free, ROOTINODE, b"real", 2, InodeType::Regular);
        mkdir_entry(&mut inodes, &mut free, ROOTINODE, b"link", 3, InodeType::Symlink);
        let mut link = inodes.get_inode(3).unwrap();
        crate::blocks::write_at(&mut inodes, &mut free, &mut link, 0, b"/real").unwrap();
        inodes.put_inode(3, link);

        let resolved = resolve(&mut inodes, &mut free, ROOTINODE, b"/link", 8, true).unwrap();
        assert_eq!(resolved.inum, 2);
    }

    #[test]
    fn symlink_cycle_hits_budget() {
        let (mut inodes, mut free) = fresh();
        mkdir_entry(&mut inodes, &mut free, ROOTINODE, b"a", 2, InodeType::Symlink);
        let mut a = inodes.get_inode(2).unwrap();
        crate::blocks::write_at(&mut inodes, &mut free, &mut a, 0, b"/a").unwrap();
        inodes.put_inode(2, a);

        let err = resolve(&mut inodes, &mut free, ROOTINODE, b"/a", 4, true).unwrap_err();
        assert!(matches!(err, EngineError::TooManySymlinks));
    }

    #[test]
    fn resolve_parent_splits_final_component() {
        let (mut inodes, mut free) = fresh();
        mkdir_entry(&mut inodes, &mut free, ROOTINODE, b"etc", 2, InodeType::Directory);
        let (dir, name) =
            resolve_parent(&mut inodes, &mut free, ROOTINODE, b"/etc/passwd", 8).unwrap();
        assert_eq!(dir.inum, 2);
        assert_eq!(name, b"passwd");
    }
}
