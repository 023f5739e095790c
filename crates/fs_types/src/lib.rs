//! On-disk data types for the yfsd file system image.
//!
//! The data layout:
//!
//! | sector no.          | content                    | type            |
//! |---------------------|-----------------------------|-----------------|
//! | 0                   | superblock                  | [`SuperBlock`]  |
//! | `1..=inode_sectors` | inode table                 | [`Inode`]       |
//! | rest                | data blocks                 | raw bytes       |

use core::{fmt, mem};

use dataview::{Pod, PodMethods as _};

/// Sector/block size. The whole disk is addressed in units of this size.
pub const SECTOR_SIZE: usize = 512;

/// Number of direct block pointers held in an inode.
pub const NUM_DIRECT: usize = 10;

/// Maximum length of a directory entry name, not counting a terminator.
pub const DIRNAMELEN: usize = 30;

/// The well-known inode number of the root directory.
pub const ROOTINODE: u32 = 1;

/// Maximum length of a full pathname passed to any operation.
pub const MAXPATHNAMELEN: usize = 256;

/// Maximum number of symlink expansions a single path resolution may use.
pub const MAXSYMLINKS: u32 = 8;

/// A block number, 0 meaning "unallocated".
pub type BlockNum = u32;

/// An inode number, 0 meaning "no entry" in a directory.
pub type InodeNum = u32;

/// Inode type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum InodeType {
    Free = 0,
    Regular = 1,
    Directory = 2,
    Symlink = 3,
}

impl InodeType {
    #[must_use]
    pub fn from_raw(raw: i16) -> Option<Self> {
        match raw {
            0 => Some(Self::Free),
            1 => Some(Self::Regular),
            2 => Some(Self::Directory),
            3 => Some(Self::Symlink),
            _ => None,
        }
    }
}

impl fmt::Display for InodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Regular => "regular",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        };
        f.write_str(s)
    }
}

/// Superblock, stored at sector 0.
#[derive(Pod, Clone, Copy)]
#[repr(C)]
pub struct SuperBlock {
    pub num_blocks: i32,
    pub num_inodes: i32,
}

impl SuperBlock {
    pub const SECTOR: u32 = 0;

    #[must_use]
    pub fn inodes_per_block(&self) -> usize {
        SECTOR_SIZE / mem::size_of::<Inode>()
    }

    /// Number of sectors occupied by the inode table.
    #[must_use]
    pub fn inode_sectors(&self) -> u32 {
        let per_block = self.inodes_per_block() as i32;
        u32::try_from((self.num_inodes + per_block - 1) / per_block).unwrap()
    }

    /// Sector number holding the given inode.
    #[must_use]
    pub fn inode_sector(&self, inum: InodeNum) -> u32 {
        let per_block = self.inodes_per_block() as u32;
        1 + inum / per_block
    }

    /// Byte offset of the given inode within its sector.
    #[must_use]
    pub fn inode_offset(&self, inum: InodeNum) -> usize {
        let per_block = self.inodes_per_block();
        (inum as usize % per_block) * mem::size_of::<Inode>()
    }

    /// First data-block number, i.e. the first sector not occupied by the
    /// superblock or the inode table.
    #[must_use]
    pub fn first_data_block(&self) -> u32 {
        1 + self.inode_sectors()
    }
}

/// On-disk inode record.
#[derive(Pod, Clone, Copy)]
#[repr(C)]
pub struct Inode {
    pub ty: i16,
    pub nlink: i16,
    pub reuse: u32,
    pub size: u32,
    pub direct: [BlockNum; NUM_DIRECT],
    pub indirect: BlockNum,
}

impl Inode {
    #[must_use]
    pub fn kind(&self) -> Option<InodeType> {
        InodeType::from_raw(self.ty)
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.ty == InodeType::Free as i16
    }

    /// Number of block pointers addressable through the indirect block.
    #[must_use]
    pub fn num_indirect() -> usize {
        SECTOR_SIZE / mem::size_of::<BlockNum>()
    }

    /// Returns the direct block pointer for logical block `k`, if `k` is
    /// within the direct range.
    #[must_use]
    pub fn direct_block(&self, k: usize) -> Option<BlockNum> {
        self.direct.get(k).copied()
    }
}

pub const INODE_SIZE: usize = mem::size_of::<Inode>();

/// A block interpreted as an array of indirect pointers.
#[derive(Pod, Clone, Copy)]
#[repr(transparent)]
pub struct IndirectBlock([BlockNum; SECTOR_SIZE / mem::size_of::<BlockNum>()]);

impl IndirectBlock {
    #[must_use]
    pub fn get(&self, i: usize) -> BlockNum {
        self.0[i]
    }

    pub fn set(&mut self, i: usize, bn: BlockNum) {
        self.0[i] = bn;
    }

    #[must_use]
    pub fn from_sector(sector: &[u8; SECTOR_SIZE]) -> Self {
        *sector.as_data_view().get(0)
    }

    pub fn write_into(&self, sector: &mut [u8; SECTOR_SIZE]) {
        *sector.as_data_view_mut().get_mut(0) = *self;
    }
}

/// A directory entry: `{ inum, name }`. `inum == 0` marks a free slot.
#[derive(Pod, Clone, Copy)]
#[repr(C)]
pub struct DirEntry {
    pub inum: i16,
    pub name: [u8; DIRNAMELEN],
}

pub const DIRENTRY_SIZE: usize = mem::size_of::<DirEntry>();

impl DirEntry {
    #[must_use]
    pub fn free() -> Self {
        Self::zeroed()
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.inum == 0
    }

    #[must_use]
    pub fn inode_num(&self) -> Option<InodeNum> {
        (self.inum != 0).then_some(self.inum as InodeNum)
    }

    pub fn set_inode_num(&mut self, inum: InodeNum) {
        self.inum = i16::try_from(inum).expect("inode number exceeds directory entry width");
    }

    /// Name bytes, trimmed of trailing NUL padding.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..len]
    }

    pub fn set_name(&mut self, name: &[u8]) {
        let len = usize::min(name.len(), self.name.len());
        self.name[..len].copy_from_slice(&name[..len]);
        self.name[len..].fill(0);
    }

    /// Compares the entry's stored name against a query name, accepting a
    /// `/` or NUL in the query as the end of the relevant component (so
    /// callers can pass an un-split remainder of a path).
    #[must_use]
    pub fn matches(&self, query: &[u8]) -> bool {
        let end = query
            .iter()
            .position(|&b| b == b'/' || b == 0)
            .unwrap_or(query.len());
        let query = &query[..end];
        self.name() == query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_inode_layout() {
        let sb = SuperBlock {
            num_blocks: 1000,
            num_inodes: 200,
        };
        let per_block = sb.inodes_per_block();
        assert_eq!(sb.inode_sector(0), 1);
        assert_eq!(sb.inode_sector(per_block as u32), 2);
        assert_eq!(sb.first_data_block(), 1 + sb.inode_sectors());
    }

    #[test]
    fn dir_entry_name_roundtrip() {
        let mut de = DirEntry::free();
        de.set_name(b"hello");
        assert_eq!(de.name(), b"hello");
        assert!(de.matches(b"hello"));
        assert!(de.matches(b"hello/world"));
        assert!(!de.matches(b"helloo"));
    }

    #[test]
    fn dir_entry_free_slot() {
        let de = DirEntry::free();
        assert!(de.is_free());
        assert_eq!(de.inode_num(), None);
    }
}
