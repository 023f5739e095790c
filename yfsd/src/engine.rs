//! The file system engine: owns the inode cache and free lists, and is the
//! single entry point the dispatcher drives.

use block_cache::{BlockCache, BlockDevice};
use dataview::PodMethods as _;
use fs_types::{Inode, InodeNum, InodeType, SuperBlock, ROOTINODE, SECTOR_SIZE};

use crate::{
    blocks::{self, io_err},
    error::EngineResult,
    freelist::FreeLists,
    inode_cache::InodeCache,
    ops::{self, Stat},
    path::Resolved,
};

/// Ties the block cache, inode cache, and free lists together behind the
/// operation set the dispatcher calls.
pub struct Engine<Device> {
    inodes: InodeCache<Device>,
    free: FreeLists,
    max_symlinks: u32,
}

impl<Device> Engine<Device>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    /// Opens an existing disk image: reads the superblock from sector 0,
    /// builds the inode and block caches on top of `device`, and rebuilds
    /// the free lists by scanning the inode table.
    ///
    /// # Errors
    ///
    /// Propagates any device I/O error encountered while reading the
    /// superblock or scanning inodes.
    pub fn mount(
        device: Device,
        block_cache_size: usize,
        inode_cache_size: usize,
        max_symlinks: u32,
    ) -> EngineResult<Self> {
        let mut blocks = BlockCache::new(device, block_cache_size);
        let sb_sector = blocks.get_block(SuperBlock::SECTOR).map_err(io_err)?;
        let sb: SuperBlock = *sb_sector.as_data_view().get(0);

        let mut inodes = InodeCache::new(blocks, sb, inode_cache_size);
        let free = FreeLists::bootstrap(&mut inodes)?;

        tracing::info!(
            blocks = sb.num_blocks,
            inodes = sb.num_inodes,
            free_blocks = free.free_block_count(),
            free_inodes = free.free_inode_count(),
            "mounted file system image"
        );

        Ok(Self {
            inodes,
            free,
            max_symlinks,
        })
    }

    #[must_use]
    pub fn root_inode(&self) -> InodeNum {
        ROOTINODE
    }

    /// # Errors
    ///
    /// See [`ops::open`].
    pub fn open(&mut self, cwd: InodeNum, path: &[u8]) -> EngineResult<Resolved> {
        ops::open(&mut self.inodes, &mut self.free, cwd, path, self.max_symlinks)
    }

    /// # Errors
    ///
    /// See [`ops::create`].
    pub fn create(
        &mut self,
        cwd: InodeNum,
        path: &[u8],
        kind: InodeType,
    ) -> EngineResult<(InodeNum, Inode)> {
        ops::create(
            &mut self.inodes,
            &mut self.free,
            cwd,
            path,
            self.max_symlinks,
            kind,
        )
    }

    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::NotRegularFile`] if `inum`
    /// doesn't name a regular file, or propagates device I/O errors.
    pub fn read(&mut self, inum: InodeNum, offset: u32, buf: &mut [u8]) -> EngineResult<usize> {
        let mut inode = self.inodes.get_inode(inum).map_err(io_err)?;
        if inode.kind() != Some(InodeType::Regular) {
            return Err(crate::error::EngineError::NotRegularFile);
        }
        blocks::read_at(&mut self.inodes, &mut self.free, &mut inode, offset, buf)
    }

    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::NotRegularFile`] if `inum`
    /// doesn't name a regular file, or propagates allocation/I/O errors.
    pub fn write(&mut self, inum: InodeNum, offset: u32, buf: &[u8]) -> EngineResult<usize> {
        let mut inode = self.inodes.get_inode(inum).map_err(io_err)?;
        if inode.kind() != Some(InodeType::Regular) {
            return Err(crate::error::EngineError::NotRegularFile);
        }
        let n = blocks::write_at(&mut self.inodes, &mut self.free, &mut inode, offset, buf)?;
        self.inodes.put_inode(inum, inode);
        Ok(n)
    }

    /// # Errors
    ///
    /// See [`ops::seek`].
    pub fn seek(&mut self, inum: InodeNum, cur_pos: i32, offset: i32, whence: i32) -> EngineResult<i32> {
        let inode = self.inodes.get_inode(inum).map_err(io_err)?;
        ops::seek(inode.size, cur_pos, offset, whence)
    }

    /// # Errors
    ///
    /// See [`ops::link`].
    pub fn link(&mut self, cwd: InodeNum, old_path: &[u8], new_path: &[u8]) -> EngineResult<()> {
        ops::link(
            &mut self.inodes,
            &mut self.free,
            cwd,
            old_path,
            new_path,
            self.max_symlinks,
        )
    }

    /// # Errors
    ///
    /// See [`ops::unlink`].
    pub fn unlink(&mut self, cwd: InodeNum, path: &[u8]) -> EngineResult<()> {
        ops::unlink(&mut self.inodes, &mut self.free, cwd, path, self.max_symlinks)
    }

    /// # Errors
    ///
    /// See [`ops::symlink`].
    pub fn symlink(&mut self, cwd: InodeNum, link_path: &[u8], target: &[u8]) -> EngineResult<()> {
        ops::symlink(
            &mut self.inodes,
            &mut self.free,
            cwd,
            link_path,
            target,
            self.max_symlinks,
        )
    }

    /// # Errors
    ///
    /// See [`ops::readlink`].
    pub fn readlink(&mut self, cwd: InodeNum, path: &[u8], buf: &mut [u8]) -> EngineResult<usize> {
        ops::readlink(
            &mut self.inodes,
            &mut self.free,
            cwd,
            path,
            self.max_symlinks,
            buf,
        )
    }

    /// # Errors
    ///
    /// See [`ops::create`] (mkdir creates a directory entry).
    pub fn mkdir(&mut self, cwd: InodeNum, path: &[u8]) -> EngineResult<InodeNum> {
        let (inum, _) = ops::create(
            &mut self.inodes,
            &mut self.free,
            cwd,
            path,
            self.max_symlinks,
            InodeType::Directory,
        )?;
        Ok(inum)
    }

    /// # Errors
    ///
    /// See [`ops::rmdir`].
    pub fn rmdir(&mut self, cwd: InodeNum, path: &[u8]) -> EngineResult<()> {
        ops::rmdir(&mut self.inodes, &mut self.free, cwd, path, self.max_symlinks)
    }

    /// Resolves `path` and returns its inode number, for `chdir`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::NotADirectory`] if `path` does
    /// not name a directory, or propagates resolution errors.
    pub fn chdir(&mut self, cwd: InodeNum, path: &[u8]) -> EngineResult<InodeNum> {
        let resolved = ops::open(&mut self.inodes, &mut self.free, cwd, path, self.max_symlinks)?;
        if resolved.inode.kind() != Some(InodeType::Directory) {
            return Err(crate::error::EngineError::NotADirectory);
        }
        Ok(resolved.inum)
    }

    /// # Errors
    ///
    /// See [`ops::stat`].
    pub fn stat(&mut self, cwd: InodeNum, path: &[u8]) -> EngineResult<Stat> {
        ops::stat(&mut self.inodes, &mut self.free, cwd, path, self.max_symlinks)
    }

    /// Flushes every dirty inode and block through to the device.
    ///
    /// # Errors
    ///
    /// Propagates the first device I/O error encountered.
    pub fn sync(&mut self) -> EngineResult<()> {
        self.inodes.sync().map_err(io_err)
    }

    /// Consumes the engine and returns the underlying device. Callers
    /// should [`Self::sync`] first to make sure everything reached it.
    pub fn into_device(self) -> Device {
        self.inodes.into_device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;
    use fs_types::ROOTINODE;

    fn formatted_image(num_sectors: usize) -> MemDevice {
        let sb = SuperBlock {
            num_blocks: i32::try_from(num_sectors).unwrap(),
            num_inodes: 64,
        };
        let mut device = MemDevice::new(num_sectors);

        let mut sector = [0u8; SECTOR_SIZE];
        *sector.as_data_view_mut().get_mut(0) = sb;
        device.write_sector(SuperBlock::SECTOR, &sector).unwrap();

        let root_sector = sb.inode_sector(ROOTINODE);
        let mut root_inode = Inode::zeroed();
        root_inode.ty = InodeType::Directory as i16;
        root_inode.nlink = 2;
        let mut sector = [0u8; SECTOR_SIZE];
        *sector.as_data_view_mut().get_mut(sb.inode_offset(ROOTINODE)) = root_inode;
        device.write_sector(root_sector, &sector).unwrap();

        device
    }

    #[test]
    fn mount_then_create_and_stat() {
        let device = formatted_image(512);
        let mut engine = Engine::mount(device, 16, 16, 8).unwrap();

        engine
            .create(ROOTINODE, b"/greeting", InodeType::Regular)
            .unwrap();
        let (inum, _) = engine
            .open(ROOTINODE, b"/greeting")
            .map(|r| (r.inum, r.inode))
            .unwrap();
        engine.write(inum, 0, b"hello").unwrap();

        let st = engine.stat(ROOTINODE, b"/greeting").unwrap();
        assert_eq!(st.size, 5);

        engine.sync().unwrap();
    }

    #[test]
    fn sync_then_remount_preserves_state() {
        let device = formatted_image(512);
        let mut engine = Engine::mount(device, 16, 16, 8).unwrap();
        engine.create(ROOTINODE, b"/a", InodeType::Regular).unwrap();
        engine.sync().unwrap();

        let device = engine.into_device();
        let mut remounted = Engine::mount(device, 16, 16, 8).unwrap();
        remounted.open(ROOTINODE, b"/a").unwrap();
    }
}
