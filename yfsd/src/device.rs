//! The raw block device collaborator.
//!
//! Out of scope per the core spec: this module supplies two concrete
//! implementations of [`block_cache::BlockDevice`] so the engine has
//! something to drive, a file-backed device for the real server binary,
//! and an in-memory device for tests.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
};

use block_cache::BlockDevice;
use fs_types::SECTOR_SIZE;

/// A disk image backed by a regular file.
pub struct FileDevice {
    file: File,
}

impl FileDevice {
    pub fn open(file: File) -> Self {
        Self { file }
    }
}

impl BlockDevice<SECTOR_SIZE> for FileDevice {
    type Error = io::Error;

    fn read_sector(&mut self, n: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        self.file
            .seek(SeekFrom::Start(u64::from(n) * SECTOR_SIZE as u64))?;
        self.file.read_exact(buf)
    }

    fn write_sector(&mut self, n: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        self.file
            .seek(SeekFrom::Start(u64::from(n) * SECTOR_SIZE as u64))?;
        self.file.write_all(buf)
    }
}

/// An in-memory disk image, for tests and tooling.
#[derive(Debug, Clone)]
pub struct MemDevice {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl MemDevice {
    #[must_use]
    pub fn new(num_sectors: usize) -> Self {
        Self {
            sectors: vec![[0; SECTOR_SIZE]; num_sectors],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

impl BlockDevice<SECTOR_SIZE> for MemDevice {
    type Error = io::Error;

    fn read_sector(&mut self, n: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let sector = self.sectors.get(n as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "sector out of range")
        })?;
        *buf = *sector;
        Ok(())
    }

    fn write_sector(&mut self, n: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let sector = self.sectors.get_mut(n as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "sector out of range")
        })?;
        *sector = *buf;
        Ok(())
    }
}
