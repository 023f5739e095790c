//! The `yfsd` server binary: mounts (and optionally formats) a disk image
//! and serves requests over stdio framing until told to shut down.

use std::fs::OpenOptions;

use clap::Parser;
use yfsd::{
    device::FileDevice,
    dispatch::Dispatcher,
    engine::Engine,
    transport::StdioTransport,
};

/// A user-space file system server for a single raw block device image.
#[derive(Parser, Debug)]
#[command(name = "yfsd", version, about)]
struct Args {
    /// Path to the disk image file.
    #[arg(long)]
    image: std::path::PathBuf,

    /// Format the image as a fresh, empty file system before serving.
    #[arg(long)]
    format: bool,

    /// Number of sectors the image should have when `--format` is given.
    #[arg(long, default_value_t = 4096)]
    format_blocks: u32,

    /// Resident block cache capacity, in sectors.
    #[arg(long, default_value_t = 64)]
    block_cache_size: usize,

    /// Resident inode cache capacity, in inodes.
    #[arg(long, default_value_t = 32)]
    inode_cache_size: usize,

    /// Maximum symlink expansions per path resolution.
    #[arg(long, default_value_t = fs_types::MAXSYMLINKS)]
    max_symlinks: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(args.format)
        .truncate(false)
        .open(&args.image)?;

    if args.format {
        yfsd_format::format(&file, args.format_blocks)?;
    }

    let device = FileDevice::open(file);
    let engine = Engine::mount(
        device,
        args.block_cache_size,
        args.inode_cache_size,
        args.max_symlinks,
    )?;

    tracing::info!(image = %args.image.display(), "serving");

    let mut dispatcher = Dispatcher::new(engine);
    let mut transport = StdioTransport::new();
    dispatcher.serve(&mut transport)?;

    Ok(())
}

/// Minimal inline formatter, shared in spirit with the standalone `mkfs`
/// binary: writes a superblock and an all-free inode table, with inode 1
/// pre-allocated as the root directory.
mod yfsd_format {
    use std::{
        fs::File,
        io::{Seek, SeekFrom, Write},
    };

    use dataview::PodMethods as _;
    use fs_types::{Inode, InodeType, SuperBlock, ROOTINODE, SECTOR_SIZE};

    pub fn format(file: &File, num_blocks: u32) -> std::io::Result<()> {
        let mut file = file.try_clone()?;
        let sb = SuperBlock {
            num_blocks: i32::try_from(num_blocks).unwrap(),
            num_inodes: 200,
        };

        file.set_len(u64::from(num_blocks) * SECTOR_SIZE as u64)?;

        let mut sector = [0u8; SECTOR_SIZE];
        *sector.as_data_view_mut().get_mut(0) = sb;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&sector)?;

        for s in 1..sb.inode_sectors() {
            file.seek(SeekFrom::Start(u64::from(s) * SECTOR_SIZE as u64))?;
            file.write_all(&[0u8; SECTOR_SIZE])?;
        }

        let root_sector_no = sb.inode_sector(ROOTINODE);
        let mut sector = [0u8; SECTOR_SIZE];
        let mut root = Inode::zeroed();
        root.ty = InodeType::Directory as i16;
        root.nlink = 2;
        *sector
            .as_data_view_mut()
            .get_mut(sb.inode_offset(ROOTINODE)) = root;
        file.seek(SeekFrom::Start(u64::from(root_sector_no) * SECTOR_SIZE as u64))?;
        file.write_all(&sector)?;

        for b in sb.first_data_block()..sb.num_blocks as u32 {
            file.seek(SeekFrom::Start(u64::from(b) * SECTOR_SIZE as u64))?;
            file.write_all(&[0u8; SECTOR_SIZE])?;
        }

        file.flush()
    }
}
