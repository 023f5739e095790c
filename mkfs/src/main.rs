//! Formats a raw disk image file with an empty yfsd file system: a
//! superblock, a zeroed inode table, and a root directory holding only
//! `.` and `..`. Optionally seeds the root directory with files passed on
//! the command line, the way the original xv6 `mkfs` tool seeded its user
//! binaries into the image it built.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write as _},
    path::PathBuf,
};

use clap::Parser;
use dataview::PodMethods as _;
use fs_types::{
    BlockNum, DirEntry, IndirectBlock, Inode, InodeNum, InodeType, SuperBlock, DIRENTRY_SIZE,
    NUM_DIRECT, ROOTINODE, SECTOR_SIZE,
};

#[derive(Parser, Debug)]
#[command(name = "mkfs", about = "Format a yfsd disk image")]
struct Args {
    /// Path to the image file to create (overwritten if it exists).
    image: PathBuf,

    /// Total number of sectors in the image.
    #[arg(long, default_value_t = 4096)]
    blocks: u32,

    /// Total number of inodes in the image.
    #[arg(long, default_value_t = 200)]
    inodes: u32,

    /// Files to seed into the root directory.
    files: Vec<PathBuf>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let mut fs = FileSystem::new(&args.image, args.blocks, args.inodes)?;
    fs.clear_all_sections()?;
    fs.write_super_block()?;
    let root = fs.create_directory(ROOTINODE)?;
    assert_eq!(root, ROOTINODE);

    for path in &args.files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .expect("seed file path must have a valid UTF-8 file name");

        let mut buf = Vec::new();
        File::open(path)?.read_to_end(&mut buf)?;
        let inum = fs.create_file(&buf)?;
        fs.add_directory_entry(root, name.as_bytes(), inum)?;
    }

    eprintln!(
        "formatted {} sectors, {} inodes, root at inode {root}",
        args.blocks, args.inodes
    );
    Ok(())
}

struct FileSystem {
    img: File,
    sb: SuperBlock,
    next_free_inode: InodeNum,
    next_free_block: BlockNum,
}

impl FileSystem {
    fn new(image: &std::path::Path, num_blocks: u32, num_inodes: u32) -> io::Result<Self> {
        let img = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(image)?;

        let sb = SuperBlock {
            num_blocks: i32::try_from(num_blocks).unwrap(),
            num_inodes: i32::try_from(num_inodes).unwrap(),
        };

        Ok(Self {
            img,
            sb,
            next_free_inode: ROOTINODE,
            next_free_block: sb.first_data_block(),
        })
    }

    fn clear_all_sections(&mut self) -> io::Result<()> {
        let total = u32::try_from(self.sb.num_blocks).unwrap();
        for bn in 0..total {
            self.write_sector(bn, &[0u8; SECTOR_SIZE])?;
        }
        Ok(())
    }

    fn write_super_block(&mut self) -> io::Result<()> {
        let mut buf = [0u8; SECTOR_SIZE];
        *buf.as_data_view_mut().get_mut(0) = self.sb;
        self.write_sector(SuperBlock::SECTOR, &buf)
    }

    fn create_directory(&mut self, parent: InodeNum) -> io::Result<InodeNum> {
        let inum = self.alloc_inode(InodeType::Directory)?;
        self.add_directory_entry(inum, b".", inum)?;
        self.add_directory_entry(inum, b"..", parent)?;
        Ok(inum)
    }

    fn create_file(&mut self, content: &[u8]) -> io::Result<InodeNum> {
        let inum = self.alloc_inode(InodeType::Regular)?;
        self.append_inode(inum, content)?;
        Ok(inum)
    }

    fn add_directory_entry(
        &mut self,
        dir_inum: InodeNum,
        name: &[u8],
        inum: InodeNum,
    ) -> io::Result<()> {
        assert!(name.len() <= fs_types::DIRNAMELEN, "entry name too long");
        let mut entry = DirEntry::free();
        entry.set_name(name);
        entry.set_inode_num(inum);
        let mut bytes = [0u8; DIRENTRY_SIZE];
        *bytes.as_data_view_mut().get_mut(0) = entry;
        self.append_inode(dir_inum, &bytes)
    }

    fn write_sector(&mut self, bn: BlockNum, data: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        self.img
            .seek(SeekFrom::Start(u64::from(bn) * SECTOR_SIZE as u64))?;
        self.img.write_all(data)
    }

    fn read_sector(&mut self, bn: BlockNum) -> io::Result<[u8; SECTOR_SIZE]> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.img
            .seek(SeekFrom::Start(u64::from(bn) * SECTOR_SIZE as u64))?;
        self.img.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_inode(&mut self, inum: InodeNum, inode: &Inode) -> io::Result<()> {
        let bn = self.sb.inode_sector(inum);
        let mut sector = self.read_sector(bn)?;
        *sector.as_data_view_mut().get_mut(self.sb.inode_offset(inum)) = *inode;
        self.write_sector(bn, &sector)
    }

    fn read_inode(&mut self, inum: InodeNum) -> io::Result<Inode> {
        let bn = self.sb.inode_sector(inum);
        let sector = self.read_sector(bn)?;
        Ok(*sector.as_data_view().get(self.sb.inode_offset(inum)))
    }

    fn alloc_inode(&mut self, kind: InodeType) -> io::Result<InodeNum> {
        let inum = self.next_free_inode;
        self.next_free_inode += 1;

        let mut inode = Inode::zeroed();
        inode.ty = kind as i16;
        inode.nlink = 1;
        self.write_inode(inum, &inode)?;
        Ok(inum)
    }

    fn alloc_block(&mut self) -> BlockNum {
        let bn = self.next_free_block;
        self.next_free_block += 1;
        bn
    }

    fn append_inode(&mut self, inum: InodeNum, data: &[u8]) -> io::Result<()> {
        let mut inode = self.read_inode(inum)?;
        let mut file_off = inode.size as usize;
        let mut data = data;

        while !data.is_empty() {
            let bidx = file_off / SECTOR_SIZE;
            let bn = if bidx < NUM_DIRECT {
                if inode.direct[bidx] == 0 {
                    inode.direct[bidx] = self.alloc_block();
                }
                inode.direct[bidx]
            } else {
                let ind_idx = bidx - NUM_DIRECT;
                if inode.indirect == 0 {
                    inode.indirect = self.alloc_block();
                    self.write_sector(inode.indirect, &[0u8; SECTOR_SIZE])?;
                }
                let sector = self.read_sector(inode.indirect)?;
                let mut indirect = IndirectBlock::from_sector(&sector);
                if indirect.get(ind_idx) == 0 {
                    indirect.set(ind_idx, self.alloc_block());
                    let mut sector = sector;
                    indirect.write_into(&mut sector);
                    self.write_sector(inode.indirect, &sector)?;
                }
                indirect.get(ind_idx)
            };

            let mut sector = self.read_sector(bn)?;
            let block_start = bidx * SECTOR_SIZE;
            let within = file_off - block_start;
            let chunk = usize::min(data.len(), SECTOR_SIZE - within);
            sector[within..within + chunk].copy_from_slice(&data[..chunk]);
            self.write_sector(bn, &sector)?;

            file_off += chunk;
            data = &data[chunk..];
        }

        inode.size = u32::try_from(file_off).unwrap();
        self.write_inode(inum, &inode)
    }
}
