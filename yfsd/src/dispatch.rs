//! The single-threaded request dispatch loop.
//!
//! One message in, one reply out, no concurrency: the engine and its
//! caches use plain interior mutability rather than locks because nothing
//! here ever runs two requests at once (mirrors the single-threaded request
//! loop a Yalnix user-space server runs against `Receive`/`Reply`).

use block_cache::BlockDevice;
use dataview::PodMethods as _;
use fs_types::{InodeType, SECTOR_SIZE};
use wire::{
    FileRequest, GenericRequest, LinkRequest, PathRequest, ReadlinkRequest, Reply, SeekRequest,
    Stat as WireStat, StatRequest, Tag, MESSAGE_SIZE,
};

use crate::{
    engine::Engine,
    transport::{ClientId, Transport},
};

/// Wraps an [`Engine`] and drives the receive/decode/execute/reply loop.
///
/// Each request carries its own working-directory inode number (the client
/// is responsible for remembering the inode a prior `Chdir` resolved to),
/// so the dispatcher itself holds no per-client state.
pub struct Dispatcher<Device> {
    engine: Engine<Device>,
}

impl<Device> Dispatcher<Device>
where
    Device: BlockDevice<SECTOR_SIZE>,
    Device::Error: std::fmt::Display,
{
    #[must_use]
    pub fn new(engine: Engine<Device>) -> Self {
        Self { engine }
    }

    /// Services requests until a client sends `Shutdown`.
    ///
    /// # Errors
    ///
    /// Propagates a transport error if `receive`/`reply`/copy primitives
    /// fail.
    pub fn serve<T: Transport>(&mut self, transport: &mut T) -> Result<(), T::Error> {
        loop {
            if !self.run_one(transport)? {
                return Ok(());
            }
        }
    }

    /// Services a single request. Returns `false` after a `Shutdown`.
    ///
    /// # Errors
    ///
    /// Propagates a transport error.
    pub fn run_one<T: Transport>(&mut self, transport: &mut T) -> Result<bool, T::Error> {
        let mut msg = [0u8; MESSAGE_SIZE];
        let client = transport.receive(&mut msg)?;

        let Some(tag) = wire::decode_tag(&msg) else {
            tracing::warn!("dropping request with unrecognized tag");
            transport.reply(client, &Reply::error().to_bytes())?;
            return Ok(true);
        };

        if tag == Tag::Shutdown {
            if let Err(e) = self.engine.sync() {
                tracing::warn!(%e, "sync failed during shutdown");
            }
            transport.reply(client, &Reply::ok(0).to_bytes())?;
            return Ok(false);
        }

        let reply = self.handle(client, tag, &msg, transport)?;
        transport.reply(client, &reply.to_bytes())?;
        Ok(true)
    }

    fn handle<T: Transport>(
        &mut self,
        client: ClientId,
        tag: Tag,
        msg: &[u8; MESSAGE_SIZE],
        transport: &mut T,
    ) -> Result<Reply, T::Error> {
        let reply = match tag {
            Tag::Open => {
                let req: PathRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                self.engine
                    .open(req.cwd_inode as u32, &path)
                    .map(|r| Reply::ok(i64::from(r.inum)))
            }
            Tag::Create => {
                let req: PathRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                self.engine
                    .create(req.cwd_inode as u32, &path, InodeType::Regular)
                    .map(|(inum, _)| Reply::ok(i64::from(inum)))
            }
            Tag::Read => {
                let req: FileRequest = wire::decode(msg);
                let mut buf = vec![0u8; req.size.max(0) as usize];
                let result = self
                    .engine
                    .read(req.inode as u32, req.offset as u32, &mut buf);
                match result {
                    Ok(n) => {
                        transport.copy_to(client, req.buf_ptr, &buf[..n])?;
                        Ok(Reply::ok(i64::try_from(n).unwrap_or(i64::MAX)))
                    }
                    Err(e) => Err(e),
                }
            }
            Tag::Write => {
                let req: FileRequest = wire::decode(msg);
                let mut buf = vec![0u8; req.size.max(0) as usize];
                transport.copy_from(client, req.buf_ptr, &mut buf)?;
                self.engine
                    .write(req.inode as u32, req.offset as u32, &buf)
                    .map(|n| Reply::ok(i64::try_from(n).unwrap_or(i64::MAX)))
            }
            Tag::Seek => {
                let req: SeekRequest = wire::decode(msg);
                self.engine
                    .seek(req.inode as u32, req.cur_pos, req.offset, req.whence)
                    .map(|pos| Reply::ok(i64::from(pos)))
            }
            Tag::Link => {
                let req: LinkRequest = wire::decode(msg);
                let old = self.read_path(client, transport, req.old_ptr, req.old_len)?;
                let new = self.read_path(client, transport, req.new_ptr, req.new_len)?;
                self.engine
                    .link(req.cwd_inode as u32, &old, &new)
                    .map(|()| Reply::ok(0))
            }
            Tag::Unlink => {
                let req: PathRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                self.engine
                    .unlink(req.cwd_inode as u32, &path)
                    .map(|()| Reply::ok(0))
            }
            Tag::Symlink => {
                let req: LinkRequest = wire::decode(msg);
                let link_path = self.read_path(client, transport, req.old_ptr, req.old_len)?;
                let target = self.read_path(client, transport, req.new_ptr, req.new_len)?;
                self.engine
                    .symlink(req.cwd_inode as u32, &link_path, &target)
                    .map(|()| Reply::ok(0))
            }
            Tag::Readlink => {
                let req: ReadlinkRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                let mut buf = vec![0u8; req.len.max(0) as usize];
                let result = self.engine.readlink(req.cwd_inode as u32, &path, &mut buf);
                match result {
                    Ok(n) => {
                        transport.copy_to(client, req.buf_ptr, &buf[..n])?;
                        Ok(Reply::ok(i64::try_from(n).unwrap_or(i64::MAX)))
                    }
                    Err(e) => Err(e),
                }
            }
            Tag::Mkdir => {
                let req: PathRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                self.engine
                    .mkdir(req.cwd_inode as u32, &path)
                    .map(|inum| Reply::ok(i64::from(inum)))
            }
            Tag::Rmdir => {
                let req: PathRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                self.engine
                    .rmdir(req.cwd_inode as u32, &path)
                    .map(|()| Reply::ok(0))
            }
            Tag::Chdir => {
                let req: PathRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                self.engine
                    .chdir(req.cwd_inode as u32, &path)
                    .map(|inum| Reply::ok(i64::from(inum)))
            }
            Tag::Stat => {
                let req: StatRequest = wire::decode(msg);
                let path = self.read_path(client, transport, req.path_ptr, req.path_len)?;
                match self.engine.stat(req.cwd_inode as u32, &path) {
                    Ok(st) => {
                        let wire_stat = WireStat {
                            inum: st.inum,
                            ty: st.ty,
                            nlink: st.nlink,
                            size: st.size,
                        };
                        let mut bytes = [0u8; std::mem::size_of::<WireStat>()];
                        *bytes.as_data_view_mut().get_mut(0) = wire_stat;
                        transport.copy_to(client, req.statbuf_ptr, &bytes)?;
                        Ok(Reply::ok(0))
                    }
                    Err(e) => Err(e),
                }
            }
            Tag::Sync => {
                let _req: GenericRequest = wire::decode(msg);
                self.engine.sync().map(|()| Reply::ok(0))
            }
            Tag::Shutdown => unreachable!("handled before dispatch"),
        };

        Ok(reply.unwrap_or_else(|err| {
            tracing::debug!(%err, ?tag, "request failed");
            Reply::error()
        }))
    }

    fn read_path<T: Transport>(
        &self,
        client: ClientId,
        transport: &mut T,
        ptr: u64,
        len: i32,
    ) -> Result<Vec<u8>, T::Error> {
        let mut buf = vec![0u8; len.max(0) as usize];
        transport.copy_from(client, ptr, &mut buf)?;
        Ok(buf)
    }
}
