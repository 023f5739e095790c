//! The request/reply transport boundary.
//!
//! Out of scope: the real microkernel IPC primitives (`Receive`,
//! `Reply`, `CopySharedPage`-style cross-address-space reads/writes) live
//! below this trait; what's here is the shape the dispatcher needs, plus an
//! in-process loopback double for tests.

use wire::MESSAGE_SIZE;

/// Opaque handle identifying which client a request came from, so the
/// reply and any buffer copies go back to the right place.
pub type ClientId = u32;

/// The boundary between the dispatcher and the underlying IPC mechanism.
pub trait Transport {
    type Error;

    /// Blocks until a request arrives, decoding it into `buf`. Returns the
    /// sender so the eventual reply (and any buffer copies) target them.
    fn receive(&mut self, buf: &mut [u8; MESSAGE_SIZE]) -> Result<ClientId, Self::Error>;

    /// Sends a reply message back to `client`.
    fn reply(&mut self, client: ClientId, buf: &[u8; MESSAGE_SIZE]) -> Result<(), Self::Error>;

    /// Copies `local.len()` bytes out of `client`'s address space at
    /// `remote_ptr` into `local` (e.g. a pathname argument).
    fn copy_from(&mut self, client: ClientId, remote_ptr: u64, local: &mut [u8]) -> Result<(), Self::Error>;

    /// Copies `local` into `client`'s address space at `remote_ptr` (e.g. a
    /// `read` result buffer).
    fn copy_to(&mut self, client: ClientId, remote_ptr: u64, local: &[u8]) -> Result<(), Self::Error>;
}

/// An in-process transport double, for tests and the loopback binary.
///
/// "Remote" memory is just a map of pointer value to byte vector; a test
/// populates it before sending a request and reads it back after.
#[derive(Default)]
pub struct LoopbackTransport {
    inbox: std::collections::VecDeque<(ClientId, [u8; MESSAGE_SIZE])>,
    outbox: Vec<(ClientId, [u8; MESSAGE_SIZE])>,
    memory: std::collections::HashMap<u64, Vec<u8>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_request(&mut self, client: ClientId, msg: [u8; MESSAGE_SIZE]) {
        self.inbox.push_back((client, msg));
    }

    pub fn put_memory(&mut self, ptr: u64, data: &[u8]) {
        self.memory.insert(ptr, data.to_vec());
    }

    #[must_use]
    pub fn take_memory(&mut self, ptr: u64) -> Option<Vec<u8>> {
        self.memory.remove(&ptr)
    }

    #[must_use]
    pub fn last_reply(&self) -> Option<&(ClientId, [u8; MESSAGE_SIZE])> {
        self.outbox.last()
    }
}

/// A transport over the process's own stdin/stdout, framing each request
/// and reply as a fixed [`MESSAGE_SIZE`] message followed by a 4-byte
/// little-endian length and that many bytes for any `copy_from`/`copy_to`
/// payload. Stands in for the real microkernel `Receive`/`Reply`/copy
/// syscalls, which aren't reachable from user-space Rust outside Yalnix.
pub struct StdioTransport {
    stdin: std::io::Stdin,
    stdout: std::io::Stdout,
}

impl StdioTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdin: std::io::stdin(),
            stdout: std::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StdioTransport {
    type Error = std::io::Error;

    fn receive(&mut self, buf: &mut [u8; MESSAGE_SIZE]) -> Result<ClientId, Self::Error> {
        use std::io::Read;
        self.stdin.read_exact(buf)?;
        Ok(0)
    }

    fn reply(&mut self, _client: ClientId, buf: &[u8; MESSAGE_SIZE]) -> Result<(), Self::Error> {
        use std::io::Write;
        self.stdout.write_all(buf)?;
        self.stdout.flush()
    }

    fn copy_from(&mut self, _client: ClientId, _remote_ptr: u64, local: &mut [u8]) -> Result<(), Self::Error> {
        use std::io::Read;
        self.stdin.read_exact(local)
    }

    fn copy_to(&mut self, _client: ClientId, _remote_ptr: u64, local: &[u8]) -> Result<(), Self::Error> {
        use std::io::Write;
        self.stdout.write_all(local)?;
        self.stdout.flush()
    }
}

impl Transport for LoopbackTransport {
    type Error = std::convert::Infallible;

    fn receive(&mut self, buf: &mut [u8; MESSAGE_SIZE]) -> Result<ClientId, Self::Error> {
        let (client, msg) = self.inbox.pop_front().expect("no queued request");
        *buf = msg;
        Ok(client)
    }

    fn reply(&mut self, client: ClientId, buf: &[u8; MESSAGE_SIZE]) -> Result<(), Self::Error> {
        self.outbox.push((client, *buf));
        Ok(())
    }

    fn copy_from(&mut self, _client: ClientId, remote_ptr: u64, local: &mut [u8]) -> Result<(), Self::Error> {
        let data = self.memory.get(&remote_ptr).expect("no memory at pointer");
        local.copy_from_slice(&data[..local.len()]);
        Ok(())
    }

    fn copy_to(&mut self, _client: ClientId, remote_ptr: u64, local: &[u8]) -> Result<(), Self::Error> {
        self.memory.insert(remote_ptr, local.to_vec());
        Ok(())
    }
}
