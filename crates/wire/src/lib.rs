//! Request/reply message tags and payload layouts for the yfsd protocol.
//!
//! Every request and reply travels in a single fixed-size message slot
//! (see [`MESSAGE_SIZE`]); the transport and cross-address-space copy
//! primitives that move this slot and its referenced buffers between client
//! and server are out of scope here (see the `Transport` trait in `yfsd`).

use dataview::{Pod, PodMethods as _};
use strum::FromRepr;

/// Size in bytes of the fixed message slot.
pub const MESSAGE_SIZE: usize = 64;

/// The distinguished error reply value.
pub const ERROR: i64 = -1;

/// Operation tags, decoded from the first word of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(i32)]
pub enum Tag {
    Open = 0,
    Create = 1,
    Read = 2,
    Write = 3,
    Seek = 4,
    Link = 5,
    Unlink = 6,
    Symlink = 7,
    Readlink = 8,
    Mkdir = 9,
    Rmdir = 10,
    Chdir = 11,
    Stat = 12,
    Sync = 13,
    Shutdown = 14,
}

/// `CREATE`'s creation-hint argument: either "create fresh" or "point this
/// entry at an already-existing inode" (used by `link`).
pub const CREATE_NEW: i32 = -1;

/// Payload for `OPEN` and `CREATE`: resolve/create a pathname relative to a
/// current-directory inode.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct PathRequest {
    pub tag: i32,
    pub cwd_inode: i32,
    pub path_ptr: u64,
    pub path_len: i32,
}

/// Payload for `READ` and `WRITE`.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct FileRequest {
    pub tag: i32,
    pub inode: i32,
    pub buf_ptr: u64,
    pub size: i32,
    pub offset: i32,
}

/// Payload for `SEEK`.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct SeekRequest {
    pub tag: i32,
    pub inode: i32,
    pub cur_pos: i32,
    pub offset: i32,
    pub whence: i32,
}

/// Payload for `LINK` and `SYMLINK`.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct LinkRequest {
    pub tag: i32,
    pub cwd_inode: i32,
    pub old_ptr: u64,
    pub new_ptr: u64,
    pub old_len: i32,
    pub new_len: i32,
}

/// Payload for `READLINK`.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct ReadlinkRequest {
    pub tag: i32,
    pub cwd_inode: i32,
    pub path_ptr: u64,
    pub buf_ptr: u64,
    pub path_len: i32,
    pub len: i32,
}

/// Payload for `STAT`.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct StatRequest {
    pub tag: i32,
    pub cwd_inode: i32,
    pub path_ptr: u64,
    pub path_len: i32,
    pub statbuf_ptr: u64,
}

/// Payload for `SYNC` and `SHUTDOWN`.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct GenericRequest {
    pub tag: i32,
}

/// The single-field reply.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct Reply {
    pub result: i64,
}

impl Reply {
    #[must_use]
    pub fn ok(result: i64) -> Self {
        Self { result }
    }

    #[must_use]
    pub fn error() -> Self {
        Self { result: ERROR }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; MESSAGE_SIZE] {
        let mut buf = [0u8; MESSAGE_SIZE];
        *buf.as_data_view_mut().get_mut(0) = self;
        buf
    }
}

/// Reads the leading tag word out of a raw message slot.
#[must_use]
pub fn decode_tag(buf: &[u8; MESSAGE_SIZE]) -> Option<Tag> {
    let raw: i32 = *buf.as_data_view().get(0);
    Tag::from_repr(raw)
}

/// Reads a `T` out of the front of a raw message slot.
#[must_use]
pub fn decode<T: Pod>(buf: &[u8; MESSAGE_SIZE]) -> T {
    *buf.as_data_view().get(0)
}

/// File metadata returned by `STAT`.
#[derive(Pod, Clone, Copy, Debug)]
#[repr(C)]
pub struct Stat {
    pub inum: u32,
    pub ty: i16,
    pub nlink: i16,
    pub size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_tags() {
        for (raw, expected) in [(0, Tag::Open), (13, Tag::Sync), (14, Tag::Shutdown)] {
            let mut buf = [0u8; MESSAGE_SIZE];
            *buf.as_data_view_mut().get_mut(0) = raw;
            assert_eq!(decode_tag(&buf), Some(expected));
        }
    }

    #[test]
    fn unknown_tag_decodes_to_none() {
        let mut buf = [0u8; MESSAGE_SIZE];
        *buf.as_data_view_mut().get_mut(0) = 999;
        assert_eq!(decode_tag(&buf), None);
    }

    #[test]
    fn path_request_roundtrip() {
        let req = PathRequest {
            tag: Tag::Open as i32,
            cwd_inode: 1,
            path_ptr: 0x1000,
            path_len: 5,
        };
        let mut buf = [0u8; MESSAGE_SIZE];
        *buf.as_data_view_mut().get_mut(0) = req;
        let decoded: PathRequest = decode(&buf);
        assert_eq!(decoded.cwd_inode, 1);
        assert_eq!(decoded.path_len, 5);
    }
}
