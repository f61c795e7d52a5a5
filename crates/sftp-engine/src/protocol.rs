//! SFTP v3 wire types: packet types, status codes, open flags, rename
//! flags, and the sparse `FileAttributes` record.
//!
//! Draws on `draft-ietf-secsh-filexfer-02` (the version this crate
//! negotiates) the same way the teacher crate's `protocol.rs` does; widened
//! per `SPEC_FULL.md` §3 with `RenameFlags` and attribute extension pairs,
//! neither of which the teacher's single-shot client needed.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// The only SFTP protocol version this engine negotiates down to.
pub const MAX_SUPPORTED_VERSION: u32 = 3;

/// SFTP packet type byte, shared by requests and responses.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Init = 1,
    Version = 2,
    Open = 3,
    Close = 4,
    Read = 5,
    Write = 6,
    Lstat = 7,
    Fstat = 8,
    Setstat = 9,
    Fsetstat = 10,
    Opendir = 11,
    Readdir = 12,
    Remove = 13,
    Mkdir = 14,
    Rmdir = 15,
    Realpath = 16,
    Stat = 17,
    Rename = 18,
    Readlink = 19,
    Symlink = 20,
    Status = 101,
    Handle = 102,
    Data = 103,
    Name = 104,
    Attrs = 105,
    Extended = 200,
    ExtendedReply = 201,
}

impl PacketType {
    /// True for the packet types a response may carry (spec §4.4).
    pub fn is_response(self) -> bool {
        matches!(
            self,
            PacketType::Status
                | PacketType::Handle
                | PacketType::Data
                | PacketType::Name
                | PacketType::Attrs
                | PacketType::ExtendedReply
        )
    }
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => PacketType::Init,
            2 => PacketType::Version,
            3 => PacketType::Open,
            4 => PacketType::Close,
            5 => PacketType::Read,
            6 => PacketType::Write,
            7 => PacketType::Lstat,
            8 => PacketType::Fstat,
            9 => PacketType::Setstat,
            10 => PacketType::Fsetstat,
            11 => PacketType::Opendir,
            12 => PacketType::Readdir,
            13 => PacketType::Remove,
            14 => PacketType::Mkdir,
            15 => PacketType::Rmdir,
            16 => PacketType::Realpath,
            17 => PacketType::Stat,
            18 => PacketType::Rename,
            19 => PacketType::Readlink,
            20 => PacketType::Symlink,
            101 => PacketType::Status,
            102 => PacketType::Handle,
            103 => PacketType::Data,
            104 => PacketType::Name,
            105 => PacketType::Attrs,
            200 => PacketType::Extended,
            201 => PacketType::ExtendedReply,
            other => return Err(Error::Protocol(format!("unknown packet type: {other}"))),
        })
    }
}

/// SFTP status codes (spec §3).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 0,
    Eof = 1,
    NoSuchFile = 2,
    PermissionDenied = 3,
    Failure = 4,
    BadMessage = 5,
    NoConnection = 6,
    ConnectionLost = 7,
    OpUnsupported = 8,
}

impl TryFrom<u32> for StatusCode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            4 => StatusCode::Failure,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            other => return Err(Error::Protocol(format!("unknown status code: {other}"))),
        })
    }
}

/// `SSH_FXF_*` open-mode bits (spec §3's `OpenMode`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode(pub u32);

impl OpenMode {
    pub const READ: u32 = 0x0000_0001;
    pub const WRITE: u32 = 0x0000_0002;
    pub const APPEND: u32 = 0x0000_0004;
    pub const CREAT: u32 = 0x0000_0008;
    pub const TRUNC: u32 = 0x0000_0010;
    pub const EXCL: u32 = 0x0000_0020;
    /// Not part of the v3 wire mask; recorded for callers, dropped on
    /// encode (no bit is reserved for it on the wire in v3).
    pub const TEXT: u32 = 0x0000_0040;

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// The mask actually placed on the wire: `TEXT` has no v3 bit.
    pub fn wire_mask(self) -> u32 {
        self.0 & !Self::TEXT
    }
}

impl std::ops::BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

/// `rename()` flags (spec §3's `RenameFlags`); only meaningful verbatim on
/// protocol >= 5, otherwise drives the extension-fallback state machine in
/// `engine::Engine::rename`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameFlags(pub u32);

impl RenameFlags {
    pub const OVERWRITE: u32 = 0x0000_0001;
    pub const ATOMIC: u32 = 0x0000_0002;
    pub const NATIVE: u32 = 0x0000_0004;

    pub fn empty() -> Self {
        RenameFlags(0)
    }

    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

const ATTR_SIZE: u32 = 0x0000_0001;
const ATTR_UIDGID: u32 = 0x0000_0002;
const ATTR_PERMISSIONS: u32 = 0x0000_0004;
const ATTR_ACMODTIME: u32 = 0x0000_0008;
const ATTR_EXTENDED: u32 = 0x8000_0000;
const ATTR_KNOWN_BITS: u32 = ATTR_SIZE | ATTR_UIDGID | ATTR_PERMISSIONS | ATTR_ACMODTIME | ATTR_EXTENDED;

/// Sparse SFTP file attributes record (spec §3/§4.1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
    /// `name@domain` → opaque value extension pairs. Unknown pairs survive
    /// a decode/encode round trip untouched.
    pub extensions: BTreeMap<String, Vec<u8>>,
}

impl FileAttributes {
    /// Encode in the canonical field order: size, uid/gid, permissions,
    /// atime/mtime, extension pairs.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= ATTR_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= ATTR_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= ATTR_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= ATTR_ACMODTIME;
        }
        if !self.extensions.is_empty() {
            flags |= ATTR_EXTENDED;
        }

        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
        if !self.extensions.is_empty() {
            buf.put_u32(self.extensions.len() as u32);
            for (key, value) in &self.extensions {
                crate::codec::put_string(buf, key);
                crate::codec::put_bytes(buf, value);
            }
        }
    }

    /// Decode, tolerating unknown extension pairs but rejecting unknown
    /// flag bits outright (spec §4.1: "decoding must tolerate unknown
    /// extension pairs" / "unknown flag bits cause a decode failure").
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let flags = crate::codec::get_u32(buf)?;
        if flags & !ATTR_KNOWN_BITS != 0 {
            return Err(Error::Protocol(format!(
                "unknown FileAttributes flag bits: {:#010x}",
                flags
            )));
        }

        let mut attrs = FileAttributes::default();

        if flags & ATTR_SIZE != 0 {
            attrs.size = Some(crate::codec::get_u64(buf)?);
        }
        if flags & ATTR_UIDGID != 0 {
            attrs.uid = Some(crate::codec::get_u32(buf)?);
            attrs.gid = Some(crate::codec::get_u32(buf)?);
        }
        if flags & ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(crate::codec::get_u32(buf)?);
        }
        if flags & ATTR_ACMODTIME != 0 {
            attrs.atime = Some(crate::codec::get_u32(buf)?);
            attrs.mtime = Some(crate::codec::get_u32(buf)?);
        }
        if flags & ATTR_EXTENDED != 0 {
            let count = crate::codec::get_u32(buf)? as usize;
            for _ in 0..count {
                let key = crate::codec::get_string(buf)?;
                let value = crate::codec::get_bytes(buf)?;
                attrs.extensions.insert(key, value);
            }
        }

        Ok(attrs)
    }
}

/// Helper used by `reader`/`engine` to peek the leading `u32` request id a
/// response payload carries (every response but `VERSION` has one, spec
/// §3).
pub fn peek_request_id(body: &[u8]) -> Result<u32> {
    let mut cursor = body;
    crate::codec::get_u32(&mut cursor)
}
