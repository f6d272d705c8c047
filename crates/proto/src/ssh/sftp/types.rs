//! File transfer protocol constants and attribute encoding (version 3).

use crate::ssh::codec;
use scribe_platform::{ScribeError, ScribeResult};

/// Protocol version spoken by this client.
pub const SFTP_VERSION: u32 = 3;

/// Packet type numbers.
pub mod packet_type {
    /// Client hello.
    pub const INIT: u8 = 1;
    /// Server hello.
    pub const VERSION: u8 = 2;
    /// Open a file.
    pub const OPEN: u8 = 3;
    /// Close a handle.
    pub const CLOSE: u8 = 4;
    /// Read from a file handle.
    pub const READ: u8 = 5;
    /// Write to a file handle.
    pub const WRITE: u8 = 6;
    /// Open a directory.
    pub const OPENDIR: u8 = 11;
    /// Read directory entries.
    pub const READDIR: u8 = 12;
    /// Remove a file.
    pub const REMOVE: u8 = 13;
    /// Create a directory.
    pub const MKDIR: u8 = 14;
    /// Remove a directory.
    pub const RMDIR: u8 = 15;
    /// Canonicalize a path.
    pub const REALPATH: u8 = 16;
    /// Stat a path, following links.
    pub const STAT: u8 = 17;
    /// Rename a path.
    pub const RENAME: u8 = 18;
    /// Status reply.
    pub const STATUS: u8 = 101;
    /// Handle reply.
    pub const HANDLE: u8 = 102;
    /// Data reply.
    pub const DATA: u8 = 103;
    /// Name-list reply.
    pub const NAME: u8 = 104;
    /// Attributes reply.
    pub const ATTRS: u8 = 105;
}

/// Status codes carried by STATUS replies.
pub mod status_code {
    /// Success.
    pub const OK: u32 = 0;
    /// End of file or directory.
    pub const EOF: u32 = 1;
    /// Path does not exist.
    pub const NO_SUCH_FILE: u32 = 2;
    /// Permission denied.
    pub const PERMISSION_DENIED: u32 = 3;
    /// Generic failure.
    pub const FAILURE: u32 = 4;
    /// Malformed request.
    pub const BAD_MESSAGE: u32 = 5;
    /// No connection (client-side only).
    pub const NO_CONNECTION: u32 = 6;
    /// Connection lost (client-side only).
    pub const CONNECTION_LOST: u32 = 7;
    /// Operation unsupported by the server.
    pub const OP_UNSUPPORTED: u32 = 8;
}

/// Open flags (pflags) for OPEN requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Open for reading.
    pub const READ: OpenFlags = OpenFlags(0x01);
    /// Open for writing.
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    /// Writes append.
    pub const APPEND: OpenFlags = OpenFlags(0x04);
    /// Create if missing.
    pub const CREATE: OpenFlags = OpenFlags(0x08);
    /// Truncate to zero length.
    pub const TRUNCATE: OpenFlags = OpenFlags(0x10);
    /// Fail if the file exists (with CREATE).
    pub const EXCL: OpenFlags = OpenFlags(0x20);

    /// Raw pflags value.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;
    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

const ATTR_SIZE: u32 = 0x01;
const ATTR_UIDGID: u32 = 0x02;
const ATTR_PERMISSIONS: u32 = 0x04;
const ATTR_ACMODTIME: u32 = 0x08;

/// File attributes; every field optional, presence tracked by flags on
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileAttributes {
    /// Size in bytes.
    pub size: Option<u64>,
    /// Owner and group ids.
    pub uid_gid: Option<(u32, u32)>,
    /// POSIX permission bits.
    pub permissions: Option<u32>,
    /// Access and modification times (seconds since the epoch).
    pub times: Option<(u32, u32)>,
}

impl FileAttributes {
    /// True when the permission bits mark a directory.
    pub fn is_dir(&self) -> bool {
        self.permissions
            .map(|mode| mode & 0o170000 == 0o040000)
            .unwrap_or(false)
    }

    /// Encodes to the wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= ATTR_SIZE;
        }
        if self.uid_gid.is_some() {
            flags |= ATTR_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= ATTR_PERMISSIONS;
        }
        if self.times.is_some() {
            flags |= ATTR_ACMODTIME;
        }

        let mut buf = Vec::new();
        codec::write_u32(&mut buf, flags);
        if let Some(size) = self.size {
            codec::write_u64(&mut buf, size);
        }
        if let Some((uid, gid)) = self.uid_gid {
            codec::write_u32(&mut buf, uid);
            codec::write_u32(&mut buf, gid);
        }
        if let Some(permissions) = self.permissions {
            codec::write_u32(&mut buf, permissions);
        }
        if let Some((atime, mtime)) = self.times {
            codec::write_u32(&mut buf, atime);
            codec::write_u32(&mut buf, mtime);
        }
        buf
    }

    /// Decodes from the wire form, advancing `offset`.
    pub fn read_from(data: &[u8], offset: &mut usize) -> ScribeResult<Self> {
        let flags = codec::read_u32(data, offset)?;
        let mut attrs = FileAttributes::default();
        if flags & ATTR_SIZE != 0 {
            attrs.size = Some(codec::read_u64(data, offset)?);
        }
        if flags & ATTR_UIDGID != 0 {
            let uid = codec::read_u32(data, offset)?;
            let gid = codec::read_u32(data, offset)?;
            attrs.uid_gid = Some((uid, gid));
        }
        if flags & ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::read_u32(data, offset)?);
        }
        if flags & ATTR_ACMODTIME != 0 {
            let atime = codec::read_u32(data, offset)?;
            let mtime = codec::read_u32(data, offset)?;
            attrs.times = Some((atime, mtime));
        }
        Ok(attrs)
    }
}

/// Maps a non-OK status reply to an error.
pub fn status_error(code: u32, message: String) -> ScribeError {
    ScribeError::Sftp { code, message }
}

/// One entry from a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name relative to the directory.
    pub filename: String,
    /// Server-formatted long listing line.
    pub longname: String,
    /// Entry attributes.
    pub attrs: FileAttributes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags_combine() {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        assert_eq!(flags.bits(), 0x02 | 0x08 | 0x10);
    }

    #[test]
    fn test_attributes_round_trip_all_fields() {
        let attrs = FileAttributes {
            size: Some(123456789),
            uid_gid: Some((1000, 1000)),
            permissions: Some(0o100644),
            times: Some((1700000000, 1700000001)),
        };
        let encoded = attrs.to_bytes();
        let mut offset = 0;
        let decoded = FileAttributes::read_from(&encoded, &mut offset).unwrap();
        assert_eq!(decoded, attrs);
        assert_eq!(offset, encoded.len());
    }

    #[test]
    fn test_attributes_round_trip_empty() {
        let attrs = FileAttributes::default();
        let encoded = attrs.to_bytes();
        assert_eq!(encoded.len(), 4);
        let mut offset = 0;
        let decoded = FileAttributes::read_from(&encoded, &mut offset).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn test_directory_detection() {
        let dir = FileAttributes {
            permissions: Some(0o040755),
            ..Default::default()
        };
        let file = FileAttributes {
            permissions: Some(0o100644),
            ..Default::default()
        };
        assert!(dir.is_dir());
        assert!(!file.is_dir());
        assert!(!FileAttributes::default().is_dir());
    }
}
