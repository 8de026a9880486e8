//! Request opcodes of the 7.8 kernel protocol.

use strum::{Display, EnumIter};
use thiserror::Error;

/// Operation carried by a request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum Opcode {
    /// Resolves a name inside a directory.
    Lookup = 1,
    /// Drops kernel references to a node; never answered.
    Forget = 2,
    /// Reads node attributes.
    Getattr = 3,
    /// Updates node attributes.
    Setattr = 4,
    /// Reads a symbolic link target.
    Readlink = 5,
    /// Creates a symbolic link.
    Symlink = 6,
    /// Creates a special file.
    Mknod = 8,
    /// Creates a directory.
    Mkdir = 9,
    /// Removes a file.
    Unlink = 10,
    /// Removes a directory.
    Rmdir = 11,
    /// Renames an entry.
    Rename = 12,
    /// Creates a hard link.
    Link = 13,
    /// Opens a file.
    Open = 14,
    /// Reads file data.
    Read = 15,
    /// Writes file data.
    Write = 16,
    /// Reports filesystem statistics.
    Statfs = 17,
    /// Releases an open file.
    Release = 18,
    /// Flushes file data to stable storage.
    Fsync = 20,
    /// Sets an extended attribute.
    Setxattr = 21,
    /// Reads an extended attribute.
    Getxattr = 22,
    /// Lists extended attributes.
    Listxattr = 23,
    /// Removes an extended attribute.
    Removexattr = 24,
    /// Flushes an open file on close.
    Flush = 25,
    /// Negotiates the protocol version.
    Init = 26,
    /// Opens a directory.
    Opendir = 27,
    /// Reads directory entries.
    Readdir = 28,
    /// Releases an open directory.
    Releasedir = 29,
    /// Flushes directory contents.
    Fsyncdir = 30,
    /// Tests for a POSIX lock.
    Getlk = 31,
    /// Acquires or releases a POSIX lock.
    Setlk = 32,
    /// Acquires a POSIX lock, waiting if contended.
    Setlkw = 33,
    /// Checks access permissions.
    Access = 34,
    /// Creates and opens a file.
    Create = 35,
    /// Interrupts an outstanding request.
    Interrupt = 36,
    /// Maps a file block to a device block.
    Bmap = 37,
    /// Tears the filesystem down.
    Destroy = 38,
}

/// Raised when a header carries an opcode outside the protocol.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("unknown opcode {0}")]
pub struct UnknownOpcode(pub u32);

impl Opcode {
    /// Returns the numeric code written into request headers.
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Bit used to record this opcode in a 64-bit set.
    pub(crate) const fn mask(self) -> u64 {
        1_u64 << self.code()
    }
}

impl TryFrom<u32> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let opcode = match value {
            1 => Self::Lookup,
            2 => Self::Forget,
            3 => Self::Getattr,
            4 => Self::Setattr,
            5 => Self::Readlink,
            6 => Self::Symlink,
            8 => Self::Mknod,
            9 => Self::Mkdir,
            10 => Self::Unlink,
            11 => Self::Rmdir,
            12 => Self::Rename,
            13 => Self::Link,
            14 => Self::Open,
            15 => Self::Read,
            16 => Self::Write,
            17 => Self::Statfs,
            18 => Self::Release,
            20 => Self::Fsync,
            21 => Self::Setxattr,
            22 => Self::Getxattr,
            23 => Self::Listxattr,
            24 => Self::Removexattr,
            25 => Self::Flush,
            26 => Self::Init,
            27 => Self::Opendir,
            28 => Self::Readdir,
            29 => Self::Releasedir,
            30 => Self::Fsyncdir,
            31 => Self::Getlk,
            32 => Self::Setlk,
            33 => Self::Setlkw,
            34 => Self::Access,
            35 => Self::Create,
            36 => Self::Interrupt,
            37 => Self::Bmap,
            38 => Self::Destroy,
            other => return Err(UnknownOpcode(other)),
        };
        Ok(opcode)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    #[rstest]
    fn every_opcode_survives_numeric_conversion() {
        for opcode in Opcode::iter() {
            assert_eq!(Opcode::try_from(opcode.code()), Ok(opcode));
        }
    }

    #[rstest]
    #[case(0)]
    #[case(7)]
    #[case(19)]
    #[case(39)]
    fn rejects_codes_outside_the_protocol(#[case] code: u32) {
        assert_eq!(Opcode::try_from(code), Err(UnknownOpcode(code)));
    }

    #[rstest]
    fn displays_kernel_style_names() {
        assert_eq!(Opcode::Getattr.to_string(), "GETATTR");
        assert_eq!(Opcode::Releasedir.to_string(), "RELEASEDIR");
    }
}
