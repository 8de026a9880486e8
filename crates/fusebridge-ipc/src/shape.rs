//! Expected reply body sizes per opcode.
//!
//! The core does not interpret reply bodies, but it does check their size
//! against the structure the opcode answers with, so a daemon that writes a
//! truncated `attr_out` is reported as a protocol violation instead of being
//! handed to the caller.

use std::fmt;

use bytes::Buf;

use crate::opcode::Opcode;
use crate::wire::Protocol;

/// Size of `entry_out`.
pub const ENTRY_OUT_LEN: usize = 120;
/// Size of `attr_out`.
pub const ATTR_OUT_LEN: usize = 96;
/// Size of `open_out`.
pub const OPEN_OUT_LEN: usize = 16;
/// Size of `write_out`.
pub const WRITE_OUT_LEN: usize = 8;
/// Size of `statfs_out` from protocol 7.4 onwards.
pub const STATFS_OUT_LEN: usize = 80;
/// Size of `statfs_out` before protocol 7.4.
pub const COMPAT_STATFS_OUT_LEN: usize = 48;
/// Size of the full `init_out`.
pub const INIT_OUT_LEN: usize = 24;
/// Size of `init_out` before protocol 7.5.
pub const COMPAT_INIT_OUT_LEN: usize = 8;
/// Size of `entry_out` followed by `open_out`.
pub const CREATE_OUT_LEN: usize = ENTRY_OUT_LEN + OPEN_OUT_LEN;
/// Longest link target a `READLINK` reply may carry.
pub const MAX_READLINK_LEN: usize = 4096;

/// Offset of the `size` field inside `read_in`.
const READ_IN_SIZE_OFFSET: usize = 16;
/// First minor version with the long `statfs_out`.
const LONG_STATFS_MINOR: u32 = 4;

/// Constraint on the body length of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// The reply carries no body.
    Empty,
    /// The body has exactly this many bytes.
    Exact(usize),
    /// The body has at most this many bytes.
    AtMost(usize),
    /// The body has one of two sizes.
    Either(usize, usize),
    /// Any body is accepted.
    Unchecked,
    /// The daemon never answers this opcode.
    NoReply,
}

impl ReplyShape {
    /// Returns the shape a reply to `opcode` must have.
    ///
    /// `payload` is the request body; `READ` and `READDIR` take their limit
    /// from it. `protocol` selects between the old and new `statfs_out`.
    #[must_use]
    pub fn for_request(opcode: Opcode, payload: &[u8], protocol: Option<Protocol>) -> Self {
        match opcode {
            Opcode::Lookup | Opcode::Symlink | Opcode::Mknod | Opcode::Mkdir | Opcode::Link => {
                Self::Exact(ENTRY_OUT_LEN)
            }
            Opcode::Getattr | Opcode::Setattr => Self::Exact(ATTR_OUT_LEN),
            Opcode::Readlink => Self::AtMost(MAX_READLINK_LEN),
            Opcode::Unlink
            | Opcode::Rmdir
            | Opcode::Rename
            | Opcode::Release
            | Opcode::Fsync
            | Opcode::Flush
            | Opcode::Releasedir
            | Opcode::Fsyncdir
            | Opcode::Access => Self::Empty,
            Opcode::Open | Opcode::Opendir => Self::Exact(OPEN_OUT_LEN),
            Opcode::Read | Opcode::Readdir => read_limit(payload),
            Opcode::Write => Self::Exact(WRITE_OUT_LEN),
            Opcode::Statfs => statfs_shape(protocol),
            Opcode::Init => Self::Either(INIT_OUT_LEN, COMPAT_INIT_OUT_LEN),
            Opcode::Create => Self::Exact(CREATE_OUT_LEN),
            Opcode::Forget => Self::NoReply,
            Opcode::Setxattr
            | Opcode::Getxattr
            | Opcode::Listxattr
            | Opcode::Removexattr
            | Opcode::Interrupt
            | Opcode::Bmap
            | Opcode::Destroy
            | Opcode::Getlk
            | Opcode::Setlk
            | Opcode::Setlkw => Self::Unchecked,
        }
    }

    /// Returns `true` when a body of `len` bytes satisfies the shape.
    #[must_use]
    pub const fn accepts(self, len: usize) -> bool {
        match self {
            Self::Empty => len == 0,
            Self::Exact(expected) => len == expected,
            Self::AtMost(limit) => len <= limit,
            Self::Either(first, second) => len == first || len == second,
            Self::Unchecked => true,
            Self::NoReply => false,
        }
    }
}

impl fmt::Display for ReplyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("an empty body"),
            Self::Exact(len) => write!(f, "exactly {len} bytes"),
            Self::AtMost(limit) => write!(f, "at most {limit} bytes"),
            Self::Either(first, second) => write!(f, "{first} or {second} bytes"),
            Self::Unchecked => f.write_str("any body"),
            Self::NoReply => f.write_str("no reply"),
        }
    }
}

fn read_limit(payload: &[u8]) -> ReplyShape {
    let Some(mut size_field) = payload.get(READ_IN_SIZE_OFFSET..) else {
        return ReplyShape::Unchecked;
    };
    if size_field.remaining() < 4 {
        return ReplyShape::Unchecked;
    }
    usize::try_from(size_field.get_u32_le()).map_or(ReplyShape::Unchecked, ReplyShape::AtMost)
}

fn statfs_shape(protocol: Option<Protocol>) -> ReplyShape {
    match protocol {
        Some(negotiated) if negotiated.minor < LONG_STATFS_MINOR => {
            ReplyShape::Exact(COMPAT_STATFS_OUT_LEN)
        }
        _ => ReplyShape::Exact(STATFS_OUT_LEN),
    }
}
