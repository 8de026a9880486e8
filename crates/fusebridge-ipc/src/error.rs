//! Errors surfaced by the bridge core.
//!
//! [`DispatchError`] is what a caller of the dispatcher sees. It is `Clone`
//! because the same outcome may be recorded on the session (a failed
//! handshake) and handed to several waiters. [`ProtocolError`] describes a
//! malformed frame and is returned directly by the daemon-facing `push`.

use nix::errno::Errno;
use thiserror::Error;

use crate::opcode::Opcode;
use crate::shape::ReplyShape;

/// Violations of the wire contract detected while decoding a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is shorter than the header it must start with.
    #[error("frame of {actual} bytes is shorter than the {required}-byte header")]
    Truncated {
        /// Minimum size required.
        required: usize,
        /// Size actually received.
        actual: usize,
    },

    /// The length prefix disagrees with the number of bytes received.
    #[error("header declares {declared} bytes but the frame holds {actual}")]
    LengthMismatch {
        /// Length written in the header.
        declared: u32,
        /// Length of the frame as received.
        actual: usize,
    },

    /// A reply carries both an error and a body.
    #[error("reply reports error {error} but carries a {body_len}-byte body")]
    ErrorWithBody {
        /// Raw error field as sent.
        error: i32,
        /// Length of the unexpected body.
        body_len: usize,
    },

    /// The error field has the wrong sign for the active convention.
    #[error("reply error field {0} has the wrong sign")]
    InvalidErrno(i32),

    /// A frame would not fit in the 32-bit length field.
    #[error("frame of {0} bytes exceeds the 32-bit length field")]
    Oversized(usize),

    /// The reply body does not have the size its opcode requires.
    #[error("{opcode} reply of {actual} bytes does not match {expected}")]
    ShapeMismatch {
        /// Opcode of the answered request.
        opcode: Opcode,
        /// Shape the opcode requires.
        expected: ReplyShape,
        /// Body length received.
        actual: usize,
    },

    /// The handshake reply names a protocol older than 7.
    #[error("daemon speaks protocol {major}.{minor}, which is too old")]
    UnsupportedProtocol {
        /// Major version offered by the daemon.
        major: u32,
        /// Minor version offered by the daemon.
        minor: u32,
    },
}

/// Outcome of a dispatch that did not produce a successful reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The daemon broke the wire contract.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolError),

    /// The session was torn down before an answer arrived.
    #[error("daemon session is disconnected")]
    Disconnected,

    /// The caller's wait was cancelled.
    #[error("call was interrupted")]
    Interrupted,

    /// The per-call deadline elapsed; the session has been killed.
    #[error("daemon did not answer within the call timeout")]
    TimedOut,

    /// The daemon does not implement the opcode.
    #[error("daemon does not implement {opcode}")]
    Unsupported {
        /// Opcode that was refused.
        opcode: Opcode,
    },

    /// The daemon answered with an errno.
    #[error("daemon returned {}", Errno::from_raw(*errno))]
    Daemon {
        /// Positive errno value.
        errno: i32,
    },

    /// Memory for a new ticket could not be reserved.
    #[error("no memory available for a new ticket")]
    ResourceExhausted,
}

impl DispatchError {
    /// Maps the error onto the errno a kernel-facing caller would report.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::ProtocolViolation(_) => Errno::EIO,
            Self::Disconnected => Errno::ENOTCONN,
            Self::Interrupted => Errno::EINTR,
            Self::TimedOut => Errno::ETIMEDOUT,
            Self::Unsupported { .. } => Errno::ENOSYS,
            Self::Daemon { errno } => Errno::from_raw(*errno),
            Self::ResourceExhausted => Errno::ENOMEM,
        }
    }

    /// Returns `true` when the error means the session is gone.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::TimedOut)
    }
}
