//! Little-endian codec for the 7.8 kernel protocol headers.
//!
//! Requests start with a 40-byte header and replies with a 16-byte header.
//! Both begin with the total frame length, which is what the stream pump uses
//! to delimit frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::opcode::{Opcode, UnknownOpcode};
use crate::shape::{COMPAT_INIT_OUT_LEN, INIT_OUT_LEN, ReplyShape};

/// Size of the request header.
pub const REQUEST_HEADER_LEN: usize = 40;
/// Size of the reply header.
pub const REPLY_HEADER_LEN: usize = 16;
/// Size of `init_in`.
pub const INIT_IN_LEN: usize = 16;
/// Protocol major version spoken by the bridge.
pub const KERNEL_VERSION: u32 = 7;
/// Protocol minor version spoken by the bridge.
pub const KERNEL_MINOR_VERSION: u32 = 8;
/// Read-ahead window offered during the handshake.
pub const DEFAULT_MAX_READAHEAD: u32 = 128 * 1024;
/// `max_write` assumed when the daemon predates protocol 7.5.
pub const DEFAULT_MAX_WRITE: u32 = 4096;

/// First minor version whose `init_out` carries `max_write`.
const MAX_WRITE_MINOR: u32 = 5;

/// Protocol parameters agreed during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    /// Major version reported by the daemon.
    pub major: u32,
    /// Minor version reported by the daemon.
    pub minor: u32,
    /// Read-ahead window the daemon accepted.
    pub max_readahead: u32,
    /// Largest write payload the daemon accepts.
    pub max_write: u32,
}

/// How the daemon encodes errors in the reply header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorConvention {
    /// Errors are sent as negated errno values.
    #[default]
    NegativeErrno,
    /// Errors are sent as positive errno values.
    Positive,
}

impl ErrorConvention {
    /// Converts the raw error field into a non-negative errno.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidErrno`] when the field has the wrong
    /// sign for this convention.
    pub fn normalise(self, raw: i32) -> Result<i32, ProtocolError> {
        let errno = match self {
            Self::NegativeErrno => raw.checked_neg(),
            Self::Positive => Some(raw),
        };
        errno
            .filter(|value| *value >= 0)
            .ok_or(ProtocolError::InvalidErrno(raw))
    }

    /// Converts a non-negative errno into the field a daemon would send.
    #[must_use]
    pub const fn encode(self, errno: i32) -> i32 {
        match self {
            Self::NegativeErrno => -errno,
            Self::Positive => errno,
        }
    }
}

/// Identity of the caller issuing a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
    /// Process id.
    pub pid: u32,
}

/// Decoded request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Total frame length, header included.
    pub len: u32,
    /// Raw opcode.
    pub opcode: u32,
    /// Correlation id.
    pub unique: u64,
    /// Target node id.
    pub nodeid: u64,
    /// Caller identity.
    pub credentials: Credentials,
}

impl RequestHeader {
    /// Parses the header at the start of `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] when `frame` is shorter than a
    /// request header.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = frame;
        if cursor.remaining() < REQUEST_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                required: REQUEST_HEADER_LEN,
                actual: frame.len(),
            });
        }
        let len = cursor.get_u32_le();
        let opcode = cursor.get_u32_le();
        let unique = cursor.get_u64_le();
        let nodeid = cursor.get_u64_le();
        let credentials = Credentials {
            uid: cursor.get_u32_le(),
            gid: cursor.get_u32_le(),
            pid: cursor.get_u32_le(),
        };
        Ok(Self {
            len,
            opcode,
            unique,
            nodeid,
            credentials,
        })
    }

    /// Returns the opcode as a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownOpcode`] for codes outside the protocol.
    pub fn opcode(&self) -> Result<Opcode, UnknownOpcode> {
        Opcode::try_from(self.opcode)
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len);
        buf.put_u32_le(self.opcode);
        buf.put_u64_le(self.unique);
        buf.put_u64_le(self.nodeid);
        buf.put_u32_le(self.credentials.uid);
        buf.put_u32_le(self.credentials.gid);
        buf.put_u32_le(self.credentials.pid);
        buf.put_u32_le(0);
    }
}

/// Decoded reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    /// Total frame length, header included.
    pub len: u32,
    /// Raw error field.
    pub error: i32,
    /// Correlation id of the answered request.
    pub unique: u64,
}

impl ReplyHeader {
    /// Parses the header at the start of `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] when `frame` is shorter than a
    /// reply header.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = frame;
        if cursor.remaining() < REPLY_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                required: REPLY_HEADER_LEN,
                actual: frame.len(),
            });
        }
        Ok(Self {
            len: cursor.get_u32_le(),
            error: cursor.get_i32_le(),
            unique: cursor.get_u64_le(),
        })
    }
}

/// Serialises a request header followed by `payload`.
///
/// # Errors
///
/// Returns [`ProtocolError::Oversized`] when the frame length does not fit
/// the header's length field.
pub fn encode_request(
    opcode: Opcode,
    unique: u64,
    nodeid: u64,
    credentials: Credentials,
    payload: &[u8],
) -> Result<BytesMut, ProtocolError> {
    let total = REQUEST_HEADER_LEN + payload.len();
    let len = u32::try_from(total).map_err(|_| ProtocolError::Oversized(total))?;
    let mut buf = BytesMut::with_capacity(total);
    RequestHeader {
        len,
        opcode: opcode.code(),
        unique,
        nodeid,
        credentials,
    }
    .put(&mut buf);
    buf.put_slice(payload);
    Ok(buf)
}

/// Serialises a reply frame the way a daemon would.
///
/// `errno` is non-negative; `convention` decides how it is written.
///
/// # Errors
///
/// Returns [`ProtocolError::Oversized`] when the frame length does not fit
/// the header's length field.
pub fn encode_reply(
    unique: u64,
    errno: i32,
    body: &[u8],
    convention: ErrorConvention,
) -> Result<Bytes, ProtocolError> {
    let total = REPLY_HEADER_LEN + body.len();
    let len = u32::try_from(total).map_err(|_| ProtocolError::Oversized(total))?;
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32_le(len);
    buf.put_i32_le(convention.encode(errno));
    buf.put_u64_le(unique);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Body of the `INIT` request sent by the bridge.
#[must_use]
pub fn init_request(max_readahead: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(INIT_IN_LEN);
    buf.put_u32_le(KERNEL_VERSION);
    buf.put_u32_le(KERNEL_MINOR_VERSION);
    buf.put_u32_le(max_readahead);
    buf.put_u32_le(0);
    buf.freeze()
}

/// Body of an `INIT` reply as a daemon speaking `protocol` would send it.
#[must_use]
pub fn init_reply(protocol: Protocol) -> Bytes {
    let mut buf = BytesMut::with_capacity(INIT_OUT_LEN);
    buf.put_u32_le(protocol.major);
    buf.put_u32_le(protocol.minor);
    if protocol.minor >= MAX_WRITE_MINOR {
        buf.put_u32_le(protocol.max_readahead);
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        buf.put_u32_le(protocol.max_write);
    }
    buf.freeze()
}

/// Interprets the body of an `INIT` reply.
///
/// # Errors
///
/// Returns [`ProtocolError::UnsupportedProtocol`] for a major version below
/// 7 and [`ProtocolError::ShapeMismatch`] when the body size does not match
/// the minor version.
pub fn parse_init_reply(body: &[u8]) -> Result<Protocol, ProtocolError> {
    let mismatch = |expected| ProtocolError::ShapeMismatch {
        opcode: Opcode::Init,
        expected,
        actual: body.len(),
    };
    let mut cursor = body;
    if cursor.remaining() < COMPAT_INIT_OUT_LEN {
        return Err(mismatch(ReplyShape::Either(INIT_OUT_LEN, COMPAT_INIT_OUT_LEN)));
    }
    let major = cursor.get_u32_le();
    let minor = cursor.get_u32_le();
    if major < KERNEL_VERSION {
        return Err(ProtocolError::UnsupportedProtocol { major, minor });
    }
    if minor < MAX_WRITE_MINOR {
        return Ok(Protocol {
            major,
            minor,
            max_readahead: 0,
            max_write: DEFAULT_MAX_WRITE,
        });
    }
    if body.len() != INIT_OUT_LEN {
        return Err(mismatch(ReplyShape::Exact(INIT_OUT_LEN)));
    }
    let max_readahead = cursor.get_u32_le();
    cursor.advance(8);
    let max_write = cursor.get_u32_le();
    Ok(Protocol {
        major,
        minor,
        max_readahead,
        max_write,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn negotiated(minor: u32) -> Protocol {
        Protocol {
            major: KERNEL_VERSION,
            minor,
            max_readahead: 65_536,
            max_write: 131_072,
        }
    }

    #[rstest]
    fn request_header_is_forty_little_endian_bytes() {
        let credentials = Credentials {
            uid: 501,
            gid: 20,
            pid: 4242,
        };
        let frame = encode_request(Opcode::Getattr, 9, 1, credentials, b"xy")
            .expect("request fits");

        assert_eq!(frame.len(), REQUEST_HEADER_LEN + 2);
        assert_eq!(frame.get(..4), Some(&[42, 0, 0, 0][..]));
        assert_eq!(frame.get(4..8), Some(&[3, 0, 0, 0][..]));
        assert_eq!(frame.get(36..40), Some(&[0, 0, 0, 0][..]));

        let header = RequestHeader::decode(&frame).expect("header decodes");
        assert_eq!(header.unique, 9);
        assert_eq!(header.nodeid, 1);
        assert_eq!(header.credentials, credentials);
        assert_eq!(header.opcode(), Ok(Opcode::Getattr));
    }

    #[rstest]
    fn reply_header_carries_the_sign_convention() {
        let frame = encode_reply(5, 2, &[], ErrorConvention::NegativeErrno).expect("fits");
        let header = ReplyHeader::decode(&frame).expect("header decodes");

        assert_eq!(header.len, 16);
        assert_eq!(header.error, -2);
        assert_eq!(header.unique, 5);
    }

    #[rstest]
    #[case(ErrorConvention::NegativeErrno, -2, Ok(2))]
    #[case(ErrorConvention::NegativeErrno, 0, Ok(0))]
    #[case(ErrorConvention::NegativeErrno, 2, Err(ProtocolError::InvalidErrno(2)))]
    #[case(ErrorConvention::NegativeErrno, i32::MIN, Err(ProtocolError::InvalidErrno(i32::MIN)))]
    #[case(ErrorConvention::Positive, 13, Ok(13))]
    #[case(ErrorConvention::Positive, -13, Err(ProtocolError::InvalidErrno(-13)))]
    fn normalises_error_fields(
        #[case] convention: ErrorConvention,
        #[case] raw: i32,
        #[case] expected: Result<i32, ProtocolError>,
    ) {
        assert_eq!(convention.normalise(raw), expected);
    }

    #[rstest]
    fn truncated_headers_are_rejected() {
        assert_eq!(
            ReplyHeader::decode(&[0; 10]),
            Err(ProtocolError::Truncated {
                required: REPLY_HEADER_LEN,
                actual: 10,
            })
        );
        assert!(RequestHeader::decode(&[0; 39]).is_err());
    }

    #[rstest]
    fn init_request_offers_seven_eight() {
        let body = init_request(DEFAULT_MAX_READAHEAD);
        assert_eq!(body.len(), INIT_IN_LEN);
        assert_eq!(body.get(..8), Some(&[7, 0, 0, 0, 8, 0, 0, 0][..]));
    }

    #[rstest]
    fn modern_init_replies_carry_max_write() {
        let protocol = parse_init_reply(&init_reply(negotiated(8))).expect("valid reply");
        assert_eq!(protocol, negotiated(8));
    }

    #[rstest]
    fn old_init_replies_default_max_write() {
        let protocol = parse_init_reply(&init_reply(negotiated(3))).expect("valid reply");
        assert_eq!(protocol.max_write, DEFAULT_MAX_WRITE);
        assert_eq!(protocol.minor, 3);
    }

    #[rstest]
    fn short_modern_init_replies_are_rejected() {
        let mut body = init_reply(negotiated(8)).to_vec();
        body.truncate(COMPAT_INIT_OUT_LEN);

        assert!(matches!(
            parse_init_reply(&body),
            Err(ProtocolError::ShapeMismatch { actual: 8, .. })
        ));
    }

    #[rstest]
    fn ancient_majors_are_refused() {
        let body = init_reply(Protocol {
            major: 6,
            ..negotiated(8)
        });
        assert_eq!(
            parse_init_reply(&body),
            Err(ProtocolError::UnsupportedProtocol { major: 6, minor: 8 })
        );
    }
}
