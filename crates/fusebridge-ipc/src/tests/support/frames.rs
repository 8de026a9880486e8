//! Frame-level helpers for driving a session by hand.

use std::sync::Arc;

use bytes::Bytes;
use fusebridge_config::SessionLimits;

use crate::session::{CallContext, Pulled, Session};
use crate::wire::{Credentials, Protocol, RequestHeader, encode_reply, init_reply};
use crate::{Opcode, REQUEST_HEADER_LEN};

/// Protocol the stub daemon agrees to.
pub(crate) const fn test_protocol() -> Protocol {
    Protocol {
        major: 7,
        minor: 8,
        max_readahead: 128 * 1024,
        max_write: 64 * 1024,
    }
}

/// Call context with a fixed identity.
pub(crate) const fn context() -> CallContext {
    CallContext::new(Credentials {
        uid: 501,
        gid: 20,
        pid: 4242,
    })
}

/// A request as the daemon sees it.
#[derive(Debug)]
pub(crate) struct PulledRequest {
    pub(crate) header: RequestHeader,
    pub(crate) body: Bytes,
}

impl PulledRequest {
    pub(crate) fn from_frame(frame: &Bytes) -> Self {
        let header = RequestHeader::decode(frame).expect("request header should decode");
        Self {
            header,
            body: frame.slice(REQUEST_HEADER_LEN..),
        }
    }

    pub(crate) fn opcode(&self) -> Opcode {
        self.header.opcode().expect("request opcode should be known")
    }

    pub(crate) const fn unique(&self) -> u64 {
        self.header.unique
    }
}

/// Pulls the next queued request without blocking.
pub(crate) fn next_request(session: &Session) -> PulledRequest {
    match session.try_pull() {
        Some(Pulled::Request(frame)) => PulledRequest::from_frame(&frame),
        other => panic!("expected a queued request, got {other:?}"),
    }
}

/// Pushes a reply for `unique` using the session's error convention.
pub(crate) fn answer(session: &Session, unique: u64, errno: i32, body: &[u8]) {
    let frame = encode_reply(unique, errno, body, session.convention()).expect("reply encodes");
    session.push(&frame).expect("reply should be accepted");
}

/// Opens a session and completes the handshake by hand.
pub(crate) fn negotiated_session(limits: SessionLimits) -> Arc<Session> {
    let session = Session::open(limits);
    session
        .start_handshake(&context())
        .expect("handshake should start");
    let init = next_request(&session);
    assert_eq!(init.opcode(), Opcode::Init);
    answer(&session, init.unique(), 0, &init_reply(test_protocol()));
    assert_eq!(session.protocol(), Some(test_protocol()));
    session
}
