//! Helpers that play the daemon side of a session in tests.

mod daemon;
mod frames;

pub(crate) use daemon::{Answer, StubDaemon};
pub(crate) use frames::{
    PulledRequest, answer, context, negotiated_session, next_request, test_protocol,
};
