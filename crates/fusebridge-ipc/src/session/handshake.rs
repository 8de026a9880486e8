//! Protocol handshake (`INIT`).
//!
//! The handshake is the first request a session sends. Every other request
//! waits in `acquire` until the handshake has either negotiated a protocol or
//! failed, which keeps `INIT` at the head of the outgoing queue.

use std::sync::PoisonError;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::pool::Purpose;
use super::{CallContext, SESSION_TARGET, Session, lock};
use crate::error::DispatchError;
use crate::opcode::Opcode;
use crate::ticket::{Completion, Handler};
use crate::wire::{DEFAULT_MAX_READAHEAD, Protocol, init_request, parse_init_reply};

/// Progress of the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) enum HandshakeState {
    /// `INIT` has not been sent.
    #[default]
    NotStarted,
    /// `INIT` is queued or in flight.
    Pending,
    /// The daemon accepted the protocol.
    Negotiated(Protocol),
    /// The handshake failed and the session is killed.
    Failed(DispatchError),
}

impl HandshakeState {
    pub(super) const fn is_complete(&self) -> bool {
        matches!(self, Self::Negotiated(_) | Self::Failed(_))
    }
}

impl Session {
    /// Sends `INIT` and waits for the outcome within the init timeout.
    ///
    /// Calling it again after the handshake started only waits for the
    /// existing outcome.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure: [`DispatchError::Daemon`] for an error
    /// reply, [`DispatchError::ProtocolViolation`] for an unusable `init_out`,
    /// [`DispatchError::Disconnected`] when the session dies first and
    /// [`DispatchError::TimedOut`] when the init timeout elapses.
    pub fn handshake(&self, context: &CallContext) -> Result<Protocol, DispatchError> {
        self.start_handshake(context)?;
        self.wait_negotiated(self.limits.init_timeout)
    }

    /// Queues `INIT` without waiting for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Disconnected`] for a killed session.
    pub fn start_handshake(&self, context: &CallContext) -> Result<(), DispatchError> {
        {
            let mut pool = lock(&self.pool.state);
            if pool.handshake != HandshakeState::NotStarted {
                return Ok(());
            }
            pool.handshake = HandshakeState::Pending;
        }

        let body = init_request(DEFAULT_MAX_READAHEAD);
        let submitted = self
            .make(Opcode::Init, 0, &body, context, Purpose::Handshake)
            .and_then(|acquired| self.submit(&acquired, Handler::Handshake));
        if let Err(error) = submitted {
            self.fail_handshake(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Blocks until the handshake outcome is known.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure, or [`DispatchError::TimedOut`] after
    /// killing the session when `timeout` elapses first.
    pub fn wait_negotiated(&self, timeout: Duration) -> Result<Protocol, DispatchError> {
        let deadline = Instant::now() + timeout;
        let mut pool = lock(&self.pool.state);
        loop {
            match &pool.handshake {
                HandshakeState::Negotiated(protocol) => return Ok(*protocol),
                HandshakeState::Failed(error) => return Err(error.clone()),
                HandshakeState::NotStarted | HandshakeState::Pending => {}
            }
            if self.is_killed() {
                return Err(DispatchError::Disconnected);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                drop(pool);
                warn!(target: SESSION_TARGET, ?timeout, "handshake timed out");
                self.fail_handshake(DispatchError::TimedOut);
                return Err(DispatchError::TimedOut);
            };
            pool = self
                .pool
                .changed
                .wait_timeout(pool, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Records the daemon's answer to `INIT`.
    pub(super) fn finish_handshake(&self, completion: Completion) {
        let outcome = match completion {
            Completion::Failed(error) => Err(error),
            Completion::Answered { errno: 0, body } => {
                parse_init_reply(&body).map_err(DispatchError::from)
            }
            Completion::Answered { errno, .. } => Err(DispatchError::Daemon { errno }),
        };

        match outcome {
            Ok(protocol) => {
                info!(
                    target: SESSION_TARGET,
                    major = protocol.major,
                    minor = protocol.minor,
                    max_write = protocol.max_write,
                    "protocol negotiated"
                );
                let mut pool = lock(&self.pool.state);
                pool.handshake = HandshakeState::Negotiated(protocol);
                self.pool.changed.notify_all();
            }
            Err(error) => {
                warn!(target: SESSION_TARGET, %error, "handshake failed");
                self.fail_handshake(error);
            }
        }
    }

    fn fail_handshake(&self, error: DispatchError) {
        {
            let mut pool = lock(&self.pool.state);
            if !pool.handshake.is_complete() {
                pool.handshake = HandshakeState::Failed(error);
            }
            self.pool.changed.notify_all();
        }
        self.mark_killed();
    }
}
