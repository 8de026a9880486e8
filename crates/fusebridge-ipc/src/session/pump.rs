//! Daemon-facing side of the session: `pull` requests, `push` replies.

use std::sync::PoisonError;

use bytes::Bytes;
use tracing::{debug, trace};

use super::{SESSION_TARGET, Session, lock};
use crate::error::ProtocolError;
use crate::ticket::{Completion, TicketFlags, TicketKey};
use crate::wire::{REPLY_HEADER_LEN, ReplyHeader};

/// Result of pulling from the outgoing queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulled {
    /// A serialised request, header included.
    Request(Bytes),
    /// The session is killed; nothing more will be pulled.
    EndOfChannel,
}

impl Session {
    /// Blocks until a request is queued or the session is killed.
    ///
    /// Requests come out in the order they were queued. Once the session is
    /// killed this returns [`Pulled::EndOfChannel`] immediately, even when
    /// requests are still queued.
    #[must_use]
    pub fn pull(&self) -> Pulled {
        loop {
            let key = {
                let mut queue = lock(&self.outgoing);
                loop {
                    if self.is_killed() {
                        return Pulled::EndOfChannel;
                    }
                    if let Some(key) = queue.pop_front() {
                        break key;
                    }
                    queue = self
                        .outgoing_ready
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };
            if let Some(frame) = self.take_frame(key) {
                return Pulled::Request(frame);
            }
        }
    }

    /// Non-blocking variant of [`Session::pull`]; `None` when nothing is
    /// queued.
    #[must_use]
    pub fn try_pull(&self) -> Option<Pulled> {
        loop {
            let key = {
                let mut queue = lock(&self.outgoing);
                if self.is_killed() {
                    return Some(Pulled::EndOfChannel);
                }
                queue.pop_front()?
            };
            if let Some(frame) = self.take_frame(key) {
                return Some(Pulled::Request(frame));
            }
        }
    }

    /// Delivers one reply frame from the daemon.
    ///
    /// A reply whose correlation id matches no waiting request is logged and
    /// dropped; that includes replies arriving after a teardown or after the
    /// caller was interrupted.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the frame is truncated, its declared
    /// length differs from its size, it carries both an error and a body, or
    /// its error field has the wrong sign. The frame is not matched in that
    /// case.
    pub fn push(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let header = ReplyHeader::decode(frame)?;
        if usize::try_from(header.len).ok() != Some(frame.len()) {
            return Err(ProtocolError::LengthMismatch {
                declared: header.len,
                actual: frame.len(),
            });
        }
        let body = frame.get(REPLY_HEADER_LEN..).unwrap_or_default();
        if header.error != 0 && !body.is_empty() {
            return Err(ProtocolError::ErrorWithBody {
                error: header.error,
                body_len: body.len(),
            });
        }
        let errno = self.convention.normalise(header.error)?;

        let Some(key) = lock(&self.answer_wait).remove(&header.unique) else {
            debug!(
                target: SESSION_TARGET,
                unique = header.unique,
                errno,
                "dropping reply with no waiting request"
            );
            return Ok(());
        };

        trace!(
            target: SESSION_TARGET,
            unique = header.unique,
            errno,
            body_len = body.len(),
            "reply matched"
        );
        self.complete(
            key,
            Completion::Answered {
                errno,
                body: Bytes::copy_from_slice(body),
            },
        );
        Ok(())
    }

    /// Copies the request out of a dequeued ticket.
    ///
    /// Returns `None` for a stale key. Tickets that expect no reply are
    /// released here.
    fn take_frame(&self, key: TicketKey) -> Option<Bytes> {
        let Some(cell) = self.cell(key) else {
            trace!(target: SESSION_TARGET, unique = key.unique, "skipping destroyed ticket");
            return None;
        };
        let (frame, invalidated) = {
            let state = cell.lock();
            if !state.matches(key) {
                trace!(target: SESSION_TARGET, unique = key.unique, "skipping recycled ticket");
                return None;
            }
            (
                Bytes::copy_from_slice(&state.request),
                state.flags.contains(TicketFlags::INVALIDATED),
            )
        };
        if invalidated {
            self.release(key);
        }
        trace!(
            target: SESSION_TARGET,
            unique = key.unique,
            len = frame.len(),
            "request pulled"
        );
        Some(frame)
    }
}
