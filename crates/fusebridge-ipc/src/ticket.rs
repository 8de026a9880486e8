//! Per-request state shared by a caller and the pump.
//!
//! A ticket lives in the session's arena for its whole allocated life. Queues
//! and the answer-wait set refer to it by [`TicketKey`], which pairs the arena
//! slot with the age and correlation id the ticket had when it was queued, so
//! a key that outlives a refresh is recognised as stale.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};

use crate::error::DispatchError;
use crate::interrupt::Wake;
use crate::opcode::Opcode;
use crate::shape::ReplyShape;

/// Index of a ticket in the session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TicketId(pub(crate) usize);

/// Reference to one acquisition of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TicketKey {
    pub(crate) id: TicketId,
    pub(crate) age: u64,
    pub(crate) unique: u64,
}

bitflags! {
    /// Lifecycle markers of a ticket.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct TicketFlags: u8 {
        /// The ticket has been queued since its last refresh.
        const DIRTY = 1;
        /// An outcome has been recorded, or the waiter has given up.
        const ANSWERED = 1 << 1;
        /// No reply is expected; the pump releases it once written.
        const INVALIDATED = 1 << 2;
    }
}

/// Successful answer from the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    opcode: Opcode,
    unique: u64,
    body: Bytes,
}

impl Reply {
    pub(crate) const fn new(opcode: Opcode, unique: u64, body: Bytes) -> Self {
        Self {
            opcode,
            unique,
            body,
        }
    }

    /// Opcode of the request this reply answers.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Correlation id the reply was matched on.
    #[must_use]
    pub const fn unique(&self) -> u64 {
        self.unique
    }

    /// Reply body without its header.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the reply, returning its body.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// Callback run when an asynchronous request completes.
pub(crate) type CompletionFn = Box<dyn FnOnce(Result<Reply, DispatchError>) + Send + 'static>;

/// What happens when a ticket's outcome arrives.
#[derive(Default)]
pub(crate) enum Handler {
    /// A caller is blocked in `dispatch_sync` and is woken.
    #[default]
    DefaultWait,
    /// The reply is consumed and discarded.
    FireAndForget,
    /// The reply completes the protocol handshake.
    Handshake,
    /// The reply is handed to a caller-supplied callback.
    Custom(CompletionFn),
}

impl Handler {
    const fn kind(&self) -> &'static str {
        match self {
            Self::DefaultWait => "default_wait",
            Self::FireAndForget => "fire_and_forget",
            Self::Handshake => "handshake",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Raw outcome recorded on a ticket before it is interpreted.
#[derive(Debug, Clone)]
pub(crate) enum Completion {
    /// The daemon answered; `errno` is already normalised.
    Answered { errno: i32, body: Bytes },
    /// The core gave up on the request.
    Failed(DispatchError),
}

/// Mutable state of a ticket.
#[derive(Debug, Default)]
pub(crate) struct TicketState {
    pub(crate) age: u64,
    pub(crate) unique: u64,
    pub(crate) flags: TicketFlags,
    pub(crate) opcode: Option<Opcode>,
    pub(crate) shape: Option<ReplyShape>,
    pub(crate) request: BytesMut,
    pub(crate) outcome: Option<Completion>,
    pub(crate) handler: Handler,
}

impl TicketState {
    /// Returns the ticket to its pristine state and bumps its age.
    pub(crate) fn refresh(&mut self) {
        self.age = self.age.wrapping_add(1);
        self.unique = 0;
        self.flags = TicketFlags::empty();
        self.opcode = None;
        self.shape = None;
        self.request.clear();
        self.outcome = None;
        self.handler = Handler::DefaultWait;
    }

    /// Returns `true` when `key` names the current acquisition.
    pub(crate) const fn matches(&self, key: TicketKey) -> bool {
        self.age == key.age && self.unique == key.unique
    }
}

/// A ticket slot: its state and the condition its waiter blocks on.
#[derive(Debug, Default)]
pub(crate) struct TicketCell {
    state: Mutex<TicketState>,
    answered: Condvar,
}

impl TicketCell {
    pub(crate) fn lock(&self) -> MutexGuard<'_, TicketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, TicketState>,
    ) -> MutexGuard<'a, TicketState> {
        self.answered
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for at most `timeout`; the flag is `true` when it elapsed.
    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, TicketState>,
        timeout: std::time::Duration,
    ) -> (MutexGuard<'a, TicketState>, bool) {
        let (guard, result) = self
            .answered
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        (guard, result.timed_out())
    }

    pub(crate) fn notify(&self) {
        self.answered.notify_all();
    }
}

impl Wake for TicketCell {
    fn wake(&self) {
        // Taking the ticket lock orders the flag store before the waiter's
        // next check.
        drop(self.lock());
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn refresh_clears_everything_but_bumps_age() {
        let mut state = TicketState {
            age: 3,
            unique: 17,
            flags: TicketFlags::DIRTY | TicketFlags::ANSWERED,
            opcode: Some(Opcode::Read),
            shape: Some(ReplyShape::AtMost(10)),
            request: BytesMut::from(&b"payload"[..]),
            outcome: Some(Completion::Failed(DispatchError::Disconnected)),
            handler: Handler::FireAndForget,
        };

        state.refresh();

        assert_eq!(state.age, 4);
        assert_eq!(state.unique, 0);
        assert!(state.flags.is_empty());
        assert!(state.request.is_empty());
        assert!(state.outcome.is_none());
        assert!(matches!(state.handler, Handler::DefaultWait));
    }

    #[rstest]
    fn keys_from_earlier_acquisitions_do_not_match() {
        let state = TicketState {
            age: 2,
            unique: 40,
            ..TicketState::default()
        };
        let current = TicketKey {
            id: TicketId(0),
            age: 2,
            unique: 40,
        };

        assert!(state.matches(current));
        assert!(!state.matches(TicketKey { age: 1, ..current }));
        assert!(!state.matches(TicketKey {
            unique: 39,
            ..current
        }));
    }
}
