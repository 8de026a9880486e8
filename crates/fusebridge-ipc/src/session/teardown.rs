//! Answer-wait bookkeeping, completion delivery and teardown.

use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use super::{SESSION_TARGET, Session, lock};
use crate::error::DispatchError;
use crate::ticket::{Completion, Handler, TicketFlags, TicketKey};

impl Session {
    /// Kills the session and fails every request still awaiting a reply.
    ///
    /// Idempotent; only the first call has any effect. Blocked handshake
    /// waiters and the pump are woken, and every registered ticket completes
    /// with [`DispatchError::Disconnected`] exactly once. The outgoing queue
    /// is emptied, so notifications that were never pulled are released too.
    pub fn mark_killed(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: SESSION_TARGET, "session killed");

        {
            let _pool = lock(&self.pool.state);
            self.pool.changed.notify_all();
        }
        let unpulled: Vec<TicketKey> = {
            let mut queue = lock(&self.outgoing);
            self.outgoing_ready.notify_all();
            queue.drain(..).collect()
        };
        self.teardown();
        self.release_unpulled(&unpulled);
    }

    /// Closes the session; equivalent to [`Session::mark_killed`].
    pub fn close(&self) {
        self.mark_killed();
    }

    fn teardown(&self) {
        let drained: Vec<TicketKey> = lock(&self.answer_wait)
            .drain()
            .map(|(_, key)| key)
            .collect();
        debug!(
            target: SESSION_TARGET,
            outstanding = drained.len(),
            "failing outstanding requests"
        );
        for key in drained {
            self.complete(key, Completion::Failed(DispatchError::Disconnected));
        }
    }

    /// Releases the notifications among tickets dropped from the queue.
    ///
    /// Registered tickets were already completed by the teardown.
    fn release_unpulled(&self, unpulled: &[TicketKey]) {
        let mut released = 0_usize;
        for &key in unpulled {
            let Some(cell) = self.cell(key) else {
                continue;
            };
            let invalidated = {
                let state = cell.lock();
                state.matches(key) && state.flags.contains(TicketFlags::INVALIDATED)
            };
            if invalidated {
                self.release(key);
                released += 1;
            }
        }
        if released > 0 {
            debug!(target: SESSION_TARGET, released, "released unpulled notifications");
        }
    }

    /// Registers a ticket in the answer-wait set.
    pub(super) fn register(&self, key: TicketKey) -> Result<(), DispatchError> {
        let mut awaiting = lock(&self.answer_wait);
        // Teardown sets the flag before draining, so a registration that sees
        // a live session is always drained later.
        if self.is_killed() {
            return Err(DispatchError::Disconnected);
        }
        awaiting.insert(key.unique, key);
        Ok(())
    }

    /// Removes the ticket's entry if it still belongs to this acquisition.
    pub(super) fn withdraw(&self, key: TicketKey) -> bool {
        let mut awaiting = lock(&self.answer_wait);
        if awaiting.get(&key.unique) == Some(&key) {
            awaiting.remove(&key.unique);
            true
        } else {
            false
        }
    }

    /// Runs the ticket's handler with an outcome.
    ///
    /// The caller has already detached the ticket from the answer-wait set.
    pub(super) fn complete(&self, key: TicketKey, completion: Completion) {
        let Some(cell) = self.cell(key) else {
            warn!(target: SESSION_TARGET, unique = key.unique, "completion for a destroyed ticket");
            return;
        };
        let mut state = cell.lock();
        if !state.matches(key) {
            warn!(target: SESSION_TARGET, unique = key.unique, "completion for a recycled ticket");
            return;
        }

        match std::mem::take(&mut state.handler) {
            Handler::DefaultWait => {
                if state.flags.contains(TicketFlags::ANSWERED) {
                    drop(state);
                    debug!(
                        target: SESSION_TARGET,
                        unique = key.unique,
                        "waiter already left; releasing ticket"
                    );
                    self.release(key);
                } else {
                    state.outcome = Some(completion);
                    state.flags.insert(TicketFlags::ANSWERED);
                    drop(state);
                    cell.notify();
                }
            }
            Handler::FireAndForget => {
                drop(state);
                self.release(key);
            }
            Handler::Handshake => {
                drop(state);
                self.release(key);
                self.finish_handshake(completion);
            }
            Handler::Custom(callback) => {
                let opcode = state.opcode;
                let shape = state.shape;
                drop(state);
                self.release(key);
                let result = match (opcode, shape) {
                    (Some(opcode), Some(shape)) => self.interpret(opcode, shape, key, completion),
                    _ => Err(DispatchError::Disconnected),
                };
                callback(result);
            }
        }
    }
}
