//! Ticket acquisition and release.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::handshake::HandshakeState;
use super::{SESSION_TARGET, Session, lock};
use crate::error::DispatchError;
use crate::interrupt::{Interrupt, Wake};
use crate::ticket::{TicketCell, TicketId, TicketKey};

/// The pool lock and the condition handshake waiters block on.
#[derive(Debug, Default)]
pub(super) struct PoolGate {
    pub(super) state: Mutex<TicketPool>,
    pub(super) changed: Condvar,
}

impl Wake for PoolGate {
    fn wake(&self) {
        let _pool = lock(&self.state);
        self.changed.notify_all();
    }
}

/// Arena of tickets plus the free pool and handshake outcome.
#[derive(Debug, Default)]
pub(super) struct TicketPool {
    slots: Vec<Option<Arc<TicketCell>>>,
    vacant: Vec<usize>,
    pub(super) free: Vec<TicketId>,
    pub(super) handshake: HandshakeState,
    pub(super) handshake_waiters: usize,
    #[cfg(test)]
    pub(super) refuse_allocation: bool,
}

impl TicketPool {
    pub(super) fn cell(&self, id: TicketId) -> Option<Arc<TicketCell>> {
        self.slots.get(id.0).cloned().flatten()
    }

    pub(super) fn allocated(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn allocate(&mut self) -> Result<TicketId, DispatchError> {
        #[cfg(test)]
        if self.refuse_allocation {
            return Err(DispatchError::ResourceExhausted);
        }
        let cell = Arc::new(TicketCell::default());
        if let Some(index) = self.vacant.pop() {
            if let Some(slot) = self.slots.get_mut(index) {
                *slot = Some(cell);
                return Ok(TicketId(index));
            }
        }
        self.slots
            .try_reserve(1)
            .map_err(|_| DispatchError::ResourceExhausted)?;
        self.slots.push(Some(cell));
        Ok(TicketId(self.slots.len() - 1))
    }

    fn destroy(&mut self, id: TicketId) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            if slot.take().is_some() {
                self.vacant.push(id.0);
            }
        }
    }
}

/// Why a ticket is being acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Purpose {
    /// The `INIT` request, which must not wait for itself.
    Handshake,
    /// Any other request; waits until the handshake has completed.
    Request,
}

/// A ticket handed to the dispatcher.
#[derive(Debug)]
pub(super) struct Acquired {
    pub(super) key: TicketKey,
    pub(super) cell: Arc<TicketCell>,
}

impl Session {
    /// Takes a refreshed ticket from the pool or allocates a new one.
    ///
    /// Requests other than the handshake block until the handshake has
    /// completed. Waiting longer than the init timeout, or having `interrupt`
    /// fire during that wait, kills the session. So does a failed allocation.
    pub(super) fn acquire(
        &self,
        purpose: Purpose,
        interrupt: Option<&Interrupt>,
    ) -> Result<Acquired, DispatchError> {
        if self.is_killed() {
            return Err(DispatchError::Disconnected);
        }

        let mut pool = lock(&self.pool.state);
        if purpose == Purpose::Request {
            pool = match self.await_handshake(pool, interrupt) {
                Ok(guard) => guard,
                Err(error) => {
                    match error {
                        DispatchError::TimedOut => warn!(
                            target: SESSION_TARGET,
                            timeout = ?self.limits.init_timeout,
                            "gave up waiting for the handshake"
                        ),
                        DispatchError::Interrupted => warn!(
                            target: SESSION_TARGET,
                            "handshake wait interrupted"
                        ),
                        _ => return Err(error),
                    }
                    self.mark_killed();
                    return Err(error);
                }
            };
        }

        let (id, reused) = match pool.free.pop() {
            Some(id) => (id, true),
            None => match pool.allocate() {
                Ok(id) => (id, false),
                Err(error) => {
                    drop(pool);
                    warn!(target: SESSION_TARGET, %error, "ticket allocation failed");
                    self.mark_killed();
                    return Err(error);
                }
            },
        };
        let cell = pool.cell(id).ok_or(DispatchError::Disconnected)?;
        drop(pool);

        let unique = self.take_unique();
        let mut state = cell.lock();
        state.unique = unique;
        let key = TicketKey {
            id,
            age: state.age,
            unique,
        };
        drop(state);

        trace!(
            target: SESSION_TARGET,
            slot = id.0,
            unique,
            age = key.age,
            reused,
            "ticket acquired"
        );
        Ok(Acquired { key, cell })
    }

    /// Waits on the pool condition until the handshake outcome is known.
    ///
    /// On error the pool guard is dropped before returning.
    fn await_handshake<'a>(
        &self,
        mut pool: MutexGuard<'a, TicketPool>,
        interrupt: Option<&Interrupt>,
    ) -> Result<MutexGuard<'a, TicketPool>, DispatchError> {
        if let Some(token) = interrupt {
            token.attach(&self.pool);
        }
        pool.handshake_waiters += 1;
        let (mut settled, outcome) = self.wait_for_handshake(pool, interrupt);
        settled.handshake_waiters -= 1;
        if let Some(token) = interrupt {
            token.detach();
        }
        outcome.map(|()| settled)
    }

    fn wait_for_handshake<'a>(
        &self,
        mut pool: MutexGuard<'a, TicketPool>,
        interrupt: Option<&Interrupt>,
    ) -> (MutexGuard<'a, TicketPool>, Result<(), DispatchError>) {
        let deadline = Instant::now() + self.limits.init_timeout;
        let outcome = loop {
            if self.is_killed() {
                break Err(DispatchError::Disconnected);
            }
            match pool.handshake {
                HandshakeState::Negotiated(_) => break Ok(()),
                HandshakeState::Failed(_) => break Err(DispatchError::Disconnected),
                HandshakeState::NotStarted | HandshakeState::Pending => {}
            }
            if interrupt.is_some_and(Interrupt::is_interrupted) {
                break Err(DispatchError::Interrupted);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break Err(DispatchError::TimedOut);
            };
            let (guard, _) = self
                .pool
                .changed
                .wait_timeout(pool, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            pool = guard;
        };
        (pool, outcome)
    }

    /// Returns a ticket that is no longer queued or awaited.
    ///
    /// The ticket is refreshed and pooled while the pool is under its cap and
    /// the session is alive; otherwise it is destroyed.
    ///
    /// # Panics
    ///
    /// Panics when the ticket is still registered in the answer-wait set.
    pub(super) fn release(&self, key: TicketKey) {
        assert!(
            !self.is_awaiting(key),
            "ticket {} released while still awaiting a reply",
            key.unique
        );
        let Some(cell) = self.cell(key) else {
            debug!(target: SESSION_TARGET, slot = key.id.0, "release of a destroyed ticket");
            return;
        };
        {
            let mut state = cell.lock();
            if !state.matches(key) {
                debug!(
                    target: SESSION_TARGET,
                    unique = key.unique,
                    "release of an already recycled ticket ignored"
                );
                return;
            }
            state.refresh();
        }

        let mut pool = lock(&self.pool.state);
        if !self.is_killed() && pool.free.len() < self.limits.max_free_tickets {
            pool.free.push(key.id);
            trace!(target: SESSION_TARGET, slot = key.id.0, "ticket pooled");
        } else {
            pool.destroy(key.id);
            trace!(target: SESSION_TARGET, slot = key.id.0, "ticket destroyed");
        }
    }

    fn is_awaiting(&self, key: TicketKey) -> bool {
        lock(&self.answer_wait)
            .get(&key.unique)
            .is_some_and(|registered| *registered == key)
    }
}
