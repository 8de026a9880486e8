//! A daemon session: ticket arena, outgoing queue and answer-wait set.
//!
//! Callers use [`Session::dispatch_sync`], [`Session::dispatch_async`] and
//! [`Session::notify`]; the daemon side is driven through [`Session::pull`]
//! and [`Session::push`]. The session keeps three locks (outgoing queue,
//! answer-wait set, pool and handshake) and never holds two of them at once.
//! Each ticket additionally carries its own lock and condition variable.

mod dispatch;
mod handshake;
mod pool;
mod pump;
mod teardown;


use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use fusebridge_config::SessionLimits;
use tracing::debug;

use crate::ticket::{TicketCell, TicketKey};
use crate::wire::{ErrorConvention, Protocol};

pub use dispatch::CallContext;
pub use pump::Pulled;

use handshake::HandshakeState;
use pool::PoolGate;

/// Log target for session operations.
pub(crate) const SESSION_TARGET: &str = "fusebridge_ipc::session";

/// Correlation id handed to the first acquisition.
const FIRST_UNIQUE: u64 = 1;

/// Point-in-time counters describing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Tickets currently allocated, pooled or in use.
    pub allocated: usize,
    /// Tickets sitting in the free pool.
    pub pooled: usize,
    /// Requests waiting to be pulled.
    pub queued: usize,
    /// Requests waiting for a reply.
    pub awaiting: usize,
    /// Negotiated protocol, once the handshake succeeded.
    pub protocol: Option<Protocol>,
    /// `true` once the handshake has either succeeded or failed.
    pub handshake_complete: bool,
    /// Callers blocked until the handshake completes.
    pub handshake_waiters: usize,
    /// `true` once the session has been torn down.
    pub killed: bool,
}

/// Transport and correlation state shared by callers and the pump.
#[derive(Debug)]
pub struct Session {
    limits: SessionLimits,
    convention: ErrorConvention,
    killed: AtomicBool,
    next_unique: AtomicU64,
    not_implemented: AtomicU64,
    outgoing: Mutex<VecDeque<TicketKey>>,
    outgoing_ready: Condvar,
    answer_wait: Mutex<HashMap<u64, TicketKey>>,
    pool: Arc<PoolGate>,
}

impl Session {
    /// Opens a session whose daemon reports errors as negated errno values.
    #[must_use]
    pub fn open(limits: SessionLimits) -> Arc<Self> {
        Self::open_with_convention(limits, ErrorConvention::default())
    }

    /// Opens a session with an explicit error sign convention.
    #[must_use]
    pub fn open_with_convention(limits: SessionLimits, convention: ErrorConvention) -> Arc<Self> {
        debug!(
            target: SESSION_TARGET,
            max_free_tickets = limits.max_free_tickets,
            daemon_timeout = ?limits.daemon_timeout,
            init_timeout = ?limits.init_timeout,
            ?convention,
            "opening session"
        );
        Arc::new(Self {
            limits,
            convention,
            killed: AtomicBool::new(false),
            next_unique: AtomicU64::new(FIRST_UNIQUE),
            not_implemented: AtomicU64::new(0),
            outgoing: Mutex::new(VecDeque::new()),
            outgoing_ready: Condvar::new(),
            answer_wait: Mutex::new(HashMap::new()),
            pool: Arc::new(PoolGate::default()),
        })
    }

    /// Limits the session was opened with.
    #[must_use]
    pub const fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Error sign convention applied to replies.
    #[must_use]
    pub const fn convention(&self) -> ErrorConvention {
        self.convention
    }

    /// Returns `true` once the session has been torn down.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Protocol agreed during the handshake, if it succeeded.
    #[must_use]
    pub fn protocol(&self) -> Option<Protocol> {
        match lock(&self.pool.state).handshake {
            HandshakeState::Negotiated(protocol) => Some(protocol),
            _ => None,
        }
    }

    /// Collects the session counters.
    ///
    /// Each count is read under its own lock, so the snapshot is not atomic
    /// across counters while requests are in flight.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let (allocated, pooled, protocol, handshake_complete, handshake_waiters) = {
            let pool = lock(&self.pool.state);
            let protocol = match pool.handshake {
                HandshakeState::Negotiated(protocol) => Some(protocol),
                _ => None,
            };
            (
                pool.allocated(),
                pool.free.len(),
                protocol,
                pool.handshake.is_complete(),
                pool.handshake_waiters,
            )
        };
        let queued = lock(&self.outgoing).len();
        let awaiting = lock(&self.answer_wait).len();
        SessionStats {
            allocated,
            pooled,
            queued,
            awaiting,
            protocol,
            handshake_complete,
            handshake_waiters,
            killed: self.is_killed(),
        }
    }

    fn cell(&self, key: TicketKey) -> Option<Arc<TicketCell>> {
        lock(&self.pool.state).cell(key.id)
    }

    fn take_unique(&self) -> u64 {
        self.next_unique.fetch_add(1, Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
