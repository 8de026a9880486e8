//! Core-facing projection of the configuration.
//!
//! The IPC core does not depend on how configuration is layered; it only
//! needs the pool cap and the two timeouts, so sessions are built from a
//! [`SessionLimits`] value rather than the full [`Config`](crate::Config).

use std::time::Duration;

use crate::Config;
use crate::defaults::{
    DEFAULT_DAEMON_TIMEOUT_SECS, DEFAULT_INIT_TIMEOUT_SECS, DEFAULT_MAX_FREE_TICKETS,
};

/// Resource limits applied to a single daemon session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// High-water mark of the free ticket pool.
    pub max_free_tickets: usize,
    /// Optional bound on how long a synchronous call waits for its reply.
    pub daemon_timeout: Option<Duration>,
    /// Bound on how long callers wait for the handshake outcome.
    pub init_timeout: Duration,
}

impl SessionLimits {
    /// Returns limits with a different pool cap.
    #[must_use]
    pub const fn with_max_free_tickets(mut self, max_free_tickets: usize) -> Self {
        self.max_free_tickets = max_free_tickets;
        self
    }

    /// Returns limits with a per-call daemon timeout.
    #[must_use]
    pub const fn with_daemon_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.daemon_timeout = timeout;
        self
    }

    /// Returns limits with a different handshake timeout.
    #[must_use]
    pub const fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_free_tickets: DEFAULT_MAX_FREE_TICKETS,
            daemon_timeout: timeout_from_secs(DEFAULT_DAEMON_TIMEOUT_SECS),
            init_timeout: Duration::from_secs(DEFAULT_INIT_TIMEOUT_SECS),
        }
    }
}

impl From<&Config> for SessionLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_free_tickets: config.max_free_tickets,
            daemon_timeout: timeout_from_secs(config.daemon_timeout_secs),
            init_timeout: Duration::from_secs(config.init_timeout_secs),
        }
    }
}

/// A zero timeout means "wait forever".
const fn timeout_from_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}
