//! Session tunables and the bounds `Config::validate` enforces on them.

/// Soft cap on the number of refreshed tickets kept for reuse per session.
pub const DEFAULT_MAX_FREE_TICKETS: usize = 1024;

/// Per-call daemon timeout in seconds; zero disables the timeout.
pub const DEFAULT_DAEMON_TIMEOUT_SECS: u64 = 0;

/// Upper bound accepted for the per-call daemon timeout.
pub const MAX_DAEMON_TIMEOUT_SECS: u64 = 600;

/// Time allowed for the protocol handshake to complete.
pub const DEFAULT_INIT_TIMEOUT_SECS: u64 = 10;

/// Lower bound accepted for the handshake timeout.
pub const MIN_INIT_TIMEOUT_SECS: u64 = 1;

/// Upper bound accepted for the handshake timeout.
pub const MAX_INIT_TIMEOUT_SECS: u64 = 300;

/// Number of session slots offered by a registry.
pub const DEFAULT_MAX_SESSIONS: usize = 16;
