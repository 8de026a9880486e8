//! Layered configuration for the filesystem bridge.
//!
//! Configuration is resolved with `ortho_config`: built-in defaults first,
//! then a TOML file (`--config-path` or `FUSEBRIDGE_CONFIG_PATH`), then
//! `FUSEBRIDGE_*` environment variables, then command-line flags. The IPC
//! core consumes the resolved values through [`SessionLimits`].

mod defaults;
mod limits;
mod logging;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_DAEMON_TIMEOUT_SECS, DEFAULT_INIT_TIMEOUT_SECS, DEFAULT_MAX_FREE_TICKETS,
    DEFAULT_MAX_SESSIONS, MAX_DAEMON_TIMEOUT_SECS, MAX_INIT_TIMEOUT_SECS, MIN_INIT_TIMEOUT_SECS,
};
pub use limits::SessionLimits;
pub use logging::{
    DEFAULT_LOG_FILTER, LogFormat, default_log_filter, default_log_filter_string,
    default_log_format,
};

/// Resolved bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "FUSEBRIDGE")]
pub struct Config {
    /// High-water mark of each session's free ticket pool.
    #[ortho_config(default = DEFAULT_MAX_FREE_TICKETS)]
    pub max_free_tickets: usize,
    /// Per-call daemon timeout in seconds; zero waits forever.
    #[ortho_config(default = DEFAULT_DAEMON_TIMEOUT_SECS)]
    pub daemon_timeout_secs: u64,
    /// Seconds allowed for the protocol handshake.
    #[ortho_config(default = DEFAULT_INIT_TIMEOUT_SECS)]
    pub init_timeout_secs: u64,
    /// Number of session slots in a registry.
    #[ortho_config(default = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,
    /// Tracing filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the log sink.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_free_tickets: DEFAULT_MAX_FREE_TICKETS,
            daemon_timeout_secs: DEFAULT_DAEMON_TIMEOUT_SECS,
            init_timeout_secs: DEFAULT_INIT_TIMEOUT_SECS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Returns the configured tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the session limits derived from this configuration.
    #[must_use]
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits::from(self)
    }

    /// Checks that every tunable lies inside the range the bridge supports.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon_timeout_secs > MAX_DAEMON_TIMEOUT_SECS {
            return Err(ConfigError::out_of_range(
                "daemon_timeout_secs",
                self.daemon_timeout_secs,
                0,
                MAX_DAEMON_TIMEOUT_SECS,
            ));
        }
        if !(MIN_INIT_TIMEOUT_SECS..=MAX_INIT_TIMEOUT_SECS).contains(&self.init_timeout_secs) {
            return Err(ConfigError::out_of_range(
                "init_timeout_secs",
                self.init_timeout_secs,
                MIN_INIT_TIMEOUT_SECS,
                MAX_INIT_TIMEOUT_SECS,
            ));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::out_of_range(
                "max_sessions",
                0,
                1,
                u64::MAX,
            ));
        }
        Ok(())
    }
}

/// Errors raised when a resolved configuration is unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field is outside its supported range.
    #[error("{field} = {value} is outside the supported range {min}..={max}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was supplied.
        value: u64,
        /// Smallest accepted value.
        min: u64,
        /// Largest accepted value.
        max: u64,
    },
}

impl ConfigError {
    const fn out_of_range(field: &'static str, value: u64, min: u64, max: u64) -> Self {
        Self::OutOfRange {
            field,
            value,
            min,
            max,
        }
    }
}
