//! Configuration loading and telemetry start-up for the probe.

use std::ffi::OsString;
use std::sync::Arc;

use fusebridge_config::{Config, ConfigError};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::debug;

use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Log target for bootstrap operations.
const BOOTSTRAP_TARGET: &str = "fusebridge_host::bootstrap";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the bridge configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when a layer cannot be read or merged.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that layers defaults, file, environment and the given flags.
#[derive(Debug, Default, Clone)]
pub struct SystemConfigLoader {
    args: Vec<OsString>,
}

impl SystemConfigLoader {
    /// Creates a loader over configuration flags; the first item is the
    /// program name.
    #[must_use]
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }
}

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter(self.args.iter().cloned())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but holds unsupported values.
    #[error("invalid configuration: {source}")]
    Invalid {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Result of a successful bootstrap.
#[derive(Debug)]
pub struct Bootstrapped {
    config: Config,
    telemetry: TelemetryHandle,
}

impl Bootstrapped {
    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }
}

/// Loads and validates configuration, then installs telemetry.
///
/// # Errors
///
/// Returns [`BootstrapError`] naming the stage that failed.
pub fn bootstrap_with(loader: &dyn ConfigLoader) -> Result<Bootstrapped, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    config
        .validate()
        .map_err(|source| BootstrapError::Invalid { source })?;
    let handle =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    debug!(
        target: BOOTSTRAP_TARGET,
        max_free_tickets = config.max_free_tickets,
        max_sessions = config.max_sessions,
        "bootstrap complete"
    );
    Ok(Bootstrapped {
        config,
        telemetry: handle,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    struct FixedLoader(Config);

    impl ConfigLoader for FixedLoader {
        fn load(&self) -> Result<Config, Arc<OrthoError>> {
            Ok(self.0.clone())
        }
    }

    #[rstest]
    fn rejects_out_of_range_configuration() {
        let loader = FixedLoader(Config {
            init_timeout_secs: 0,
            ..Config::default()
        });

        let error = bootstrap_with(&loader).expect_err("zero init timeout is invalid");

        assert!(matches!(
            error,
            BootstrapError::Invalid {
                source: ConfigError::OutOfRange {
                    field: "init_timeout_secs",
                    ..
                }
            }
        ));
    }

    #[rstest]
    fn bootstraps_with_defaults() {
        let loader = FixedLoader(Config::default());

        let bootstrapped = bootstrap_with(&loader).expect("defaults are valid");

        assert_eq!(bootstrapped.config(), &Config::default());
    }

    #[rstest]
    fn system_loader_reads_flags() {
        let loader = SystemConfigLoader::new(vec![
            OsString::from("fusebridge-probe"),
            OsString::from("--max-free-tickets"),
            OsString::from("3"),
        ]);

        let config = loader.load().expect("flags parse");

        assert_eq!(config.max_free_tickets, 3);
    }
}
