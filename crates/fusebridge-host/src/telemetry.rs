//! Tracing subscriber set-up for the probe.
//!
//! Events from the IPC core carry per-module targets such as
//! `fusebridge_ipc::channel`, and the pump runs on named threads, so both the
//! target and the thread name are kept in every rendered event.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

use fusebridge_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

type BoxedSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Installs the global subscriber for `config` on first use.
///
/// Later calls return a fresh [`TelemetryHandle`] without touching the
/// global subscriber, even when their configuration differs.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] when another subscriber is already
/// installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| {
            let subscriber = build_subscriber(config, io::stderr, io::stderr().is_terminal())?;
            tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
        })
        .map(|()| TelemetryHandle)
}

/// Builds the subscriber described by `config`, writing to `make_writer`.
fn build_subscriber<W>(
    config: &Config,
    make_writer: W,
    ansi: bool,
) -> Result<BoxedSubscriber, TelemetryError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_writer(make_writer)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    Ok(match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.with_ansi(ansi).compact().finish()),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex, PoisonError};

    use rstest::rstest;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            let buffer = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            String::from_utf8_lossy(&buffer).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn emit(config: &Config) -> String {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber =
            build_subscriber(config, move || sink.clone(), false).expect("filter parses");
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(
                target: "fusebridge_ipc::channel",
                unique = 7_u64,
                "daemon closed the channel"
            );
            tracing::debug!(target: "fusebridge_ipc::session", "pool refreshed a ticket");
        });
        captured.text()
    }

    #[rstest]
    fn rejects_unparsable_filters() {
        let config = Config {
            log_filter: "fusebridge=loud".to_owned(),
            ..Config::default()
        };

        let outcome = build_subscriber(&config, io::sink, false);

        assert!(matches!(outcome, Err(TelemetryError::Filter(_))));
    }

    #[rstest]
    fn json_events_carry_target_and_fields() {
        let output = emit(&Config::default());

        assert!(output.contains("\"target\":\"fusebridge_ipc::channel\""), "{output}");
        assert!(output.contains("\"unique\":7"), "{output}");
        assert!(!output.contains("pool refreshed a ticket"), "{output}");
    }

    #[rstest]
    fn filter_enables_debug_for_one_module() {
        let config = Config {
            log_filter: "info,fusebridge_ipc::session=debug".to_owned(),
            log_format: LogFormat::Compact,
            ..Config::default()
        };

        let output = emit(&config);

        assert!(output.contains("daemon closed the channel"), "{output}");
        assert!(output.contains("pool refreshed a ticket"), "{output}");
    }
}
