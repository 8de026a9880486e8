//! Host-side tooling for the filesystem bridge.
//!
//! The `fusebridge-probe` binary launches a filesystem daemon, wires it to a
//! [`fusebridge_ipc::Session`] through a [`fusebridge_ipc::ChannelPump`],
//! negotiates the protocol and reports the root filesystem statistics. This
//! crate holds the pieces it is assembled from: configuration bootstrap,
//! telemetry, daemon process management and the probe itself.

pub mod bootstrap;
pub mod cli;
pub mod probe;
pub mod process;
pub mod telemetry;

#[cfg(test)]
mod tests;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;

use crate::bootstrap::{SystemConfigLoader, bootstrap_with};
use crate::cli::{ProbeCli, split_arguments};
use crate::probe::run_probe;
use crate::process::DaemonLauncher;

/// Runs the probe for the given process arguments.
///
/// The report goes to `stdout`; usage and failure messages go to `stderr`.
pub fn run<I, O, E>(
    args: I,
    launcher: &dyn DaemonLauncher,
    stdout: &mut O,
    stderr: &mut E,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    O: Write,
    E: Write,
{
    let split = split_arguments(args);
    let cli = match ProbeCli::try_parse_from(&split.daemon) {
        Ok(cli) => cli,
        Err(error) => {
            report(stderr, &error.render().to_string());
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let bootstrapped = match bootstrap_with(&SystemConfigLoader::new(split.config)) {
        Ok(bootstrapped) => bootstrapped,
        Err(error) => {
            report(stderr, &format!("fusebridge-probe: {error}"));
            return ExitCode::FAILURE;
        }
    };

    match run_probe(bootstrapped.config(), launcher, &cli.command()) {
        Ok(summary) => {
            report(stdout, &summary.to_string());
            ExitCode::SUCCESS
        }
        Err(error) => {
            report(stderr, &format!("fusebridge-probe: {error}"));
            ExitCode::FAILURE
        }
    }
}

fn report<W: Write>(sink: &mut W, message: &str) {
    if writeln!(sink, "{message}").is_err() {
        tracing::warn!(target: "fusebridge_host", "failed to write probe output");
    }
}
