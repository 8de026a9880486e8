//! Command-line interface of the probe.
//!
//! Arguments before `--` configure the bridge and are resolved by
//! `ortho_config`; everything after it names the daemon to launch:
//!
//! ```text
//! fusebridge-probe [--max-free-tickets N ...] -- DAEMON [ARG...]
//! ```

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use crate::process::DaemonCommand;

/// Separator between bridge configuration and the daemon command.
const SEPARATOR: &str = "--";

/// Daemon command accepted after the separator.
#[derive(Parser, Debug)]
#[command(
    name = "fusebridge-probe",
    about = "Launches a filesystem daemon, negotiates the protocol and probes it"
)]
pub struct ProbeCli {
    /// Daemon executable.
    #[arg(value_name = "DAEMON")]
    pub program: PathBuf,
    /// Arguments passed to the daemon.
    #[arg(
        value_name = "ARG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<OsString>,
}

impl ProbeCli {
    /// The daemon command described by the arguments.
    #[must_use]
    pub fn command(&self) -> DaemonCommand {
        DaemonCommand {
            program: self.program.clone(),
            args: self.args.clone(),
        }
    }
}

/// Arguments split at the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitArguments {
    /// Program name followed by configuration flags.
    pub config: Vec<OsString>,
    /// Program name followed by the daemon command.
    pub daemon: Vec<OsString>,
}

/// Splits raw process arguments at the first `--`.
///
/// The program name, when present, leads both halves so each can be parsed
/// as a complete command line.
#[must_use]
pub fn split_arguments<I>(args: I) -> SplitArguments
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let program = iter
        .next()
        .unwrap_or_else(|| OsString::from("fusebridge-probe"));
    let mut config = vec![program.clone()];
    let mut daemon = vec![program];
    let mut after_separator = false;
    for arg in iter {
        if after_separator {
            daemon.push(arg);
        } else if arg == SEPARATOR {
            after_separator = true;
        } else {
            config.push(arg);
        }
    }
    SplitArguments { config, daemon }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case(
        &["probe", "--max-free-tickets", "4", "--", "memfsd", "-v"],
        &["probe", "--max-free-tickets", "4"],
        &["probe", "memfsd", "-v"]
    )]
    #[case(&["probe", "--", "memfsd"], &["probe"], &["probe", "memfsd"])]
    #[case(&["probe", "--log-format", "json"], &["probe", "--log-format", "json"], &["probe"])]
    #[case(&["probe", "--", "d", "--", "x"], &["probe"], &["probe", "d", "--", "x"])]
    fn splits_at_the_first_separator(
        #[case] raw: &[&str],
        #[case] config: &[&str],
        #[case] daemon: &[&str],
    ) {
        let split = split_arguments(os(raw));

        assert_eq!(split.config, os(config));
        assert_eq!(split.daemon, os(daemon));
    }

    #[rstest]
    fn parses_daemon_arguments_with_hyphens() {
        let cli = ProbeCli::try_parse_from(os(&["probe", "memfsd", "--debug", "-f"]))
            .expect("daemon command parses");

        assert_eq!(
            cli.command(),
            DaemonCommand {
                program: PathBuf::from("memfsd"),
                args: os(&["--debug", "-f"]),
            }
        );
    }

    #[rstest]
    fn requires_a_daemon_program() {
        assert!(ProbeCli::try_parse_from(os(&["probe"])).is_err());
    }
}
