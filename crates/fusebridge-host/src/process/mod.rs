//! Launching the filesystem daemon as a child process.
//!
//! The daemon speaks the bridge protocol on its standard input and output.
//! [`DaemonLauncher`] is the seam the probe uses to obtain those streams,
//! so tests can substitute an in-process daemon.

mod lifecycle;

#[cfg(test)]
mod tests;

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub use lifecycle::GRACE_PERIOD;

/// Log target for process operations.
pub(crate) const PROCESS_TARGET: &str = "fusebridge_host::process";

/// Program and arguments used to start the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<OsString>,
}

/// Errors raised while starting the daemon.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The executable does not exist.
    #[error("daemon binary not found: {command}")]
    BinaryNotFound {
        /// Program that was requested.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The process could not be started or wired up.
    #[error("failed to spawn daemon: {message}")]
    SpawnFailed {
        /// What went wrong.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// A running daemon and the two ends of its protocol stream.
pub struct DaemonProcess {
    child: Option<Child>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl DaemonProcess {
    /// Wraps streams served by something other than a child process.
    #[must_use]
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            child: None,
            reader: Some(Box::new(reader)),
            writer: Some(Box::new(writer)),
        }
    }

    /// Process id of the child, if there is one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Takes the stream the daemon writes replies to.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Takes the stream the daemon reads requests from.
    pub fn take_writer(&mut self) -> Option<Box<dyn Write + Send>> {
        self.writer.take()
    }

    /// Closes any streams still held and stops the child.
    ///
    /// The child gets [`GRACE_PERIOD`] to exit after its input closes before
    /// it is killed.
    pub fn terminate(&mut self) {
        self.writer.take();
        self.reader.take();
        if let Some(mut child) = self.child.take() {
            lifecycle::terminate_child(&mut child);
        }
    }
}

impl std::fmt::Debug for DaemonProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonProcess")
            .field("pid", &self.pid())
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .finish()
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Starts daemons for the probe.
pub trait DaemonLauncher: Send + Sync {
    /// Starts the daemon described by `command`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] when the daemon cannot be started.
    fn launch(&self, command: &DaemonCommand) -> Result<DaemonProcess, ProcessError>;
}

/// Launcher that spawns the daemon as a child with piped stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChildProcessLauncher;

impl DaemonLauncher for ChildProcessLauncher {
    fn launch(&self, command: &DaemonCommand) -> Result<DaemonProcess, ProcessError> {
        debug!(
            target: PROCESS_TARGET,
            program = %command.program.display(),
            args = ?command.args,
            "spawning daemon"
        );

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| {
                if error.kind() == io::ErrorKind::NotFound {
                    ProcessError::BinaryNotFound {
                        command: command.program.display().to_string(),
                        source: Arc::new(error),
                    }
                } else {
                    ProcessError::SpawnFailed {
                        message: format!("failed to start {}", command.program.display()),
                        source: Arc::new(error),
                    }
                }
            })?;

        let Some(stdin) = child.stdin.take() else {
            lifecycle::terminate_child(&mut child);
            return Err(missing_pipe("stdin"));
        };
        let Some(stdout) = child.stdout.take() else {
            lifecycle::terminate_child(&mut child);
            return Err(missing_pipe("stdout"));
        };

        debug!(target: PROCESS_TARGET, pid = child.id(), "daemon spawned");
        Ok(DaemonProcess {
            child: Some(child),
            reader: Some(Box::new(stdout)),
            writer: Some(Box::new(stdin)),
        })
    }
}

fn missing_pipe(stream: &str) -> ProcessError {
    ProcessError::SpawnFailed {
        message: format!("failed to capture {stream}"),
        source: Arc::new(io::Error::other(format!("no {stream}"))),
    }
}
