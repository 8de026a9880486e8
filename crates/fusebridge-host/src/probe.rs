//! One-shot probe of a filesystem daemon.
//!
//! The probe launches the daemon, opens a session for it in a
//! [`SessionRegistry`], negotiates the protocol and asks for the root
//! filesystem statistics. The session is closed and the daemon stopped on
//! every path out of [`run_probe`].

use std::fmt;
use std::sync::Arc;

use bytes::Buf;
use fusebridge_config::Config;
use fusebridge_ipc::{
    CallContext, ChannelError, ChannelPump, DispatchError, Opcode, Protocol, RegistryError,
    SessionRegistry, SessionStats,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::process::{DaemonCommand, DaemonLauncher, DaemonProcess, ProcessError};

/// Log target for probe operations.
const PROBE_TARGET: &str = "fusebridge_host::probe";

/// Node id of the filesystem root.
const ROOT_NODE: u64 = 1;

/// Bytes of `statfs_out` that precede the block size.
const STATFS_BSIZE_OFFSET: usize = 40;

/// Errors that end a probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The daemon could not be started.
    #[error("failed to launch daemon: {source}")]
    Launch {
        /// Underlying launch failure.
        #[source]
        source: ProcessError,
    },
    /// The launcher returned a process without protocol streams.
    #[error("daemon process has no protocol streams")]
    MissingStreams,
    /// No session slot was free.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The pump could not be started or stopped cleanly.
    #[error("daemon channel failed: {source}")]
    Channel {
        /// Underlying channel failure.
        #[source]
        source: ChannelError,
    },
    /// The protocol handshake failed.
    #[error("handshake failed: {source}")]
    Handshake {
        /// Underlying dispatch failure.
        #[source]
        source: DispatchError,
    },
    /// The daemon did not answer `STATFS`.
    #[error("statfs probe failed: {source}")]
    Statfs {
        /// Underlying dispatch failure.
        #[source]
        source: DispatchError,
    },
    /// The `STATFS` reply is too short to summarise.
    #[error("statfs reply of {len} bytes is too short")]
    MalformedStatfs {
        /// Length of the reply body.
        len: usize,
    },
}

/// Root filesystem statistics reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatfsSummary {
    /// Total data blocks.
    pub blocks: u64,
    /// Free blocks.
    pub free_blocks: u64,
    /// Block size in bytes.
    pub block_size: u32,
}

impl StatfsSummary {
    /// Reads the summary from a `statfs_out` body of either layout.
    #[must_use]
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < STATFS_BSIZE_OFFSET + 4 {
            return None;
        }
        let mut cursor = body;
        let blocks = cursor.get_u64_le();
        let free_blocks = cursor.get_u64_le();
        cursor.advance(STATFS_BSIZE_OFFSET - 16);
        let block_size = cursor.get_u32_le();
        Some(Self {
            blocks,
            free_blocks,
            block_size,
        })
    }
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Negotiated protocol.
    pub protocol: Protocol,
    /// Root filesystem statistics.
    pub statfs: StatfsSummary,
    /// Session counters taken before the session closed.
    pub stats: SessionStats,
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "protocol {}.{} (max_write {}, max_readahead {})",
            self.protocol.major,
            self.protocol.minor,
            self.protocol.max_write,
            self.protocol.max_readahead
        )?;
        write!(
            f,
            "root: {} blocks of {} bytes, {} free",
            self.statfs.blocks, self.statfs.block_size, self.statfs.free_blocks
        )
    }
}

/// Launches the daemon described by `command` and probes it.
///
/// # Errors
///
/// Returns [`ProbeError`] naming the stage that failed. The daemon is
/// stopped before this returns, whatever the outcome.
pub fn run_probe(
    config: &Config,
    launcher: &dyn DaemonLauncher,
    command: &DaemonCommand,
) -> Result<ProbeReport, ProbeError> {
    let mut process = launcher
        .launch(command)
        .map_err(|source| ProbeError::Launch { source })?;
    let registry = SessionRegistry::from_config(config);
    let outcome = probe_process(&registry, &mut process);
    process.terminate();
    outcome
}

fn probe_process(
    registry: &SessionRegistry,
    process: &mut DaemonProcess,
) -> Result<ProbeReport, ProbeError> {
    let (Some(reader), Some(writer)) = (process.take_reader(), process.take_writer()) else {
        return Err(ProbeError::MissingStreams);
    };
    let handle = registry.open()?;
    let session = registry.get(handle)?;
    let pump = ChannelPump::spawn(Arc::clone(&session), reader, writer)
        .map_err(|source| ProbeError::Channel { source })?;

    let context = CallContext::current_process();
    let probed = session
        .handshake(&context)
        .map_err(|source| ProbeError::Handshake { source })
        .and_then(|protocol| {
            info!(
                target: PROBE_TARGET,
                major = protocol.major,
                minor = protocol.minor,
                "daemon negotiated"
            );
            let reply = session
                .dispatch_sync(Opcode::Statfs, ROOT_NODE, &[], &context)
                .map_err(|source| ProbeError::Statfs { source })?;
            let statfs = StatfsSummary::parse(reply.body()).ok_or(ProbeError::MalformedStatfs {
                len: reply.body().len(),
            })?;
            Ok((protocol, statfs))
        });
    let stats = session.stats();

    registry.close(handle);
    process.terminate();
    if let Err(error) = pump.join() {
        warn!(target: PROBE_TARGET, %error, "daemon channel ended with an error");
    }

    let (protocol, statfs) = probed?;
    Ok(ProbeReport {
        protocol,
        statfs,
        stats,
    })
}
