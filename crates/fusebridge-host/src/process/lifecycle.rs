//! Shutdown of daemon child processes.

use std::process::Child;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::PROCESS_TARGET;

/// Time a daemon gets to exit on its own before it is killed.
pub const GRACE_PERIOD: Duration = Duration::from_millis(200);

/// Waits briefly for `child` to exit, then kills it.
pub(super) fn terminate_child(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(target: PROCESS_TARGET, pid = child.id(), ?status, "daemon exited");
            return;
        }
        Ok(None) => {
            debug!(
                target: PROCESS_TARGET,
                pid = child.id(),
                grace = ?GRACE_PERIOD,
                "daemon still running, waiting before killing"
            );
        }
        Err(error) => {
            warn!(
                target: PROCESS_TARGET,
                pid = child.id(),
                %error,
                "failed to check daemon status, waiting before killing"
            );
        }
    }

    thread::sleep(GRACE_PERIOD);
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(
                target: PROCESS_TARGET,
                pid = child.id(),
                ?status,
                "daemon exited during grace period"
            );
        }
        Ok(None) | Err(_) => {
            warn!(target: PROCESS_TARGET, pid = child.id(), "killing daemon");
            if let Err(error) = child.kill() {
                debug!(target: PROCESS_TARGET, %error, "kill failed");
            }
            if let Err(error) = child.wait() {
                debug!(target: PROCESS_TARGET, %error, "reaping daemon failed");
            }
        }
    }
}
