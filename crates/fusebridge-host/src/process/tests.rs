//! Tests for launching and stopping daemon processes.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use rstest::rstest;

use super::*;

fn command(program: &str, args: &[&str]) -> DaemonCommand {
    DaemonCommand {
        program: PathBuf::from(program),
        args: args.iter().map(OsString::from).collect(),
    }
}

#[rstest]
fn missing_binaries_are_reported() {
    let error = ChildProcessLauncher
        .launch(&command("/nonexistent/fusebridge-daemon", &[]))
        .expect_err("binary does not exist");

    assert!(matches!(
        error,
        ProcessError::BinaryNotFound { ref command, .. } if command == "/nonexistent/fusebridge-daemon"
    ));
}

#[rstest]
fn daemon_stdio_is_piped() {
    let mut process = ChildProcessLauncher
        .launch(&command("cat", &[]))
        .expect("cat spawns");
    assert!(process.pid().is_some());
    let mut writer = process.take_writer().expect("stdin captured");
    let mut reader = process.take_reader().expect("stdout captured");

    writer.write_all(b"ping").expect("written");
    drop(writer);
    let mut echoed = Vec::new();
    reader.read_to_end(&mut echoed).expect("read until cat exits");

    assert_eq!(echoed, b"ping");
    process.terminate();
}

#[rstest]
fn stubborn_daemons_are_killed_after_the_grace_period() {
    let mut process = ChildProcessLauncher
        .launch(&command("sleep", &["30"]))
        .expect("sleep spawns");
    let started = Instant::now();

    process.terminate();

    let elapsed = started.elapsed();
    assert!(elapsed >= GRACE_PERIOD);
    assert!(elapsed < Duration::from_secs(5));
    assert!(process.pid().is_none());
}

#[rstest]
fn stream_backed_processes_have_no_child() {
    let mut process = DaemonProcess::from_streams(std::io::empty(), std::io::sink());

    assert!(process.pid().is_none());
    assert!(process.take_reader().is_some());
    assert!(process.take_reader().is_none());
    process.terminate();
    assert!(process.take_writer().is_none());
}
