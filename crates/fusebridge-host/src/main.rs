//! Entry point for `fusebridge-probe`.

use std::io;
use std::process::ExitCode;

use fusebridge_host::process::ChildProcessLauncher;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    fusebridge_host::run(
        std::env::args_os(),
        &ChildProcessLauncher,
        &mut stdout,
        &mut stderr,
    )
}
