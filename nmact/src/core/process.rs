//! Helper process spawning and termination.

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::oneshot;

/// How a helper process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperExit {
    /// Exit status, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

/// A running helper.
#[derive(Debug)]
pub struct SpawnedHelper {
    pub pid: u32,
    /// Resolves once the process has been reaped.
    pub exit: oneshot::Receiver<HelperExit>,
}

/// Spawns and signals helper processes.
pub trait ProcessRunner: Send + Sync {
    /// Starts `argv[0]` with the remaining arguments.
    fn spawn(&self, argv: &[String]) -> io::Result<SpawnedHelper>;

    /// Asks the process to exit.
    fn terminate(&self, pid: u32);
}

/// [`ProcessRunner`] backed by `tokio::process`.
///
/// Children are put in their own process group so terminal signals aimed
/// at the parent do not reach them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
    fn spawn(&self, argv: &[String]) -> io::Result<SpawnedHelper> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .process_group(0)
            .spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("child exited before its pid was read"))?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Failed to reap helper {pid}: {e}");
                    None
                }
            };
            debug!("Helper {pid} exited with {code:?}");
            let _ = tx.send(HelperExit { code });
        });

        Ok(SpawnedHelper { pid, exit: rx })
    }

    fn terminate(&self, pid: u32) {
        let Ok(raw) = i32::try_from(pid) else {
            warn!("Refusing to signal out-of-range pid {pid}");
            return;
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => debug!("Sent SIGTERM to helper {pid}"),
            Err(Errno::ESRCH) => debug!("Helper {pid} already gone"),
            Err(e) => warn!("Failed to signal helper {pid}: {e}"),
        }
    }
}
