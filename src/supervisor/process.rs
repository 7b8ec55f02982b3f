//! OS-level signalling for workload processes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process {pid} not found")]
    NotFound { pid: u32 },
    #[error("failed to signal process {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },
}

/// Ask a process to exit gracefully (SIGTERM).
///
/// Returns `Ok(false)` on platforms without a graceful termination signal;
/// the caller should force-kill instead.
#[cfg(unix)]
pub fn request_terminate(pid: u32) -> Result<bool, ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Err(ProcessError::NotFound { pid }),
        Err(e) => Err(ProcessError::SignalFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
pub fn request_terminate(_pid: u32) -> Result<bool, ProcessError> {
    Ok(false)
}

/// Whether a process with this PID exists (signal 0 probe).
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
