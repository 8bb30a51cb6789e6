//! Signal delivery to worker process groups.
//!
//! Termination is idempotent: a group that is already gone (`ESRCH`) counts as
//! killed, so the supervisor and the drop backstop can both call it safely.

use crate::config::types::{Result, SandboxError};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

/// Result of a kill attempt on a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillDelivery {
    Delivered,
    AlreadyGone,
}

/// Send SIGKILL to every process in group `pgid`.
pub fn kill_process_group(pgid: i32) -> Result<KillDelivery> {
    if pgid <= 1 {
        return Err(SandboxError::Process(format!(
            "refusing to signal process group {}",
            pgid
        )));
    }
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => Ok(KillDelivery::Delivered),
        Err(Errno::ESRCH) => Ok(KillDelivery::AlreadyGone),
        Err(e) => Err(SandboxError::Process(format!(
            "killpg({}, SIGKILL) failed: {}",
            pgid, e
        ))),
    }
}

/// Ask the kernel to SIGKILL the calling process when its parent dies, so an
/// orphaned worker never outlives the service.
pub fn set_parent_death_signal() -> Result<()> {
    // SAFETY: prctl(PR_SET_PDEATHSIG) takes a signal number and no pointers.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0) };
    if rc != 0 {
        return Err(SandboxError::Process(format!(
            "PR_SET_PDEATHSIG failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Human-readable signal name for audit output.
pub fn signal_name(signal: i32) -> String {
    Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {}", signal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_init_and_own_group_sentinels() {
        assert!(kill_process_group(0).is_err());
        assert!(kill_process_group(1).is_err());
        assert!(kill_process_group(-5).is_err());
    }

    #[test]
    fn missing_group_is_already_gone() {
        // pid_max is at most 2^22, so this group cannot exist.
        assert_eq!(
            kill_process_group(i32::MAX - 7).unwrap(),
            KillDelivery::AlreadyGone
        );
    }

    #[test]
    fn signal_names() {
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(libc::SIGXCPU), "SIGXCPU");
        assert_eq!(signal_name(999), "signal 999");
    }
}
