/// File descriptor closure for worker processes.
///
/// A worker keeps stdin, stdout and stderr and nothing else. `close_range` is
/// preferred; `/proc/self/fd` iteration is the fallback for older kernels.
use crate::config::types::{Result, SandboxError};
use std::fs;

use nix::unistd::close;

const SYS_CLOSE_RANGE: libc::c_long = 436;

/// How the inherited descriptors were closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdClosure {
    CloseRange,
    ProcScan { closed: usize },
}

/// Close every descriptor above 2.
pub fn close_inherited_fds(strict_mode: bool) -> Result<FdClosure> {
    if try_close_range() {
        return Ok(FdClosure::CloseRange);
    }
    close_fds_via_proc(strict_mode)
}

fn try_close_range() -> bool {
    // SAFETY: close_range(3, ~0, 0) only closes descriptors of this process;
    // no pointers are involved.
    let rc = unsafe { libc::syscall(SYS_CLOSE_RANGE, 3 as libc::c_uint, !0 as libc::c_uint, 0 as libc::c_uint) };
    rc == 0
}

fn close_fds_via_proc(strict_mode: bool) -> Result<FdClosure> {
    // Collect first: the directory handle itself is one of the open fds.
    let fds: Vec<i32> = open_fds()?.into_iter().filter(|fd| *fd > 2).collect();

    let mut closed = 0;
    let mut failed = Vec::new();
    for fd in fds {
        match close(fd) {
            Ok(()) => closed += 1,
            Err(nix::errno::Errno::EBADF) => {}
            Err(e) => failed.push(format!("fd {}: {}", fd, e)),
        }
    }

    if !failed.is_empty() {
        let message = format!("Failed to close {} fd(s): {}", failed.len(), failed.join(", "));
        if strict_mode {
            return Err(SandboxError::Process(message));
        }
        log::warn!("{} (permissive mode)", message);
    }
    Ok(FdClosure::ProcScan { closed })
}

/// Open descriptors of the current process, sorted.
pub fn open_fds() -> Result<Vec<i32>> {
    let entries = fs::read_dir("/proc/self/fd")
        .map_err(|e| SandboxError::Process(format!("Failed to read /proc/self/fd: {}", e)))?;

    let mut fds: Vec<i32> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter_map(|name| name.parse().ok())
        .collect();
    fds.sort_unstable();
    Ok(fds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_streams_are_listed() {
        let fds = open_fds().unwrap();
        assert!(fds.len() >= 3);
        assert!(fds.contains(&0));
        assert!(fds.contains(&1));
        assert!(fds.contains(&2));
    }
}
