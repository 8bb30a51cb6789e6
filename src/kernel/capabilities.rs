//! Capability and privilege minimization for worker processes.
//!
//! Every drop here is idempotent and best-effort: an unprivileged service has
//! nothing to drop, and that is reported rather than treated as failure.

use crate::config::types::{Result, SandboxError};
use std::fs;

const PR_CAPBSET_READ: libc::c_int = 23;
const PR_CAPBSET_DROP: libc::c_int = 24;
const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
const PR_GET_NO_NEW_PRIVS: libc::c_int = 39;
const PR_CAP_AMBIENT: libc::c_int = 47;
const PR_CAP_AMBIENT_CLEAR_ALL: libc::c_ulong = 4;
const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

/// Highest capability number probed in the bounding set.
pub const MAX_CAP: u32 = 40;

/// Which capability sets ended up empty after [`drop_all_capabilities`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityDrop {
    pub bounding_cleared: bool,
    pub process_sets_zeroed: bool,
}

impl CapabilityDrop {
    pub fn complete(&self) -> bool {
        self.bounding_cleared && self.process_sets_zeroed
    }
}

/// Drop bounding, ambient, effective, permitted and inheritable capabilities.
pub fn drop_all_capabilities() -> Result<CapabilityDrop> {
    for cap in 0..=MAX_CAP {
        // SAFETY: prctl(PR_CAPBSET_DROP) with any cap number is safe; unknown
        // caps and missing CAP_SETPCAP are reported through the return value.
        let _ = unsafe { libc::prctl(PR_CAPBSET_DROP, cap as libc::c_ulong, 0, 0, 0) };
    }

    // SAFETY: clearing the ambient set takes no pointers. Older kernels
    // without ambient capabilities return EINVAL, which is harmless.
    let rc = unsafe { libc::prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL, 0, 0, 0) };
    if rc != 0 {
        log::debug!("Ambient capability clear not supported");
    }

    zero_process_capabilities()?;

    let bounding_cleared = bounding_set().is_empty();
    let process_sets_zeroed = process_sets_are_zero();
    if !process_sets_zeroed {
        log::warn!("Capability sets not zeroed after drop; no_new_privs still applies");
    }
    Ok(CapabilityDrop {
        bounding_cleared,
        process_sets_zeroed,
    })
}

/// Zero the effective, permitted and inheritable sets with raw capset(2).
fn zero_process_capabilities() -> Result<()> {
    #[repr(C)]
    struct CapUserHeader {
        version: u32,
        pid: i32,
    }

    #[repr(C)]
    struct CapUserData {
        effective: u32,
        permitted: u32,
        inheritable: u32,
    }

    let header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };
    // Version 3 takes two entries: caps 0-31 and 32-63.
    let data = [
        CapUserData {
            effective: 0,
            permitted: 0,
            inheritable: 0,
        },
        CapUserData {
            effective: 0,
            permitted: 0,
            inheritable: 0,
        },
    ];

    // SAFETY: capset(2) with a version-3 header for the calling thread and
    // two initialized data entries; both pointers outlive the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &header as *const CapUserHeader,
            data.as_ptr(),
        )
    };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EPERM) {
            return Err(SandboxError::Privilege(format!("capset failed: {}", err)));
        }
        log::debug!("capset returned EPERM: {}", err);
    }
    Ok(())
}

/// Prevent privilege gain through execve. Required before a seccomp filter
/// can be installed without CAP_SYS_ADMIN. Irreversible.
pub fn set_no_new_privs() -> Result<()> {
    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) takes no pointers and is idempotent.
    let rc = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1 as libc::c_ulong, 0, 0, 0) };
    if rc != 0 {
        return Err(SandboxError::Privilege(format!(
            "Failed to set PR_SET_NO_NEW_PRIVS: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

pub fn check_no_new_privs() -> Result<bool> {
    // SAFETY: read-only prctl query.
    let rc = unsafe { libc::prctl(PR_GET_NO_NEW_PRIVS, 0, 0, 0, 0) };
    if rc < 0 {
        return Err(SandboxError::Privilege(
            "Failed to query PR_GET_NO_NEW_PRIVS".to_string(),
        ));
    }
    Ok(rc == 1)
}

/// Capability numbers still present in the bounding set.
pub fn bounding_set() -> Vec<u32> {
    (0..=MAX_CAP)
        .filter(|cap| {
            // SAFETY: read-only prctl query.
            unsafe { libc::prctl(PR_CAPBSET_READ, *cap as libc::c_ulong, 0, 0, 0) == 1 }
        })
        .collect()
}

fn process_sets_are_zero() -> bool {
    let Ok(status) = fs::read_to_string("/proc/thread-self/status") else {
        return false;
    };
    status
        .lines()
        .filter(|line| {
            line.starts_with("CapInh:") || line.starts_with("CapPrm:") || line.starts_with("CapEff:")
        })
        .all(|line| line.split_whitespace().nth(1) == Some("0000000000000000"))
}

pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}
