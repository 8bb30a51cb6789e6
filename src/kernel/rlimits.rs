//! Resource limits applied to a worker before it evaluates anything.

use crate::config::policy::WorkerLimits;
use crate::config::types::{Result, SandboxError};
use nix::sys::resource::{getrlimit, setrlimit, Resource};

/// One rlimit to apply as `(resource, soft, hard)`.
pub type RlimitSpec = (Resource, u64, u64);

/// The rlimits a worker runs under.
///
/// `RLIMIT_FSIZE` of zero stops the creation of file content even if an open
/// slipped through; pipes are unaffected.
pub fn worker_rlimits(limits: &WorkerLimits) -> Vec<RlimitSpec> {
    vec![
        (
            Resource::RLIMIT_AS,
            limits.memory_limit_bytes,
            limits.memory_limit_bytes,
        ),
        (
            Resource::RLIMIT_CPU,
            limits.cpu_seconds,
            limits.cpu_seconds + 1,
        ),
        (Resource::RLIMIT_NOFILE, limits.open_files, limits.open_files),
        (Resource::RLIMIT_FSIZE, 0, 0),
        (Resource::RLIMIT_CORE, 0, 0),
        (Resource::RLIMIT_MEMLOCK, 0, 0),
    ]
}

/// Apply every worker rlimit. A hard limit can only be lowered, so the
/// requested values are clamped to the current hard limit first.
pub fn apply_worker_rlimits(limits: &WorkerLimits) -> Result<()> {
    for (resource, soft, hard) in worker_rlimits(limits) {
        let (_, current_hard) = getrlimit(resource).map_err(|e| {
            SandboxError::Process(format!("getrlimit({:?}) failed: {}", resource, e))
        })?;
        let hard = hard.min(current_hard);
        let soft = soft.min(hard);
        setrlimit(resource, soft, hard).map_err(|e| {
            SandboxError::Process(format!(
                "setrlimit({:?}, {}, {}) failed: {}",
                resource, soft, hard, e
            ))
        })?;
    }
    Ok(())
}
