/// Environment and permission hygiene for worker processes.
///
/// The parent spawns workers with a cleared environment; this module applies
/// the in-process half (umask, working directory) and verifies that nothing
/// from the host environment leaked through.
use crate::config::types::{Result, SandboxError};
use nix::sys::stat::{umask, Mode};
use std::env;

/// Loader variables that would let a parent environment inject code.
pub const DANGEROUS_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_DEBUG",
    "LD_PROFILE",
];

/// Permission policy for the worker process.
#[derive(Debug, Clone)]
pub struct HygienePolicy {
    /// Umask for anything the worker might create
    pub umask: u32,
    /// Working directory of the worker
    pub workdir: &'static str,
    pub strict_mode: bool,
}

impl Default for HygienePolicy {
    fn default() -> Self {
        HygienePolicy {
            umask: 0o077,
            workdir: "/",
            strict_mode: false,
        }
    }
}

/// What hygiene found and fixed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HygieneReport {
    /// Variables present at startup, by name only; values are never read
    pub leaked_vars: Vec<String>,
    pub environment_cleared: bool,
}

/// Apply umask and working directory, then scrub any environment variable
/// that survived the spawn.
pub fn apply(policy: &HygienePolicy) -> Result<HygieneReport> {
    umask(Mode::from_bits_truncate(policy.umask));
    env::set_current_dir(policy.workdir).map_err(|e| {
        SandboxError::Process(format!("Failed to chdir to {}: {}", policy.workdir, e))
    })?;

    let leaked_vars: Vec<String> = env::vars_os()
        .map(|(key, _)| key.to_string_lossy().into_owned())
        .collect();
    if !leaked_vars.is_empty() {
        if policy.strict_mode {
            return Err(SandboxError::Process(format!(
                "worker inherited {} environment variable(s)",
                leaked_vars.len()
            )));
        }
        for key in &leaked_vars {
            // The worker is still single-threaded at this point.
            env::remove_var(key);
        }
    }

    let environment_cleared = env::vars_os().next().is_none();
    Ok(HygieneReport {
        leaked_vars,
        environment_cleared,
    })
}

/// Loader variables set in the current environment.
pub fn dangerous_vars_present() -> Vec<&'static str> {
    DANGEROUS_VARS
        .iter()
        .copied()
        .filter(|var| env::var_os(var).is_some())
        .collect()
}
