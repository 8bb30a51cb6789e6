// Startup config validation
// Invalid configuration refuses to start; strict mode additionally turns
// the validation report into an error so callers cannot ignore it.

use crate::config::types::{Result, SandboxError, ServiceConfig};
use serde::Serialize;
use std::path::Path;

/// Smallest address space a V8 isolate reliably starts in.
const MIN_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

/// Validation result with detailed errors
#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup
pub fn validate_config(config: &ServiceConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_timing(config, &mut result);
    validate_limits(config, &mut result);
    validate_worker(config, &mut result);

    if let Err(e) = config.bind_addr() {
        result.add_error(e.to_string());
    }

    if config.strict_mode && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(SandboxError::Config(error_msg));
    }

    Ok(result)
}

fn validate_timing(config: &ServiceConfig, result: &mut ValidationResult) {
    if config.deadline_ms == 0 {
        result.add_error("deadline_ms cannot be zero".to_string());
    } else if config.deadline_ms > 60_000 {
        result.add_warning(format!(
            "deadline_ms {} is above one minute; a single snippet can hold a slot that long",
            config.deadline_ms
        ));
    }

    if config.teardown_grace_ms == 0 {
        result.add_error("teardown_grace_ms cannot be zero".to_string());
    } else if config.teardown_grace_ms > config.deadline_ms {
        result.add_warning(format!(
            "teardown_grace_ms ({}) exceeds deadline_ms ({})",
            config.teardown_grace_ms, config.deadline_ms
        ));
    }
}

fn validate_limits(config: &ServiceConfig, result: &mut ValidationResult) {
    if config.max_code_bytes == 0 {
        result.add_error("max_code_bytes cannot be zero".to_string());
    } else if config.max_code_bytes > 16 * 1024 * 1024 {
        result.add_warning(format!(
            "max_code_bytes {} is very large (> 16MB)",
            config.max_code_bytes
        ));
    }

    if config.max_output_bytes == 0 {
        result.add_error("max_output_bytes cannot be zero".to_string());
    }

    if config.memory_limit_bytes < MIN_MEMORY_LIMIT_BYTES {
        result.add_error(format!(
            "memory_limit_bytes {} is below the {} byte minimum for the worker",
            config.memory_limit_bytes, MIN_MEMORY_LIMIT_BYTES
        ));
    }

    if config.max_concurrent == 0 {
        result.add_error("max_concurrent cannot be zero".to_string());
    }
}

fn validate_worker(config: &ServiceConfig, result: &mut ValidationResult) {
    if let Some(ref program) = config.worker_program {
        if !program.is_absolute() {
            result.add_error(format!(
                "worker_program must be an absolute path: {:?}",
                program
            ));
        } else if !program.exists() {
            result.add_error(format!("worker_program does not exist: {:?}", program));
        }
    }

    if crate::kernel::capabilities::running_as_root() {
        result.add_warning(
            "service runs as root; workers inherit uid 0 after dropping capabilities".to_string(),
        );
    }
}

/// Report kernel controls that are unavailable on this host
pub fn check_system_controls() -> Vec<String> {
    let mut missing = Vec::new();

    #[cfg(target_os = "linux")]
    {
        if !crate::kernel::seccomp::is_seccomp_supported() {
            missing.push("seccomp not available".to_string());
        }
        if !Path::new("/proc/self/fd").exists() {
            missing.push("/proc/self/fd not available (fd closure falls back)".to_string());
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        missing.push("Linux-only kernel controls not available on this platform".to_string());
    }

    missing
}
