/// Core types and error taxonomy shared across snipbox
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DEADLINE_MS: u64 = 1000;
pub const DEFAULT_TEARDOWN_GRACE_MS: u64 = 200;
pub const DEFAULT_MAX_CODE_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT: usize = 8;
pub const DEFAULT_BIND: &str = "127.0.0.1:3001";

/// Host-side failures. None of these are attributable to the submitted snippet.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Teardown error: {0}")]
    Teardown(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Syscall filter error: {0}")]
    Seccomp(String),
}

impl SandboxError {
    /// Stable short label used in audit events and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::Io(_) => "io",
            SandboxError::Config(_) => "config",
            SandboxError::Spawn(_) => "spawn",
            SandboxError::Protocol(_) => "protocol",
            SandboxError::Teardown(_) => "teardown",
            SandboxError::Privilege(_) => "privilege",
            SandboxError::Process(_) => "process",
            SandboxError::Seccomp(_) => "seccomp",
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Process-wide service configuration.
///
/// Read once at startup and shared read-only afterwards. Every field has a
/// serde default so partial JSON files are accepted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Wall-clock budget for one run
    pub deadline_ms: u64,
    /// Upper bound on waiting for a killed worker to be reaped
    pub teardown_grace_ms: u64,
    /// Maximum accepted snippet size in bytes
    pub max_code_bytes: usize,
    /// Maximum captured console output in bytes
    pub max_output_bytes: usize,
    /// Address space ceiling for the worker process
    pub memory_limit_bytes: u64,
    /// Number of sandboxes allowed to run at once
    pub max_concurrent: usize,
    /// Executable re-launched in worker role (defaults to the current binary)
    pub worker_program: Option<PathBuf>,
    /// Strict mode: fail the run if a kernel control cannot be applied
    pub strict_mode: bool,
    /// HTTP listen address
    pub bind: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            deadline_ms: DEFAULT_DEADLINE_MS,
            teardown_grace_ms: DEFAULT_TEARDOWN_GRACE_MS,
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            worker_program: None,
            strict_mode: false,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| SandboxError::Config(format!("invalid bind address {}: {}", self.bind, e)))
    }

    /// Resolve the executable used for worker processes.
    pub fn resolve_worker_program(&self) -> Result<PathBuf> {
        match &self.worker_program {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                SandboxError::Config(format!("cannot resolve current executable: {}", e))
            }),
        }
    }
}
