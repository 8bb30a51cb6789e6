//! Capability policy
//!
//! The policy is a fixed set of denials. It is identical for every request and
//! is not configurable: the only tunables are resource ceilings taken from
//! [`ServiceConfig`], which shape how hard the worker is bounded, never what it
//! may reach.

use crate::config::types::ServiceConfig;
use serde::{Deserialize, Serialize};

/// Host capability a snippet could try to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Filesystem,
    Network,
    ProcessSpawn,
    ThreadSpawn,
    HostEnvironment,
    HostObjects,
    AmbientClock,
    Randomness,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Filesystem => "filesystem",
            Capability::Network => "network",
            Capability::ProcessSpawn => "process_spawn",
            Capability::ThreadSpawn => "thread_spawn",
            Capability::HostEnvironment => "host_environment",
            Capability::HostObjects => "host_objects",
            Capability::AmbientClock => "ambient_clock",
            Capability::Randomness => "randomness",
        }
    }
}

const DENIED: &[Capability] = &[
    Capability::Filesystem,
    Capability::Network,
    Capability::ProcessSpawn,
    Capability::ThreadSpawn,
    Capability::HostEnvironment,
    Capability::HostObjects,
    Capability::AmbientClock,
    Capability::Randomness,
];

/// Global names that a script environment in other hosts would expose and
/// that must never resolve inside the sandbox.
pub const ABSENT_HOST_GLOBALS: &[&str] = &[
    "process",
    "require",
    "module",
    "exports",
    "globalThis",
    "global",
    "window",
    "self",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
    "Deno",
    "Bun",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "queueMicrotask",
    "Date",
    "performance",
    "Intl",
    "WebAssembly",
    "eval",
    "Function",
    "Worker",
    "SharedArrayBuffer",
    "Atomics",
];

/// Kernel-level controls layered under the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelControl {
    ProcessGroup,
    ParentDeathSignal,
    ResourceLimits,
    FdClosure,
    EnvironmentCleared,
    CapabilitiesDropped,
    NoNewPrivileges,
    SyscallFilter,
}

impl KernelControl {
    pub const ALL: [KernelControl; 8] = [
        KernelControl::ProcessGroup,
        KernelControl::ParentDeathSignal,
        KernelControl::ResourceLimits,
        KernelControl::FdClosure,
        KernelControl::EnvironmentCleared,
        KernelControl::CapabilitiesDropped,
        KernelControl::NoNewPrivileges,
        KernelControl::SyscallFilter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KernelControl::ProcessGroup => "process_group",
            KernelControl::ParentDeathSignal => "parent_death_signal",
            KernelControl::ResourceLimits => "resource_limits",
            KernelControl::FdClosure => "fd_closure",
            KernelControl::EnvironmentCleared => "environment_cleared",
            KernelControl::CapabilitiesDropped => "capabilities_dropped",
            KernelControl::NoNewPrivileges => "no_new_privileges",
            KernelControl::SyscallFilter => "syscall_filter",
        }
    }
}

/// Which kernel controls a worker managed to apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainmentReport {
    pub applied: Vec<KernelControl>,
    pub missing: Vec<KernelControl>,
    pub notes: Vec<String>,
}

impl ContainmentReport {
    pub fn record(&mut self, control: KernelControl, ok: bool) {
        if ok {
            self.applied.push(control);
        } else {
            self.missing.push(control);
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Resource ceilings handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLimits {
    pub deadline_ms: u64,
    pub memory_limit_bytes: u64,
    pub max_output_bytes: usize,
    /// RLIMIT_CPU soft limit; the hard limit is one second above it
    pub cpu_seconds: u64,
    pub open_files: u64,
    pub strict_mode: bool,
}

impl WorkerLimits {
    pub const OPEN_FILES: u64 = 16;

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            deadline_ms: config.deadline_ms,
            memory_limit_bytes: config.memory_limit_bytes,
            max_output_bytes: config.max_output_bytes,
            cpu_seconds: config.deadline_ms.div_ceil(1000) + 1,
            open_files: Self::OPEN_FILES,
            strict_mode: config.strict_mode,
        }
    }
}

/// The fixed policy applied to every sandbox.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityPolicy {
    denied: &'static [Capability],
}

impl CapabilityPolicy {
    /// The one and only policy.
    pub const fn locked() -> Self {
        Self { denied: DENIED }
    }

    pub fn denied_capabilities(&self) -> &'static [Capability] {
        self.denied
    }

    pub fn is_denied(&self, capability: Capability) -> bool {
        self.denied.contains(&capability)
    }

    pub fn absent_globals(&self) -> &'static [&'static str] {
        ABSENT_HOST_GLOBALS
    }

    /// Controls that must be present for a strict-mode run to proceed.
    pub fn mandatory_controls(&self, strict_mode: bool) -> &'static [KernelControl] {
        if strict_mode {
            &KernelControl::ALL
        } else {
            &[KernelControl::ProcessGroup, KernelControl::EnvironmentCleared]
        }
    }
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::locked()
    }
}
