//! snipbox: sandboxed execution of untrusted script snippets
//!
//! Every snippet runs in a freshly spawned worker process that is contained
//! by kernel controls and preempted by a wall-clock deadline. The embedded
//! engine itself exposes no host bindings.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimits`]: Address space, CPU, file size and descriptor ceilings
//! - [`kernel::capabilities`]: Capability dropping and `no_new_privs`
//! - [`kernel::seccomp`]: Syscall denylist for the evaluator thread
//! - [`kernel::signal`]: Process-group kills and parent-death signal
//!
//! ## Sandbox Core ([`core`](crate::core))
//! - [`core::types`](crate::core::types): Requests, outcomes and rejection reasons
//! - [`core::protocol`](crate::core::protocol): Length-bounded JSON between supervisor and worker
//! - [`core::context`](crate::core::context): One worker process bound to one request
//! - [`core::supervisor`](crate::core::supervisor): Deadline enforcement and reaping
//!
//! ## Execution Control ([`exec`])
//! - [`exec::preexec`]: Type-state enforced containment ordering
//! - [`exec::worker`]: The worker role entry point
//!
//! ## Snippet Language ([`script`])
//! JavaScript on a fresh V8 isolate per run, with the host globals removed.
//!
//! ## Result Capture ([`verdict`])
//! - [`verdict::verdict`]: Exit status and report to outcome
//!
//! ## Service Surface
//! - [`intake`]: Input validation
//! - [`service`]: Admission control and request orchestration
//! - [`server`]: HTTP API
//! - [`cli`]: Command-line entry point
//!
//! ## Observability ([`observability`]), Configuration ([`config`]), Utilities ([`utils`])
//!
//! # Design Principles
//!
//! 1. **One process per request** - Nothing survives between snippets
//! 2. **Kernel as backstop** - The engine denies, the kernel bounds
//! 3. **Types prevent errors** - Containment cannot be applied out of order
//! 4. **Deadline is absolute** - A stuck worker is killed, never waited on

// Kernel Primitives
pub mod kernel;

// Sandbox core
pub mod core;

// Execution Control
pub mod exec;

// Snippet language
pub mod script;

// Result capture
pub mod verdict;

// Observability
pub mod observability;

// Configuration & Policy
pub mod config;

// Utilities
pub mod utils;

// Service surface
pub mod intake;
pub mod server;
pub mod service;

// CLI entrypoint wiring for the snipbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use crate::config::types::{Result, SandboxError, ServiceConfig};
pub use crate::core::types::{ExecutionOutcome, FaultKind, RejectReason};
pub use crate::exec::preexec;
pub use crate::service::SandboxService;
