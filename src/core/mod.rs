//! Language-agnostic sandbox core.
//!
//! Core owns the worker process model: request types, the supervisor/worker
//! wire protocol, the per-request sandbox context and deadline supervision.
//! What a snippet means lives in [`crate::script`].

pub mod context;
pub mod protocol;
pub mod supervisor;
pub mod types;
