//! Thin wrappers around Linux kernel primitives used to contain a worker.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: signal -> rlimits -> capabilities -> seccomp

pub mod capabilities;
pub mod rlimits;
pub mod seccomp;
pub mod signal;
