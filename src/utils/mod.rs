//! Utilities
//!
//! Process hygiene for workers and bounded collection of their output.

pub mod env_hygiene;
pub mod fd_closure;
pub mod output;
