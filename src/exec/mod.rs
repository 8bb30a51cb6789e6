//! Execution control
//!
//! Worker-side containment with type-state enforced ordering.

pub mod preexec;
pub mod worker;
