//! Result capture
//!
//! Classifies supervised runs into outcomes as pure functions over the
//! worker's exit status and report.

pub mod verdict;
