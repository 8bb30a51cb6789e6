//! Configuration and policy
//!
//! Service configuration loading and validation, plus the fixed capability policy.

pub mod loader;
pub mod policy;
pub mod types;
pub mod validator;
