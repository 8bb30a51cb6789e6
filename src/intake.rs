//! Execution request intake
//!
//! Validates the shape and size of a snippet before anything is built for it.
//! Rejected input is returned as-is to the caller; it is never rewritten and
//! resubmitted.

use crate::config::types::ServiceConfig;
use crate::core::types::{ExecutionRequest, RejectReason};
use uuid::Uuid;

/// Gatekeeper in front of the sandbox pipeline.
#[derive(Clone, Copy, Debug)]
pub struct Intake {
    max_code_bytes: usize,
}

impl Intake {
    pub fn new(max_code_bytes: usize) -> Self {
        Self { max_code_bytes }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.max_code_bytes)
    }

    pub fn max_code_bytes(&self) -> usize {
        self.max_code_bytes
    }

    /// Decode raw bytes (a file or stdin) and validate them.
    pub fn accept_bytes(&self, raw: &[u8]) -> Result<ExecutionRequest, RejectReason> {
        let code = std::str::from_utf8(raw).map_err(|e| RejectReason::InvalidEncoding {
            offset: e.valid_up_to(),
        })?;
        self.accept(code)
    }

    pub fn accept(&self, code: &str) -> Result<ExecutionRequest, RejectReason> {
        self.accept_with_id(code, Uuid::new_v4())
    }

    /// Same as [`Intake::accept`] with a correlation id chosen by the caller.
    pub fn accept_with_id(
        &self,
        code: &str,
        request_id: Uuid,
    ) -> Result<ExecutionRequest, RejectReason> {
        if code.trim().is_empty() {
            return Err(RejectReason::Empty);
        }
        if code.len() > self.max_code_bytes {
            return Err(RejectReason::TooLarge {
                len: code.len(),
                max: self.max_code_bytes,
            });
        }
        if let Some(offset) = forbidden_character(code) {
            return Err(RejectReason::ForbiddenCharacter { offset });
        }
        Ok(ExecutionRequest::new(code.to_string(), request_id))
    }
}

/// Byte offset of the first NUL or C0 control other than tab, LF and CR.
fn forbidden_character(code: &str) -> Option<usize> {
    code.bytes()
        .position(|b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'))
}
