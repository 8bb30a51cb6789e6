//! Supervisor <-> worker wire contract.
//!
//! One JSON document each way: the supervisor writes a [`WorkerRequest`] to the
//! worker's stdin and closes it, the worker answers with one [`WorkerReport`]
//! on stdout and exits 0.

use crate::config::policy::{ContainmentReport, WorkerLimits};
use crate::config::types::{Result, SandboxError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use uuid::Uuid;

/// Upper bound on a request document, on top of the snippet itself.
pub const REQUEST_ENVELOPE_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub request_id: Uuid,
    pub code: String,
    pub limits: WorkerLimits,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResult {
    Completed { output: String },
    Faulted { message: String },
    /// Containment could not be established; nothing was evaluated
    SetupFailed { message: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub result: WorkerResult,
    pub containment: ContainmentReport,
    pub eval_ms: u64,
}

/// Largest report a worker with these limits can legitimately produce.
/// JSON escaping of control characters can grow output sixfold.
pub fn report_limit(limits: &WorkerLimits) -> usize {
    limits
        .max_output_bytes
        .saturating_mul(6)
        .saturating_add(REQUEST_ENVELOPE_BYTES)
}

pub fn write_message<W: Write, T: Serialize>(mut writer: W, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| SandboxError::Protocol(format!("failed to encode message: {e}")))?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one message, refusing documents larger than `limit` bytes.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: R, limit: usize) -> Result<T> {
    let mut data = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut data)?;
    if data.len() > limit {
        return Err(SandboxError::Protocol(format!(
            "message exceeds {limit} bytes"
        )));
    }
    decode_message(&data)
}

pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data)
        .map_err(|e| SandboxError::Protocol(format!("failed to decode message: {e}")))
}
