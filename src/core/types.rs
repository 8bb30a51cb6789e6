use crate::config::policy::ContainmentReport;
use crate::kernel::signal::KillDelivery;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One accepted snippet. Immutable once created; owned by the call handling it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub request_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

impl ExecutionRequest {
    pub(crate) fn new(code: String, request_id: Uuid) -> Self {
        Self {
            code,
            request_id,
            submitted_at: Utc::now(),
        }
    }
}

/// Why a snippet was refused before any sandbox existed.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("empty")]
    Empty,

    #[error("code too large: {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },

    #[error("forbidden character at byte offset {offset}")]
    ForbiddenCharacter { offset: usize },

    #[error("invalid UTF-8 at byte offset {offset}")]
    InvalidEncoding { offset: usize },

    #[error("busy")]
    Busy,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::TooLarge { .. } => "too_large",
            RejectReason::ForbiddenCharacter { .. } => "forbidden_character",
            RejectReason::InvalidEncoding { .. } => "invalid_encoding",
            RejectReason::Busy => "busy",
        }
    }
}

/// Error class reported to callers next to a failure message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Validation,
    Runtime,
    Timeout,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Validation => "validation",
            FaultKind::Runtime => "runtime",
            FaultKind::Timeout => "timeout",
        }
    }
}

pub const TIMED_OUT_MESSAGE: &str = "execution timed out";

/// Exactly one of these is produced per request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed { output: String },
    Faulted { message: String },
    TimedOut {},
    Rejected { reason: RejectReason },
}

impl ExecutionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed { .. } => "completed",
            ExecutionOutcome::Faulted { .. } => "faulted",
            ExecutionOutcome::TimedOut {} => "timed_out",
            ExecutionOutcome::Rejected { .. } => "rejected",
        }
    }

    /// `None` for a completed run.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            ExecutionOutcome::Completed { .. } => None,
            ExecutionOutcome::Faulted { .. } => Some(FaultKind::Runtime),
            ExecutionOutcome::TimedOut {} => Some(FaultKind::Timeout),
            ExecutionOutcome::Rejected { .. } => Some(FaultKind::Validation),
        }
    }

    /// Text shown to the caller for a failure.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ExecutionOutcome::Completed { .. } => None,
            ExecutionOutcome::Faulted { message } => Some(message.clone()),
            ExecutionOutcome::TimedOut {} => Some(TIMED_OUT_MESSAGE.to_string()),
            ExecutionOutcome::Rejected { reason } => Some(reason.to_string()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { .. })
    }
}

/// What the supervisor did to end a worker that overran its deadline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KillReport {
    pub delivered: bool,
    pub reaped: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

impl KillReport {
    pub(crate) fn new(delivery: KillDelivery) -> Self {
        Self {
            delivered: delivery == KillDelivery::Delivered,
            reaped: false,
            waited_ms: 0,
            notes: Vec::new(),
        }
    }
}

/// Host-side record of one supervised run, kept for audit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunEvidence {
    pub request_id: Uuid,
    pub worker_pid: i32,
    pub wall_ms: u64,
    pub eval_ms: Option<u64>,
    pub containment: Option<ContainmentReport>,
    pub kill: Option<KillReport>,
}
