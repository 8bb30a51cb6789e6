use crate::config::policy::ContainmentReport;
use crate::config::types::{Result, SandboxError};
/// Result capture
///
/// Turns whatever a supervised run produced into exactly one outcome. This is
/// a pure function over the run: the same exit, report and kill evidence
/// always classify the same way.
///
/// Order of precedence:
/// 1. supervisor kill on the deadline -> TimedOut, partial output dropped
/// 2. signal the supervisor did not send -> Faulted (resource limit)
/// 3. clean exit with a well-formed report -> Completed / Faulted
/// 4. anything else -> host fault
use crate::core::protocol::{decode_message, WorkerReport, WorkerResult};
use crate::core::supervisor::{SupervisedRun, WorkerExit};
use crate::core::types::ExecutionOutcome;
use crate::kernel::signal::signal_name;
use crate::utils::output::OutputIntegrity;
use serde::{Deserialize, Serialize};
use std::os::unix::process::ExitStatusExt;

/// Fault messages are cut to this many characters.
pub const MAX_FAULT_MESSAGE_CHARS: usize = 1024;

pub const RESOURCE_LIMIT_MESSAGE: &str = "execution aborted: resource limit exceeded";

/// Who or what ended the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictCause {
    /// Snippet ran to completion
    NormalExit,
    /// Snippet threw or hit an engine limit
    ScriptFault,
    /// Supervisor killed the worker on the deadline
    DeadlineKill,
    /// Kernel ended the worker (rlimit, address space exhaustion)
    KernelSignal { signal: String },
}

/// Classified run.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: ExecutionOutcome,
    pub cause: VerdictCause,
    pub containment: Option<ContainmentReport>,
    pub eval_ms: Option<u64>,
}

/// Verdict classifier - pure function over a supervised run.
pub struct VerdictClassifier;

impl VerdictClassifier {
    /// Classify a run. `Err` means the host failed, not the snippet.
    pub fn classify(run: &SupervisedRun) -> Result<Verdict> {
        match &run.exit {
            WorkerExit::TimedOut { .. } => Ok(Verdict {
                outcome: ExecutionOutcome::TimedOut {},
                cause: VerdictCause::DeadlineKill,
                containment: None,
                eval_ms: None,
            }),
            WorkerExit::Exited { status, report } => {
                if let Some(signal) = status.signal() {
                    log::warn!(
                        "worker {} ended by {} it was not sent by the supervisor",
                        run.worker_pid,
                        signal_name(signal)
                    );
                    return Ok(Self::kernel_signal(signal));
                }
                match status.code() {
                    Some(0) => {}
                    Some(code) => {
                        return Err(SandboxError::Protocol(format!(
                            "worker {} exited with code {}",
                            run.worker_pid, code
                        )))
                    }
                    None => {
                        return Err(SandboxError::Process(format!(
                            "worker {} ended without exit code or signal",
                            run.worker_pid
                        )))
                    }
                }
                if report.integrity != OutputIntegrity::Complete {
                    return Err(SandboxError::Protocol(format!(
                        "worker report {} ({} bytes kept)",
                        report.integrity,
                        report.bytes.len()
                    )));
                }
                let report: WorkerReport = decode_message(&report.bytes)?;
                Self::from_report(report)
            }
        }
    }

    fn kernel_signal(signal: i32) -> Verdict {
        Verdict {
            outcome: ExecutionOutcome::Faulted {
                message: RESOURCE_LIMIT_MESSAGE.to_string(),
            },
            cause: VerdictCause::KernelSignal {
                signal: signal_name(signal),
            },
            containment: None,
            eval_ms: None,
        }
    }

    fn from_report(report: WorkerReport) -> Result<Verdict> {
        let (outcome, cause) = match report.result {
            WorkerResult::Completed { output } => {
                (ExecutionOutcome::Completed { output }, VerdictCause::NormalExit)
            }
            WorkerResult::Faulted { message } => (
                ExecutionOutcome::Faulted {
                    message: truncate_message(&message),
                },
                VerdictCause::ScriptFault,
            ),
            WorkerResult::SetupFailed { message } => {
                return Err(SandboxError::Process(format!(
                    "worker containment failed: {}",
                    message
                )))
            }
        };
        Ok(Verdict {
            outcome,
            cause,
            containment: Some(report.containment),
            eval_ms: Some(report.eval_ms),
        })
    }
}

/// Cut a fault message to [`MAX_FAULT_MESSAGE_CHARS`] characters.
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_FAULT_MESSAGE_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}
