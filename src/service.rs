//! Sandbox service
//!
//! Ties intake, admission, supervision and classification together. One call
//! to [`SandboxService::execute`] produces exactly one outcome, or a
//! [`SandboxError`] when the host itself failed.

use crate::config::types::{Result, SandboxError, ServiceConfig};
use crate::core::supervisor::{SupervisedRun, Supervisor, WorkerExit};
use crate::core::types::{ExecutionOutcome, ExecutionRequest, RejectReason, RunEvidence};
use crate::intake::Intake;
use crate::observability::{audit, metrics};
use crate::verdict::verdict::{Verdict, VerdictCause, VerdictClassifier};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Clone)]
pub struct SandboxService {
    intake: Intake,
    supervisor: Arc<Supervisor>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl SandboxService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        if config.max_concurrent == 0 {
            return Err(SandboxError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            intake: Intake::from_config(config),
            supervisor: Arc::new(Supervisor::from_config(config)?),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
        })
    }

    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Sandboxes currently running.
    pub fn active(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub async fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
        self.execute_with_id(Uuid::new_v4(), code).await
    }

    /// Validate, admit and run `code` on a blocking thread.
    ///
    /// The permit travels with the blocking task, so it is released only
    /// after the worker has been reaped even if the caller goes away.
    pub async fn execute_with_id(&self, request_id: Uuid, code: &str) -> Result<ExecutionOutcome> {
        let request = match self.intake.accept_with_id(code, request_id) {
            Ok(request) => request,
            Err(reason) => return Ok(reject(request_id, reason)),
        };

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                metrics::get_metrics().rejected_busy.inc();
                log::warn!(
                    "request {} refused: all {} sandboxes busy",
                    request_id,
                    self.max_concurrent
                );
                return Ok(reject(request_id, RejectReason::Busy));
            }
        };

        let supervisor = Arc::clone(&self.supervisor);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_request(&supervisor, &request)
        });
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                let err = SandboxError::Process(format!("execution task failed: {}", e));
                record_host_fault(request_id, &err);
                Err(err)
            }
        }
    }

    /// Synchronous path for the CLI: no admission control, raw bytes in.
    pub fn execute_bytes_blocking(&self, raw: &[u8]) -> Result<ExecutionOutcome> {
        match self.intake.accept_bytes(raw) {
            Ok(request) => run_request(&self.supervisor, &request),
            Err(reason) => Ok(reject(Uuid::new_v4(), reason)),
        }
    }
}

fn reject(request_id: Uuid, reason: RejectReason) -> ExecutionOutcome {
    audit::input_rejected(request_id, &reason);
    let outcome = ExecutionOutcome::Rejected { reason };
    metrics::get_metrics().record_outcome(&outcome);
    outcome
}

fn record_host_fault(request_id: Uuid, err: &SandboxError) {
    log::error!("request {} failed on the host: {}", request_id, err);
    audit::host_fault(request_id, err);
    metrics::get_metrics().record_host_fault();
}

/// Supervise and classify one accepted request.
pub fn run_request(supervisor: &Supervisor, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
    let metrics = metrics::get_metrics();
    let started = Instant::now();
    audit::execution_start(request.request_id, request.code.len());

    metrics.active_sandboxes.inc();
    let classified = supervisor.supervise(request).and_then(|run| {
        let verdict = VerdictClassifier::classify(&run)?;
        Ok((evidence(request, &run, &verdict), verdict))
    });
    metrics.active_sandboxes.dec();
    metrics.execution_duration.observe(started.elapsed());

    let (evidence, verdict) = match classified {
        Ok(classified) => classified,
        Err(err) => {
            record_host_fault(request.request_id, &err);
            return Err(err);
        }
    };

    if let Some(containment) = verdict.containment.as_ref().filter(|c| c.is_degraded()) {
        metrics.control_degraded.inc();
        audit::control_degraded(request.request_id, containment);
    }
    if let VerdictCause::KernelSignal { signal } = &verdict.cause {
        metrics.resource_aborts.inc();
        log::warn!("request {} aborted by {}", request.request_id, signal);
    }
    if let ExecutionOutcome::Faulted { message } = &verdict.outcome {
        if let Some(global) = audit::denied_global(message) {
            metrics.capability_denials.inc();
            audit::capability_denied(request.request_id, global);
        }
    }

    metrics.record_outcome(&verdict.outcome);
    audit::execution_end(verdict.outcome.label(), &evidence);
    Ok(verdict.outcome)
}

fn evidence(request: &ExecutionRequest, run: &SupervisedRun, verdict: &Verdict) -> RunEvidence {
    RunEvidence {
        request_id: request.request_id,
        worker_pid: run.worker_pid,
        wall_ms: run.wall.as_millis() as u64,
        eval_ms: verdict.eval_ms,
        containment: verdict.containment.clone(),
        kill: match &run.exit {
            WorkerExit::TimedOut { kill } => Some(kill.clone()),
            WorkerExit::Exited { .. } => None,
        },
    }
}
