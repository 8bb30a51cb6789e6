use crate::config::types::{Result, SandboxError, ServiceConfig};
/// Timeout supervisor
///
/// Races a worker against a wall-clock deadline:
///
/// Running -> Completed | Faulted   worker exited on its own
/// Running -> TimedOut              deadline hit, group SIGKILLed and reaped
///
/// The worker never has to cooperate. A worker that cannot be reaped within
/// the teardown grace is a host fault and goes to the background reaper.
use crate::core::context::{LaunchSpec, SandboxContext};
use crate::core::types::{ExecutionRequest, KillReport};
use crate::kernel::signal::KillDelivery;
use crate::observability::{audit, metrics};
use crate::utils::output::Collected;
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

const POLL_MIN: Duration = Duration::from_millis(1);
const POLL_MAX: Duration = Duration::from_millis(10);

/// Supervisor-side state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Exited by itself; the report decides Completed or Faulted
    Exited,
    TimedOut,
}

/// How a supervised worker ended, before classification.
#[derive(Debug)]
pub enum WorkerExit {
    Exited {
        status: ExitStatus,
        report: Collected,
    },
    TimedOut {
        kill: KillReport,
    },
}

#[derive(Debug)]
pub struct SupervisedRun {
    pub exit: WorkerExit,
    pub worker_pid: i32,
    pub wall: Duration,
}

/// Process-wide supervisor; read-only after startup.
#[derive(Clone, Debug)]
pub struct Supervisor {
    spec: LaunchSpec,
    deadline: Duration,
    teardown_grace: Duration,
}

impl Supervisor {
    pub fn new(spec: LaunchSpec, deadline: Duration, teardown_grace: Duration) -> Self {
        Self {
            spec,
            deadline,
            teardown_grace,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Ok(Self::new(
            LaunchSpec::from_config(config)?,
            config.deadline(),
            config.teardown_grace(),
        ))
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn teardown_grace(&self) -> Duration {
        self.teardown_grace
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Run one request in a fresh worker and wait for it, at most until the
    /// deadline plus the teardown grace.
    pub fn supervise(&self, request: &ExecutionRequest) -> Result<SupervisedRun> {
        let mut context = SandboxContext::launch(&self.spec, request)?;
        let worker_pid = context.pid();
        metrics::get_metrics()
            .worker_start_latency
            .observe(context.elapsed());
        let mut state = RunState::Running;
        let mut poll = POLL_MIN;

        while state == RunState::Running {
            if let Some(status) = context.try_wait()? {
                let report = context.collect_report(self.teardown_grace).ok_or_else(|| {
                    SandboxError::Protocol(format!(
                        "worker {} exited but its stdout stayed open",
                        worker_pid
                    ))
                })?;
                log::debug!(
                    "worker {} exited with {} after {:?}",
                    worker_pid,
                    status,
                    context.elapsed()
                );
                return Ok(SupervisedRun {
                    exit: WorkerExit::Exited { status, report },
                    worker_pid,
                    wall: context.elapsed(),
                });
            }

            let elapsed = context.elapsed();
            if elapsed >= self.deadline {
                state = RunState::TimedOut;
            } else {
                thread::sleep(poll.min(self.deadline - elapsed));
                poll = (poll * 2).min(POLL_MAX);
            }
        }

        let kill = self.terminate(&mut context)?;
        let wall = context.elapsed();
        metrics::get_metrics().forced_kills.inc();
        audit::forced_kill(
            request.request_id,
            format!(
                "deadline {} ms exceeded; worker {} killed and reaped in {} ms",
                self.deadline.as_millis(),
                worker_pid,
                kill.waited_ms
            ),
        );
        Ok(SupervisedRun {
            exit: WorkerExit::TimedOut { kill },
            worker_pid,
            wall,
        })
    }

    /// SIGKILL the worker group and wait for the reap within the grace.
    fn terminate(&self, context: &mut SandboxContext) -> Result<KillReport> {
        let started = Instant::now();
        context.discard_output();

        let delivery = match context.kill() {
            Ok(delivery) => delivery,
            Err(e) => {
                log::error!("failed to kill worker group {}: {}", context.pid(), e);
                KillDelivery::AlreadyGone
            }
        };
        let mut report = KillReport::new(delivery);
        if delivery == KillDelivery::AlreadyGone {
            report.notes.push("process group already gone".to_string());
        }

        let reaped = context.wait_reaped(self.teardown_grace)?;
        report.waited_ms = started.elapsed().as_millis() as u64;
        match reaped {
            Some(status) => {
                report.reaped = true;
                log::debug!("worker {} reaped after kill: {}", context.pid(), status);
                Ok(report)
            }
            None => Err(SandboxError::Teardown(format!(
                "worker {} not reaped within {} ms of SIGKILL",
                context.pid(),
                self.teardown_grace.as_millis()
            ))),
        }
    }
}
