use crate::config::policy::{CapabilityPolicy, ContainmentReport, KernelControl, WorkerLimits};
use crate::config::types::{Result, SandboxError};
/// Worker containment ordering
///
/// A worker applies its containment in a fixed order before it evaluates
/// anything:
/// 1. own process group and parent-death signal
/// 2. rlimits (address space, CPU, descriptors, file size, core, memlock)
/// 3. descriptor closure, umask, working directory, environment check
/// 4. capability drop and `PR_SET_NO_NEW_PRIVS`
/// 5. evaluator thread builds its isolate, installs the syscall filter on
///    itself, then runs the snippet
///
/// The order is a type-state chain: each step consumes the previous state and
/// only `Worker<Locked>` can evaluate.
use crate::kernel::{capabilities, rlimits, seccomp, signal};
use crate::script::{ScriptEngine, ScriptLimits, ScriptOutcome, EVAL_STACK_BYTES};
use crate::utils::env_hygiene::{self, HygienePolicy};
use crate::utils::fd_closure::{close_inherited_fds, FdClosure};
use nix::unistd::{getpgrp, getpid, setpgid, Pid};
use std::marker::PhantomData;
use std::thread;
use std::time::Instant;
use uuid::Uuid;

/// Reported when the evaluator thread dies without producing an outcome.
pub const EVALUATOR_PANIC_MESSAGE: &str = "execution aborted: internal engine error";

/// Type-state marker: nothing applied yet
pub struct Fresh;

/// Type-state marker: own process group, dies with the parent
pub struct Detached;

/// Type-state marker: rlimits in force
pub struct Limited;

/// Type-state marker: descriptors closed, environment verified
pub struct Hygienic;

/// Type-state marker: capabilities dropped, no_new_privs set
pub struct Locked;

/// Worker process with type-state tracking of its containment.
pub struct Worker<S> {
    pub request_id: Uuid,
    pub limits: WorkerLimits,
    report: ContainmentReport,
    _state: PhantomData<S>,
}

/// What a locked worker produced.
#[derive(Debug)]
pub struct Evaluation {
    pub outcome: ScriptOutcome,
    pub containment: ContainmentReport,
    pub eval_ms: u64,
}

impl<S> Worker<S> {
    pub fn strict_mode(&self) -> bool {
        self.limits.strict_mode
    }

    pub fn containment(&self) -> &ContainmentReport {
        &self.report
    }

    fn advance<T>(self) -> Worker<T> {
        Worker {
            request_id: self.request_id,
            limits: self.limits,
            report: self.report,
            _state: PhantomData,
        }
    }

    /// Record a control. Strict mode turns a failure into an error; permissive
    /// mode notes it and carries on.
    fn settle(&mut self, control: KernelControl, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.report.record(control, true);
                Ok(())
            }
            Err(e) if self.limits.strict_mode => {
                log::error!("{} failed: {}", control.as_str(), e);
                Err(e)
            }
            Err(e) => {
                log::warn!("{} failed in permissive mode: {}", control.as_str(), e);
                self.report.record(control, false);
                self.report.note(format!("{}: {}", control.as_str(), e));
                Ok(())
            }
        }
    }
}

impl Worker<Fresh> {
    pub fn new(request_id: Uuid, limits: WorkerLimits) -> Self {
        Self {
            request_id,
            limits,
            report: ContainmentReport::default(),
            _state: PhantomData,
        }
    }

    /// Transition to Detached: own process group plus parent-death signal.
    pub fn detach(mut self) -> Result<Worker<Detached>> {
        // The supervisor spawns workers as group leaders; only fix it up if not.
        let grouped = if getpgrp() == getpid() {
            Ok(())
        } else {
            setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|e| SandboxError::Process(format!("setpgid failed: {e}")))
        };
        self.settle(KernelControl::ProcessGroup, grouped)?;

        let pdeath = signal::set_parent_death_signal();
        self.settle(KernelControl::ParentDeathSignal, pdeath)?;

        Ok(self.advance())
    }
}

impl Worker<Detached> {
    /// Transition to Limited: every rlimit in force.
    pub fn apply_limits(mut self) -> Result<Worker<Limited>> {
        let applied = rlimits::apply_worker_rlimits(&self.limits);
        self.settle(KernelControl::ResourceLimits, applied)?;
        Ok(self.advance())
    }
}

impl Worker<Limited> {
    /// Transition to Hygienic: close inherited descriptors, set umask and
    /// working directory, scrub anything left in the environment.
    pub fn apply_hygiene(mut self) -> Result<Worker<Hygienic>> {
        let closed = close_inherited_fds(self.limits.strict_mode).map(|how| {
            if let FdClosure::ProcScan { closed } = how {
                log::debug!("closed {} inherited descriptor(s) via /proc", closed);
            }
        });
        self.settle(KernelControl::FdClosure, closed)?;

        let policy = HygienePolicy {
            strict_mode: self.limits.strict_mode,
            ..HygienePolicy::default()
        };
        let cleared = env_hygiene::apply(&policy).and_then(|report| {
            if !report.leaked_vars.is_empty() {
                self.report.note(format!(
                    "removed {} inherited environment variable(s)",
                    report.leaked_vars.len()
                ));
            }
            if report.environment_cleared {
                Ok(())
            } else {
                Err(SandboxError::Process(
                    "environment still populated after scrub".to_string(),
                ))
            }
        });
        self.settle(KernelControl::EnvironmentCleared, cleared)?;

        Ok(self.advance())
    }
}

impl Worker<Hygienic> {
    /// Transition to Locked: no capabilities, no privilege gain on exec.
    pub fn lock_privileges(mut self) -> Result<Worker<Locked>> {
        let dropped = capabilities::drop_all_capabilities().and_then(|drop| {
            if !drop.bounding_cleared {
                self.report
                    .note("bounding set not cleared (no CAP_SETPCAP); exec is filtered");
            }
            if drop.process_sets_zeroed {
                Ok(())
            } else {
                Err(SandboxError::Privilege(
                    "capability sets not zeroed".to_string(),
                ))
            }
        });
        self.settle(KernelControl::CapabilitiesDropped, dropped)?;

        let nnp = capabilities::set_no_new_privs()
            .and_then(|()| capabilities::check_no_new_privs())
            .and_then(|set| {
                if set {
                    Ok(())
                } else {
                    Err(SandboxError::Privilege(
                        "PR_SET_NO_NEW_PRIVS verification failed".to_string(),
                    ))
                }
            });
        self.settle(KernelControl::NoNewPrivileges, nnp)?;

        log::debug!(
            "worker {} locked: applied={:?} missing={:?}",
            self.request_id,
            self.report.applied,
            self.report.missing
        );
        Ok(self.advance())
    }
}

impl Worker<Locked> {
    /// Fail if a control the policy requires for this mode is missing.
    /// The syscall filter is checked on the evaluator thread instead.
    fn ensure_mandatory(&self) -> Result<()> {
        let policy = CapabilityPolicy::locked();
        let missing: Vec<&str> = policy
            .mandatory_controls(self.limits.strict_mode)
            .iter()
            .filter(|control| **control != KernelControl::SyscallFilter)
            .filter(|control| !self.report.applied.contains(control))
            .map(|control| control.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::Privilege(format!(
                "mandatory controls missing: {}",
                missing.join(", ")
            )))
        }
    }

    /// Evaluate the snippet on a fresh thread. The thread builds its isolate
    /// while it may still map memory freely, installs the syscall filter on
    /// itself, and only then runs the snippet. This is the only way to run code.
    pub fn evaluate(mut self, code: String) -> Result<Evaluation> {
        self.ensure_mandatory()?;

        let strict = self.limits.strict_mode;
        let script_limits = ScriptLimits::for_memory_limit(
            self.limits.max_output_bytes,
            self.limits.memory_limit_bytes,
        );
        let handle = thread::Builder::new()
            .name("snipbox-eval".to_string())
            .stack_size(EVAL_STACK_BYTES)
            .spawn(move || {
                let started = Instant::now();
                let engine = ScriptEngine::new(&script_limits);
                let filtered = seccomp::install_denylist();
                if strict && filtered.is_err() {
                    return (filtered, None);
                }
                let outcome = engine.run(&code);
                (filtered, Some((outcome, started.elapsed())))
            })
            .map_err(|e| SandboxError::Process(format!("failed to spawn evaluator: {e}")))?;

        let (filtered, evaluated) = match handle.join() {
            Ok(joined) => joined,
            Err(_) => {
                log::error!("evaluator thread panicked");
                return Ok(Evaluation {
                    outcome: ScriptOutcome::Faulted(EVALUATOR_PANIC_MESSAGE.to_string()),
                    containment: self.report,
                    eval_ms: 0,
                });
            }
        };
        self.settle(KernelControl::SyscallFilter, filtered)?;

        let (outcome, elapsed) = evaluated.ok_or_else(|| {
            SandboxError::Seccomp("evaluation skipped without a syscall filter".to_string())
        })?;
        Ok(Evaluation {
            outcome,
            containment: self.report,
            eval_ms: elapsed.as_millis() as u64,
        })
    }
}
