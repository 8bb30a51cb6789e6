//! Sandbox context: one worker process for one request.
//!
//! The context exclusively owns the child handle. Every exit path releases
//! it: a finished worker is reaped by the supervisor, and dropping a context
//! whose worker is still alive kills its process group and reaps it, handing
//! it to a background reaper if that does not finish in time.

use crate::config::policy::WorkerLimits;
use crate::config::types::{Result, SandboxError, ServiceConfig};
use crate::core::protocol::{report_limit, write_message, WorkerRequest};
use crate::core::types::ExecutionRequest;
use crate::kernel::signal::{kill_process_group, KillDelivery};
use crate::observability::{audit, metrics};
use crate::utils::output::{Collected, OutputCollector};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Hidden role flag that turns the binary into a worker.
pub const WORKER_ROLE_FLAG: &str = "--internal-role";
pub const WORKER_ROLE: &str = "worker";

/// How long the drop backstop waits before handing off to the reaper.
const DROP_REAP_WAIT: Duration = Duration::from_millis(50);

fn to_spawn_error(prefix: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Spawn(format!("{prefix}: {err}"))
}

/// Everything needed to start workers, resolved once at startup.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub limits: WorkerLimits,
}

impl LaunchSpec {
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        Ok(Self {
            program: config.resolve_worker_program()?,
            limits: WorkerLimits::from_config(config),
        })
    }
}

/// A live worker bound to exactly one request.
pub struct SandboxContext {
    request_id: Uuid,
    child: Option<Child>,
    pid: i32,
    collector: Option<OutputCollector>,
    started: Instant,
}

impl SandboxContext {
    /// Spawn a worker, hand it the request and start collecting its report.
    ///
    /// The worker gets an empty environment, `/` as working directory,
    /// stderr on /dev/null and its own process group.
    pub fn launch(spec: &LaunchSpec, request: &ExecutionRequest) -> Result<Self> {
        let started = Instant::now();
        let mut command = Command::new(&spec.program);
        command
            .arg(WORKER_ROLE_FLAG)
            .arg(WORKER_ROLE)
            .env_clear()
            .current_dir("/")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| to_spawn_error(&format!("spawn {}", spec.program.display()), e))?;
        let pid = child.id() as i32;

        let mut context = Self {
            request_id: request.request_id,
            child: None,
            pid,
            collector: None,
            started,
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        // From here on the drop backstop owns cleanup.
        context.child = Some(child);

        let stdout = stdout.ok_or_else(|| to_spawn_error("worker stdout", "not captured"))?;
        context.collector = Some(
            OutputCollector::spawn(stdout, report_limit(&spec.limits))
                .map_err(|e| to_spawn_error("report collector", e))?,
        );

        let stdin = stdin.ok_or_else(|| to_spawn_error("worker stdin", "not captured"))?;
        let message = WorkerRequest {
            request_id: request.request_id,
            code: request.code.clone(),
            limits: spec.limits,
        };
        // Dropping stdin closes it, which is the worker's end-of-request.
        write_message(stdin, &message)?;

        log::debug!(
            "worker {} started for request {} in {:?}",
            pid,
            request.request_id,
            started.elapsed()
        );
        Ok(context)
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Worker pid, which is also its process group id.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Non-blocking reap. `Some` means the worker is gone and reaped.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let Some(child) = self.child.as_mut() else {
            return Err(SandboxError::Process("worker already released".to_string()));
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Ok(Some(status))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(SandboxError::Process(format!("wait(worker {}): {}", self.pid, e))),
        }
    }

    /// SIGKILL the worker's whole process group.
    pub fn kill(&self) -> Result<KillDelivery> {
        kill_process_group(self.pid)
    }

    /// Poll for the reap until `grace` runs out.
    pub fn wait_reaped(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep((deadline - now).min(Duration::from_millis(2)));
        }
    }

    /// Wait for the report stream to close. `None` if it stays open past
    /// `timeout` or was already taken.
    pub fn collect_report(&mut self, timeout: Duration) -> Option<Collected> {
        self.collector.take()?.finish(timeout)
    }

    /// Throw away whatever the worker wrote.
    pub fn discard_output(&mut self) {
        self.collector = None;
    }
}

impl Drop for SandboxContext {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = kill_process_group(self.pid) {
            log::warn!("drop: failed to kill worker group {}: {}", self.pid, e);
        }
        let deadline = Instant::now() + DROP_REAP_WAIT;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(1));
                }
                _ => break,
            }
        }
        hand_to_reaper(self.request_id, child);
    }
}

fn hand_to_reaper(request_id: Uuid, mut child: Child) {
    let pid = child.id();
    metrics::get_metrics().cleanup_failures.inc();
    audit::cleanup_failure(
        request_id,
        format!("worker {} not reaped in time; handed to background reaper", pid),
    );
    let spawned = thread::Builder::new()
        .name("snipbox-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => log::info!("background reaper collected worker {}: {}", pid, status),
            Err(e) => log::error!("background reaper failed on worker {}: {}", pid, e),
        });
    if let Err(e) = spawned {
        log::error!("could not start reaper for worker {}: {}", pid, e);
    }
}
