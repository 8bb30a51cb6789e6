//! Worker side of the protocol.
//!
//! Runs in the re-executed binary: read one request from stdin, walk the
//! containment chain, evaluate, write one report to stdout. Nothing else is
//! ever written to stdout.

use crate::config::types::Result;
use crate::core::protocol::{
    read_message, write_message, WorkerReport, WorkerRequest, WorkerResult,
};
use crate::exec::preexec::{Evaluation, Fresh, Worker};
use crate::script::ScriptOutcome;
use std::io;

/// Ceiling on the request document a worker will read.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024;

/// Exit code when no report could be written at all.
pub const EXIT_PROTOCOL_FAILURE: i32 = 2;

/// Entry point for `--internal-role worker`. Returns the process exit code.
pub fn run_worker() -> i32 {
    let request: WorkerRequest = match read_message(io::stdin().lock(), MAX_REQUEST_BYTES) {
        Ok(request) => request,
        Err(e) => {
            log::error!("worker could not read its request: {}", e);
            return EXIT_PROTOCOL_FAILURE;
        }
    };

    let report = contain_and_evaluate(request);
    match write_message(io::stdout().lock(), &report) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("worker could not write its report: {}", e);
            EXIT_PROTOCOL_FAILURE
        }
    }
}

/// Walk the containment chain and evaluate; setup failures become a report.
pub fn contain_and_evaluate(request: WorkerRequest) -> WorkerReport {
    let WorkerRequest {
        request_id,
        code,
        limits,
    } = request;

    let worker = Worker::<Fresh>::new(request_id, limits);
    match run_chain(worker, code) {
        Ok(evaluation) => WorkerReport {
            result: match evaluation.outcome {
                ScriptOutcome::Completed(output) => WorkerResult::Completed { output },
                ScriptOutcome::Faulted(message) => WorkerResult::Faulted { message },
            },
            containment: evaluation.containment,
            eval_ms: evaluation.eval_ms,
        },
        Err(e) => WorkerReport {
            result: WorkerResult::SetupFailed {
                message: e.to_string(),
            },
            containment: Default::default(),
            eval_ms: 0,
        },
    }
}

fn run_chain(worker: Worker<Fresh>, code: String) -> Result<Evaluation> {
    worker
        .detach()?
        .apply_limits()?
        .apply_hygiene()?
        .lock_privileges()?
        .evaluate(code)
}
