/// This test should FAIL to compile
/// Attempting to evaluate a snippet before any containment was applied

use snipbox::config::policy::WorkerLimits;
use snipbox::config::types::ServiceConfig;
use snipbox::preexec::{Fresh, Worker};
use uuid::Uuid;

fn main() {
    let limits = WorkerLimits::from_config(&ServiceConfig::default());
    let worker = Worker::<Fresh>::new(Uuid::new_v4(), limits);

    // This should fail: evaluate() only exists on Worker<Locked>
    let _ = worker.evaluate("1 + 1".to_string());
}
