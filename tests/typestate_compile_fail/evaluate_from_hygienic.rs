/// This test should FAIL to compile
/// Attempting to evaluate with privileges still unlocked

use snipbox::config::policy::WorkerLimits;
use snipbox::config::types::ServiceConfig;
use snipbox::preexec::{Fresh, Worker};
use uuid::Uuid;

fn main() {
    let limits = WorkerLimits::from_config(&ServiceConfig::default());
    let worker = Worker::<Fresh>::new(Uuid::new_v4(), limits)
        .detach()
        .unwrap()
        .apply_limits()
        .unwrap()
        .apply_hygiene()
        .unwrap();

    // This should fail: lock_privileges() was skipped
    let _ = worker.evaluate("1 + 1".to_string());
}
