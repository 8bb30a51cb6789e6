/// This test should FAIL to compile
/// Attempting to reuse a state after it has been consumed

use snipbox::config::policy::WorkerLimits;
use snipbox::config::types::ServiceConfig;
use snipbox::preexec::{Fresh, Worker};
use uuid::Uuid;

fn main() {
    let limits = WorkerLimits::from_config(&ServiceConfig::default());
    let worker = Worker::<Fresh>::new(Uuid::new_v4(), limits);

    // First transition consumes worker
    let _detached = worker.detach().expect("detach failed");

    // This should fail: worker was moved and can no longer be used
    let _ = worker.detach();
}
