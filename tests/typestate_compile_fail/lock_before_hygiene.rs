/// This test should FAIL to compile
/// Attempting to drop privileges while inherited descriptors are still open

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
        .unwrap();

    // This should fail: lock_privileges() only exists on Worker<Hygienic>
    let _ = worker.lock_privileges();
}
