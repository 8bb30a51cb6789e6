/// This test should FAIL to compile
/// Attempting to clean the environment before resource limits are in place

use snipbox::config::policy::WorkerLimits;
use snipbox::config::types::ServiceConfig;
use snipbox::preexec::{Fresh, Worker};
use uuid::Uuid;

fn main() {
    let limits = WorkerLimits::from_config(&ServiceConfig::default());
    let worker = Worker::<Fresh>::new(Uuid::new_v4(), limits).detach().unwrap();

    // This should fail: apply_hygiene() only exists on Worker<Limited>
    let _ = worker.apply_hygiene();
}
