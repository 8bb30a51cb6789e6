// Cold-start benchmark for per-request workers
// Measures supervised latency from request acceptance to classified outcome,
// which is dominated by spawning and containing a fresh worker process.
// Target: p50 < 50ms, p95 < 100ms for trivial snippets

use snipbox::config::types::ServiceConfig;
use snipbox::core::types::ExecutionOutcome;
use snipbox::service::SandboxService;
use std::time::{Duration, Instant};

/// Benchmark configuration
const ITERATIONS: usize = 100;
const WARMUP_ITERATIONS: usize = 10;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();
        let at = |q: f64| samples[((len as f64 * q) as usize).min(len - 1)];
        let sum: Duration = samples.iter().sum();

        Self {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            min: samples[0],
            max: samples[len - 1],
            mean: sum / len as u32,
        }
    }

    fn print(&self) {
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

struct Scenario {
    name: &'static str,
    code: &'static str,
    p50_budget: Duration,
    p95_budget: Duration,
}

fn run_scenario(service: &SandboxService, scenario: &Scenario) -> bool {
    for _ in 0..WARMUP_ITERATIONS {
        let _ = service.execute_bytes_blocking(scenario.code.as_bytes());
    }

    let mut samples = Vec::with_capacity(ITERATIONS);
    let mut failures = 0;
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        let outcome = service.execute_bytes_blocking(scenario.code.as_bytes());
        samples.push(start.elapsed());
        if !matches!(outcome, Ok(ExecutionOutcome::Completed { .. })) {
            failures += 1;
        }
    }

    let stats = LatencyStats::from_samples(samples);
    println!("\n=== {} ===", scenario.name);
    stats.print();

    let passed =
        failures == 0 && stats.p50 < scenario.p50_budget && stats.p95 < scenario.p95_budget;
    if passed {
        println!("PASS");
    } else {
        println!(
            "FAIL: {} failed runs, p50={:?} (target <{:?}), p95={:?} (target <{:?})",
            failures, stats.p50, scenario.p50_budget, stats.p95, scenario.p95_budget
        );
    }
    passed
}

fn main() {
    let config = ServiceConfig {
        worker_program: Some(env!("CARGO_BIN_EXE_snipbox").into()),
        ..Default::default()
    };
    let service = match SandboxService::new(&config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("cannot start sandbox service: {}", e);
            std::process::exit(2);
        }
    };

    let scenarios = [
        Scenario {
            name: "Arithmetic",
            code: "1 + 1",
            p50_budget: Duration::from_millis(50),
            p95_budget: Duration::from_millis(100),
        },
        Scenario {
            name: "Console and collections",
            code: "const xs = Array.from({ length: 1000 }, (_, i) => i); \
                   console.log(xs.filter(x => x % 7 === 0).length); \
                   JSON.stringify(xs.slice(0, 5))",
            p50_budget: Duration::from_millis(60),
            p95_budget: Duration::from_millis(120),
        },
    ];

    println!("snipbox cold-start benchmark ({} iterations)", ITERATIONS);
    let all_passed = scenarios
        .iter()
        .map(|scenario| run_scenario(&service, scenario))
        .fold(true, |acc, passed| acc && passed);

    if !all_passed {
        std::process::exit(1);
    }
}
