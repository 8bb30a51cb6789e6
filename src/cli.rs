use crate::config::loader::ConfigOverrides;
use crate::config::types::ServiceConfig;
use crate::config::validator::{check_system_controls, validate_config};
use crate::core::context::WORKER_ROLE;
use crate::core::types::ExecutionOutcome;
use crate::exec::worker::run_worker;
use crate::service::SandboxService;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "snipbox", author, version, about, long_about = None)]
struct Cli {
    /// Internal role selector (hidden; used by the supervisor re-exec path)
    #[arg(long, hide = true)]
    internal_role: Option<String>,
    /// JSON configuration file
    #[arg(long, global = true, env = "SNIPBOX_CONFIG")]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(flatten)]
    overrides: OverrideArgs,
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Per-field overrides; flags win over `SNIPBOX_*` variables, which win over
/// the config file.
#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Wall-clock deadline per run in milliseconds
    #[arg(long, global = true, env = "SNIPBOX_DEADLINE_MS")]
    deadline_ms: Option<u64>,
    /// Upper bound on reaping a killed worker, in milliseconds
    #[arg(long, global = true, env = "SNIPBOX_TEARDOWN_GRACE_MS")]
    teardown_grace_ms: Option<u64>,
    /// Maximum snippet size in bytes
    #[arg(long, global = true, env = "SNIPBOX_MAX_CODE_BYTES")]
    max_code_bytes: Option<usize>,
    /// Maximum captured output in bytes
    #[arg(long, global = true, env = "SNIPBOX_MAX_OUTPUT_BYTES")]
    max_output_bytes: Option<usize>,
    /// Worker address space limit in bytes
    #[arg(long, global = true, env = "SNIPBOX_MEMORY_LIMIT_BYTES")]
    memory_limit_bytes: Option<u64>,
    /// Sandboxes allowed to run at once
    #[arg(long, global = true, env = "SNIPBOX_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,
    /// Executable re-launched as the worker
    #[arg(long, global = true, env = "SNIPBOX_WORKER_PROGRAM")]
    worker_program: Option<PathBuf>,
    /// Fail runs when a kernel control cannot be applied
    #[arg(long, global = true, env = "SNIPBOX_STRICT_MODE")]
    strict_mode: Option<bool>,
    /// HTTP listen address
    #[arg(long, global = true, env = "SNIPBOX_BIND")]
    bind: Option<String>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        ConfigOverrides {
            deadline_ms: args.deadline_ms,
            teardown_grace_ms: args.teardown_grace_ms,
            max_code_bytes: args.max_code_bytes,
            max_output_bytes: args.max_output_bytes,
            memory_limit_bytes: args.memory_limit_bytes,
            max_concurrent: args.max_concurrent,
            worker_program: args.worker_program,
            strict_mode: args.strict_mode,
            bind: args.bind,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve,
    /// Execute one snippet and print the outcome as JSON
    Run {
        /// Source code as a string
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
        /// Read source code from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Validate and print the effective configuration
    CheckConfig,
}

/// Entry point shared by the `snipbox` binary. Returns the exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();

    if let Some(role) = cli.internal_role.as_deref() {
        if role == WORKER_ROLE {
            // stderr is /dev/null for workers; stdout belongs to the protocol.
            return Ok(run_worker());
        }
        return Err(anyhow::anyhow!("unsupported internal role: {}", role));
    }

    init_logging(cli.verbose);

    let overrides = ConfigOverrides::from(cli.overrides);
    let config = ServiceConfig::load(cli.config.as_deref(), &overrides)
        .context("failed to load configuration")?;

    let command = cli.command.unwrap_or(Commands::Serve);
    match command {
        Commands::Serve => serve(config),
        Commands::Run { code, file } => run_once(config, code, file),
        Commands::CheckConfig => check_config(&config),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .try_init();
}

/// Refuse to start on errors; warnings are logged.
fn ensure_valid(config: &ServiceConfig) -> Result<()> {
    let report = validate_config(config).context("configuration rejected")?;
    for warning in &report.warnings {
        log::warn!("config: {}", warning);
    }
    for missing in check_system_controls() {
        log::warn!("host: {}", missing);
    }
    if !report.is_valid() {
        anyhow::bail!("invalid configuration:\n{}", report.errors.join("\n"));
    }
    Ok(())
}

fn serve(config: ServiceConfig) -> Result<i32> {
    ensure_valid(&config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("snipbox-http")
        .build()
        .context("failed to build async runtime")?;
    runtime
        .block_on(crate::server::serve(&config))
        .context("server failed")?;
    Ok(0)
}

fn run_once(config: ServiceConfig, code: Option<String>, file: Option<PathBuf>) -> Result<i32> {
    ensure_valid(&config)?;
    let raw = match (code, file) {
        (Some(code), _) => code.into_bytes(),
        (None, Some(path)) => std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => {
            let mut raw = Vec::new();
            std::io::stdin()
                .read_to_end(&mut raw)
                .context("failed to read code from stdin")?;
            raw
        }
    };

    let service = SandboxService::new(&config).context("failed to start sandbox service")?;
    let outcome = service
        .execute_bytes_blocking(&raw)
        .context("internal sandbox failure")?;
    println!("{}", outcome_json(&outcome));
    Ok(if outcome.is_completed() { 0 } else { 1 })
}

/// `{output}` or `{error, kind}`, the same shape the HTTP API returns.
fn outcome_json(outcome: &ExecutionOutcome) -> serde_json::Value {
    match outcome {
        ExecutionOutcome::Completed { output } => json!({ "output": output }),
        other => json!({
            "error": other.error_message().unwrap_or_default(),
            "kind": other.fault_kind().map(|k| k.as_str()).unwrap_or("runtime"),
        }),
    }
}

fn check_config(config: &ServiceConfig) -> Result<i32> {
    let report = validate_config(config).context("configuration rejected")?;
    let summary = json!({
        "config": config,
        "validation": report,
        "host_controls_missing": check_system_controls(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if report.is_valid() { 0 } else { 1 })
}
