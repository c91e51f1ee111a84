//! `sterling-executor` — a thin CLI for driving the Step Executor standalone
//! (SPEC_FULL §12). Operator tooling only; not a game-client feature.
//!
//! Mirrors the teacher's `runner execute --file ... --output ...` shape: load input,
//! validate/build context, run, report — with `--silent`/`--verbose` flags controlling
//! the tracing level exactly as the teacher's CLI does.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use uuid::Uuid;

use sterling_executor::config::{self, ExecutorConfig};
use sterling_executor::loader;
use sterling_executor::loop_breaker::{LoopBreaker, LoopBreakerRuntimeMode};
use sterling_executor::recorder::GoldenRunRecorder;
use sterling_executor::signature;
use sterling_executor::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use sterling_executor::executor;

#[derive(Parser)]
#[command(name = "sterling-executor")]
#[command(about = "Step Executor operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads a Task and an in-memory ctx fixture from JSON, runs one guard-pipeline
    /// pass, and prints the resulting metadata patch and recorded decision.
    Tick {
        #[arg(long)]
        task: PathBuf,

        #[arg(long)]
        ctx_fixture: PathBuf,

        #[arg(long)]
        golden_dir: Option<PathBuf>,

        #[arg(long)]
        run_id: Option<String>,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value = "false")]
        otel: bool,

        #[arg(long)]
        otel_endpoint: Option<String>,

        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },

    /// Loads a Golden-Run artifact from disk and prints the reader-derived
    /// `loop_started`/`certifiable` fields (SPEC_FULL §4.3 invariants 1-2).
    ReplayRun {
        #[arg(long)]
        golden_dir: PathBuf,

        #[arg(long)]
        run_id: String,
    },

    /// Reads a failure tuple from stdin JSON and prints its computed signature id
    /// (SPEC_FULL §4.1).
    InspectSignature,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Tick {
            task,
            ctx_fixture,
            golden_dir,
            run_id,
            output,
            otel,
            otel_endpoint,
            silent,
            verbose,
        } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if *silent {
                Level::ERROR
            } else if *verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };

            if *otel {
                if let Some(endpoint) = otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }

            if let Err(e) = init_telemetry(telemetry_config) {
                if !*silent {
                    eprintln!("Warning: failed to initialize telemetry: {}", e);
                }
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            run_tick(task, ctx_fixture, golden_dir.clone(), run_id.clone(), output, *silent).await;

            shutdown_telemetry();
        }

        Commands::ReplayRun { golden_dir, run_id } => {
            let recorder = GoldenRunRecorder::new(golden_dir.clone());
            match recorder.get_report_from_disk(run_id) {
                Ok(report) => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "run_id": report.run_id,
                            "loop_started": report.loop_started(),
                            "certifiable": report.certifiable(),
                        })
                    );
                }
                Err(e) => {
                    eprintln!("failed to load golden run {}: {}", run_id, e);
                    std::process::exit(1);
                }
            }
        }

        Commands::InspectSignature => {
            let mut input = String::new();
            if let Err(e) = std::io::Read::read_to_string(&mut std::io::stdin(), &mut input) {
                eprintln!("failed to read stdin: {}", e);
                std::process::exit(1);
            }

            let tuple = match parse_failure_tuple(&input) {
                Ok(tuple) => tuple,
                Err(e) => {
                    eprintln!("failed to parse failure tuple: {}", e);
                    std::process::exit(1);
                }
            };

            let signature_id = signature::compute_signature_id(&tuple);
            println!("{}", serde_json::json!({ "signature_id": signature_id.as_str() }));
        }
    }
}

async fn run_tick(
    task_path: &PathBuf,
    ctx_fixture_path: &PathBuf,
    golden_dir: Option<PathBuf>,
    run_id: Option<String>,
    output_path: &Option<PathBuf>,
    silent: bool,
) {
    let mut task = match loader::load_task_from_file(task_path) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to load task");
            std::process::exit(1);
        }
    };

    let fixture = match loader::load_ctx_fixture_from_file(ctx_fixture_path) {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to load ctx fixture");
            std::process::exit(1);
        }
    };

    let Some(step) = task.next_pending_step().cloned() else {
        if !silent {
            info!(task_id = %task.id, "task has no pending steps");
        }
        println!("{}", serde_json::json!({ "outcome": "no_pending_steps" }));
        return;
    };

    let fake_ctx = loader::build_fake_context(fixture).await;
    let config = ExecutorConfig::from_env();
    let recorder_dir = golden_dir.unwrap_or_else(|| std::env::temp_dir().join("sterling-golden-runs"));
    let recorder = GoldenRunRecorder::new(recorder_dir);
    let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let loop_breaker_mode = match config.loop_breaker_mode {
        config::LoopBreakerMode::Active => LoopBreakerRuntimeMode::Active,
        config::LoopBreakerMode::Shadow => LoopBreakerRuntimeMode::Shadow,
    };
    let mut loop_breaker = LoopBreaker::new(loop_breaker_mode);

    if !silent {
        info!(task_id = %task.id, step_id = %step.id, "running one guard-pipeline tick");
    }

    let outcome = executor::execute_step(
        &mut task,
        &step,
        &fake_ctx,
        &config,
        &recorder,
        &mut loop_breaker,
        &run_id,
        chrono::Utc::now(),
    )
    .await;

    let _ = recorder.flush_run(&run_id).await;

    let report = serde_json::json!({
        "outcome": format!("{:?}", outcome),
        "task_metadata": task.metadata,
        "run_id": run_id,
    });

    if let Some(path) = output_path {
        if let Err(e) = std::fs::write(path, serde_json::to_string_pretty(&report).unwrap()) {
            eprintln!("failed to write report: {}", e);
        } else if !silent {
            println!("report saved to: {:?}", path);
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&report).unwrap());
    }
}

fn parse_failure_tuple(input: &str) -> anyhow::Result<signature::FailureTuple> {
    let value: serde_json::Value = serde_json::from_str(input)?;

    let category = value
        .get("category")
        .and_then(|v| v.as_str())
        .and_then(parse_failure_category);

    Ok(signature::FailureTuple {
        category,
        leaf: value.get("leaf").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        target_param: value.get("target_param").and_then(|v| v.as_str()).map(String::from),
        failure_code: value.get("failure_code").and_then(|v| v.as_str()).map(String::from),
        blocked_reason: value.get("blocked_reason").and_then(|v| v.as_str()).map(String::from),
        diag_reason_code: value.get("diag_reason_code").and_then(|v| v.as_str()).map(String::from),
    })
}

fn parse_failure_category(value: &str) -> Option<signature::FailureCategory> {
    use signature::FailureCategory::*;
    match value {
        "expansion_blocked" => Some(ExpansionBlocked),
        "executor_error" => Some(ExecutorError),
        "tool_failure" => Some(ToolFailure),
        "prereq_exhausted" => Some(PrereqExhausted),
        "task_terminal" => Some(TaskTerminal),
        "dedup_repeat" => Some(DedupRepeat),
        _ => None,
    }
}
