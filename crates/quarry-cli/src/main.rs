//! CLI binary for validating query results against expectation suites.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quarry_expect::ExpectationSuite;
use quarry_pipeline::{
    default_registry, init_run_context, Job, QuarryConfig, SqliteConnectionProvider, TaskRun,
    TaskRunner, TaskSpec, ValidationTask,
};
use quarry_types::{Context, StageStatus, Verdict};

#[derive(Parser)]
#[command(name = "quarry", version, about = "Validate database query results against expectation suites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: ./quarry.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one query and validate its result
    Check {
        /// Connection id
        #[arg(long)]
        conn: String,

        /// Query text, or a path ending in .sql
        #[arg(long)]
        sql: String,

        /// Suite JSON, or a path ending in .json
        #[arg(long)]
        suite: String,

        /// Named query parameter (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Template variable (repeatable)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Run every task of a job file in order
    Run {
        /// Path to the job .toml file
        job: PathBuf,

        /// Template variable (repeatable)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Parse an expectation suite and list its expectations
    Lint {
        /// Path to the suite .json file
        suite: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let ok = match cli.command {
        Commands::Check {
            conn,
            sql,
            suite,
            params,
            vars,
        } => cmd_check(cli.config.as_deref(), &conn, &sql, &suite, params, &vars).await?,
        Commands::Run { job, vars } => cmd_run(cli.config.as_deref(), &job, &vars).await?,
        Commands::Lint { suite } => cmd_lint(&suite)?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Numbers, booleans and null are bound as such; anything else is text.
fn param_value(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) if !v.is_array() && !v.is_object() => v,
        _ => serde_json::Value::String(raw.to_string()),
    }
}

fn build_runner(config: &QuarryConfig) -> TaskRunner {
    let provider = Arc::new(SqliteConnectionProvider::new(config.connection_config()));
    TaskRunner::from_config(default_registry(provider), config)
}

async fn run_context(vars: &[(String, String)]) -> Context {
    let context = Context::new();
    init_run_context(&context, chrono::Utc::now()).await;
    for (key, value) in vars {
        context
            .set(key.clone(), serde_json::Value::String(value.clone()))
            .await;
    }
    context
}

async fn cmd_check(
    config_path: Option<&Path>,
    conn: &str,
    sql: &str,
    suite: &str,
    params: Vec<(String, String)>,
    vars: &[(String, String)],
) -> anyhow::Result<bool> {
    let config = QuarryConfig::load_or_default(config_path)?;
    let runner = build_runner(&config);

    let mut spec = TaskSpec::new("check", ValidationTask::TASK_TYPE)
        .with_param("conn_id", serde_json::json!(conn))
        .with_param("sql", serde_json::json!(sql))
        .with_param("validation_config", serde_json::json!(suite));
    if !params.is_empty() {
        let named: serde_json::Map<String, serde_json::Value> = params
            .into_iter()
            .map(|(k, v)| (k, param_value(&v)))
            .collect();
        spec = spec.with_param("parameters", serde_json::Value::Object(named));
    }

    let context = run_context(vars).await;
    let run = runner.run_task(&spec, &context).await;
    print_run(&run);
    Ok(run.succeeded())
}

async fn cmd_run(
    config_path: Option<&Path>,
    job_path: &Path,
    vars: &[(String, String)],
) -> anyhow::Result<bool> {
    let config = QuarryConfig::load_or_default(config_path)?;
    let job = Job::load(job_path)?;
    let runner = build_runner(&config);

    println!(
        "Running job: {} ({} tasks)",
        job.name.as_deref().unwrap_or(&job_path.display().to_string()),
        job.tasks.len()
    );
    let context = run_context(vars).await;
    let result = runner.run_job(&job, &context).await;

    for run in &result.runs {
        print_run(run);
    }
    let counts: BTreeMap<&str, usize> =
        result.runs.iter().fold(BTreeMap::new(), |mut acc, run| {
            *acc.entry(run.status().as_str()).or_default() += 1;
            acc
        });
    println!(
        "\nJob {}: {}",
        if result.success { "passed" } else { "failed" },
        counts
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(result.success)
}

fn cmd_lint(path: &Path) -> anyhow::Result<bool> {
    let source = std::fs::read_to_string(path)?;
    let suite = match ExpectationSuite::from_json(&source) {
        Ok(suite) => suite,
        Err(e) => {
            println!("[ERROR] {}: {e}", path.display());
            return Ok(false);
        }
    };

    if let Some(name) = &suite.dataset_name {
        println!("Dataset: {name}");
    }
    println!("Expectations: {}", suite.len());
    for (index, expectation) in suite.expectations.iter().enumerate() {
        match expectation.column() {
            Some(column) => println!(
                "  {index}: {} (column={column})",
                expectation.expectation_type()
            ),
            None => println!("  {index}: {}", expectation.expectation_type()),
        }
    }
    if suite.is_empty() {
        println!("[WARN] suite has no expectations and will always pass");
    }
    Ok(true)
}

fn print_run(run: &TaskRun) {
    match run.status() {
        StageStatus::Success => println!("[PASS] {}: {}", run.task_id, run.outcome.notes),
        StageStatus::Skipped => println!("[SKIP] {}: {}", run.task_id, run.outcome.notes),
        StageStatus::Fail => {
            match run.error.as_ref().and_then(|e| e.verdict()) {
                Some(verdict) => {
                    println!(
                        "[FAIL] {}: {} of {} expectations failed",
                        run.task_id,
                        verdict.statistics.unsuccessful_expectations,
                        verdict.statistics.evaluated_expectations
                    );
                    print_failures(verdict);
                }
                None => println!(
                    "[FAIL] {}: {}",
                    run.task_id,
                    run.outcome.failure_reason.as_deref().unwrap_or("unknown error")
                ),
            }
        }
    }
}

fn print_failures(verdict: &Verdict) {
    for result in verdict.failed() {
        let detail = &result.result;
        let mut line = format!("  - {}", result.describe());
        if let Some(info) = &result.exception_info {
            line.push_str(&format!(": {}", info.exception_message));
        } else if let Some(count) = detail.unexpected_count {
            line.push_str(&format!(
                ": {count} unexpected of {}",
                detail.element_count.unwrap_or_default()
            ));
            if let Some(sample) = &detail.partial_unexpected_list {
                let shown: Vec<String> = sample.iter().map(ToString::to_string).collect();
                line.push_str(&format!(" (e.g. {})", shown.join(", ")));
            }
        } else if let Some(observed) = &detail.observed_value {
            line.push_str(&format!(": observed {observed}"));
        }
        println!("{line}");
    }
}
