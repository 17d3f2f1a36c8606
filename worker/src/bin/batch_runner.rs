//! Batch runner
//!
//! Usage: batch_runner [--rows 20] [--max-capacity 4] [--fail-rows 3,7] [--flaky-rows 5]
//!
//! Pushes one synthetic batch through the bounded processor against the simulated
//! generation upstream and prints the batch summary plus counters as JSON.

use anyhow::{Context, Result};
use batchgate_worker::{
    generate_id, logging, mock::MockGenerationApi, processor_from_config, ProcessorConfig, Row, VERSION,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "batch_runner")]
#[command(about = "Run a synthetic batch through the bounded-concurrency row processor")]
struct Args {
    /// Number of rows in the batch
    #[arg(long, default_value = "20")]
    rows: usize,

    /// JSON config file; environment and flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Concurrent permit ceiling
    #[arg(long)]
    max_capacity: Option<usize>,

    /// Attempts per row, the first one included
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay after the first failed attempt, in milliseconds
    #[arg(long)]
    backoff_initial_ms: Option<u64>,

    /// Ceiling for any retry delay, in milliseconds
    #[arg(long)]
    backoff_max_ms: Option<u64>,

    /// Simulated upstream latency per call, in milliseconds
    #[arg(long, default_value = "50")]
    latency_ms: u64,

    /// Row ids that always fail
    #[arg(long, value_delimiter = ',')]
    fail_rows: Vec<String>,

    /// Row ids that fail once and then succeed
    #[arg(long, value_delimiter = ',')]
    flaky_rows: Vec<String>,

    /// Batch id; generated when omitted
    #[arg(long)]
    batch_id: Option<String>,

    /// Emit JSON log lines instead of plain text
    #[arg(long)]
    json_logs: bool,
}

fn load_config(args: &Args) -> Result<ProcessorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => ProcessorConfig::from_env(),
    };

    if let Some(max_capacity) = args.max_capacity {
        config.max_capacity = max_capacity;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_retry_attempts = max_attempts;
    }
    if let Some(ms) = args.backoff_initial_ms {
        config.backoff.initial = Duration::from_millis(ms);
    }
    if let Some(ms) = args.backoff_max_ms {
        config.backoff.max = Duration::from_millis(ms);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.json_logs {
        logging::init();
    } else {
        logging::init_plain();
    }

    let config = load_config(&args)?;
    let processor = processor_from_config(&config).context("invalid processor config")?;
    info!(event = "startup", version = VERSION, config = ?config, "batch runner starting");

    let mut api = MockGenerationApi::new(Duration::from_millis(args.latency_ms))
        .with_failing_rows(args.fail_rows.iter().cloned());
    for id in &args.flaky_rows {
        api = api.with_flaky_row(id.clone(), 1);
    }

    let rows: Vec<Row<String>> = (1..=args.rows)
        .map(|i| Row::new(i.to_string(), format!("keyword batch item {i}")))
        .collect();
    let batch_id = args.batch_id.clone().unwrap_or_else(generate_id);

    let result = processor
        .process_batch(&batch_id, rows, |row| {
            let api = api.clone();
            let row_id = row.id.clone();
            let prompt = row.payload.clone();
            async move { api.generate(&row_id, &prompt).await }
        })
        .await;

    let report = serde_json::json!({
        "summary": result.summary(),
        "metrics": processor.executor().metrics().snapshot(),
        "limiter": processor.status(),
        "peak_in_flight": api.peak_in_flight(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
