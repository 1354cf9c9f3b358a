//! etfscout - batch ETF scraping and rating pipeline
//!
//! Reads an ordered identifier list, drives the scrape through a bounded
//! worker pool with checkpointed batches, then writes consolidated JSON
//! and CSV exports. `--resume` continues an interrupted run from the
//! last committed checkpoint.

use anyhow::{Context, Result};
use clap::Parser;
use etfscout::extract::{CandidateValidator, DenyList, ExtractionEngine};
use etfscout::fetch::{HttpFetcher, RateGate};
use etfscout::orchestrator::Orchestrator;
use etfscout::retry::RetryController;
use etfscout::types::Isin;
use etfscout::{checkpoint::CheckpointStore, export};
use etfscout_common::config::ScrapeConfig;
use etfscout_common::retry::RetryPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(about = "ETF page scraping and rating pipeline")]
#[command(version)]
struct Args {
    /// File listing ISINs (newline, whitespace or comma separated)
    #[arg(short, long, env = "ETFSCOUT_INPUT")]
    input: PathBuf,

    /// Base URL of the fund page source
    #[arg(long, env = "ETFSCOUT_BASE_URL")]
    base_url: String,

    /// Optional TOML config file
    #[arg(short, long, env = "ETFSCOUT_CONFIG")]
    config: Option<PathBuf>,

    /// Continue an interrupted run from its last committed checkpoint
    #[arg(long)]
    resume: bool,
}

/// Parse the identifier list: newline, whitespace or comma delimited,
/// `#` starts a line comment
fn load_identifiers(path: &PathBuf) -> Result<Vec<Isin>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading identifier list {}", path.display()))?;
    let mut identifiers = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        for token in line.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            let isin: Isin = token
                .parse()
                .with_context(|| format!("line {}: invalid ISIN {:?}", number + 1, token))?;
            identifiers.push(isin);
        }
    }
    Ok(identifiers)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "etfscout=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = ScrapeConfig::load(args.config.as_deref())?;
    config.validate()?;

    let identifiers = load_identifiers(&args.input)?;
    if identifiers.is_empty() {
        anyhow::bail!("identifier list {} is empty", args.input.display());
    }
    info!(
        identifiers = identifiers.len(),
        batch_size = config.batch_size,
        workers = config.worker_count,
        resume = args.resume,
        "Starting etfscout"
    );

    let denylist = match &config.denylist_path {
        Some(path) => DenyList::from_file(path)
            .with_context(|| format!("loading deny-list {}", path.display()))?,
        None => DenyList::default(),
    };

    let rate_gate = RateGate::new(Duration::from_millis(config.rate_limit_ms));
    let fetcher = HttpFetcher::new(
        &args.base_url,
        &config.user_agent,
        Duration::from_secs(config.fetch_timeout_secs),
        rate_gate,
    )?;

    let controller = RetryController::new(
        RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        ),
        Arc::new(fetcher),
        Arc::new(ExtractionEngine::new(CandidateValidator::new(denylist))),
    );

    let state_dir = config.resolve_state_dir()?;
    let store = CheckpointStore::open(&state_dir)?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight items then stopping");
            ctrl_c_token.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        Arc::new(controller),
        store,
        config.batch_size,
        config.worker_count,
        cancel,
    );
    let summary = orchestrator.run(&identifiers, args.resume).await?;

    let records = orchestrator.store().load_all()?;
    let output_dir = config.resolve_output_dir()?;
    export::write_json(&records, &output_dir.join("records.json"))?;
    export::write_csv(&records, &output_dir.join("records.csv"))?;

    println!(
        "Run {}: {} complete, {} partial, {} failed across {} batches",
        if summary.cancelled { "cancelled" } else { "finished" },
        summary.total_success(),
        summary.total_partial(),
        summary.total_failed(),
        summary.batches.len(),
    );
    if !summary.failed_identifiers.is_empty() {
        println!("Failed identifiers (for manual re-run):");
        for isin in &summary.failed_identifiers {
            println!("  {}", isin);
        }
    }
    println!("Exports written to {}", output_dir.display());

    Ok(())
}
