use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use leadgen::audit::AuditAggregator;
use leadgen::config;
use leadgen::ingest::normalize_url;
use leadgen::scoring::ScoringEngine;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Audit and score a single website without touching the database"
)]
struct Args {
    /// Website to audit; https:// is added when no scheme is given
    url: String,

    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print the merged findings as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let url = normalize_url(&args.url).with_context(|| format!("invalid URL: {}", args.url))?;

    let aggregator = AuditAggregator::from_config(&cfg)?;
    let engine = ScoringEngine::new(cfg.scoring)?;

    info!(%url, "auditing");
    let findings = aggregator.audit(&url).await;
    let score = engine.score(&findings)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else {
        println!("{url} [{}]", findings.status);
        if let Some(err) = &findings.error {
            println!("errors: {err}");
        }
        for issue in &findings.issues {
            let tag = if issue.is_critical() { "CRIT" } else { "WARN" };
            println!("  [{tag}] {}", issue.description);
        }
    }
    println!("{}", score.report());
    Ok(())
}
