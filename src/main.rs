use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leadgen::config::{self, Config};
use leadgen::db;
use leadgen::dispatch::{self, DryRunTransport, PacerConfig, SendTransport};
use leadgen::ingest;
use leadgen::model::OutcomeUpdate;
use leadgen::pipeline::{Pipeline, RunOptions};

#[derive(Debug, Parser)]
#[command(author, version, about = "Audit, score and write outreach for local business leads")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import leads from a CSV file
    Import {
        file: PathBuf,
        /// Provenance recorded on each imported lead
        #[arg(long, default_value = ingest::DEFAULT_SOURCE)]
        source: String,
        /// Write a sample CSV to FILE instead of importing
        #[arg(long)]
        template: bool,
    },
    /// Audit new leads, score them and generate outreach
    Run {
        #[arg(long)]
        audit_limit: Option<usize>,
        #[arg(long)]
        generate_limit: Option<usize>,
        /// Skip the CSV export
        #[arg(long)]
        no_export: bool,
    },
    /// Delete a lead's audits and audit it again
    Reaudit { lead_id: i64 },
    /// Print the score report for a lead's latest audit
    Score { lead_id: i64 },
    /// Generate and print a message for a lead without saving it
    Preview { lead_id: i64 },
    /// List stored leads with their audit and outreach state
    ListLeads {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Send pending outreach within the configured pace
    Send {
        /// Log messages instead of sending them
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        daily_cap: Option<u32>,
    },
    /// Record engagement for a lead's outreach
    Track {
        lead_id: i64,
        #[arg(long)]
        opened: bool,
        #[arg(long)]
        replied: bool,
        #[arg(long)]
        positive: bool,
        /// Reply time (RFC 3339); defaults to now when --replied is given
        #[arg(long)]
        replied_at: Option<DateTime<Utc>>,
        #[arg(long)]
        meeting_at: Option<DateTime<Utc>>,
        #[arg(long)]
        closed: bool,
        #[arg(long)]
        deal_value: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print conversion funnel statistics
    Stats,
    /// Print an example configuration
    ExampleConfig,
}

async fn open_store(cfg: &Config) -> Result<db::Pool> {
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.default_database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    Ok(pool)
}

fn load_config(path: &Path) -> Result<Config> {
    let cfg = config::load(Some(path))
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    cfg.ensure_dirs()?;
    Ok(cfg)
}

/// Token cancelled on Ctrl-C.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current item");
            child.cancel();
        }
    });
    token
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    match args.command {
        Command::ExampleConfig => {
            print!("{}", config::example());
        }
        Command::Import {
            file,
            source,
            template,
        } => {
            if template {
                ingest::write_template(&file)?;
                info!(path = %file.display(), "sample CSV written");
                return Ok(());
            }
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let summary = ingest::import_file(&pool, &file, &source).await?;
            print_json(&summary)?;
        }
        Command::Run {
            audit_limit,
            generate_limit,
            no_export,
        } => {
            let mut cfg = load_config(&args.config)?;
            if no_export {
                cfg.pipeline.export = false;
            }
            let pool = open_store(&cfg).await?;
            let pipeline = Pipeline::from_config(&cfg, pool)?;
            let mut opts = RunOptions::from_config(&cfg);
            opts.audit_limit = audit_limit.unwrap_or(opts.audit_limit);
            opts.generate_limit = generate_limit.unwrap_or(opts.generate_limit);
            let summary = pipeline.run(&opts, &shutdown_token()).await?;
            print_json(&summary)?;
        }
        Command::Reaudit { lead_id } => {
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let pipeline = Pipeline::from_config(&cfg, pool)?;
            let record = pipeline.reaudit(lead_id).await?;
            print_json(&record)?;
        }
        Command::Score { lead_id } => {
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let pipeline = Pipeline::from_config(&cfg, pool)?;
            let (lead, audit, score) = pipeline.score_lead(lead_id).await?;
            println!("{} ({})", lead.business_name, lead.website_url);
            println!("audit #{} at {} [{}]", audit.id, audit.audited_at, audit.findings.status);
            println!("{}", score.report());
        }
        Command::Preview { lead_id } => {
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let pipeline = Pipeline::from_config(&cfg, pool)?;
            let (lead, score, message) = pipeline.preview(lead_id).await?;
            println!("To:       {} <{}>", lead.business_name, lead.email.as_deref().unwrap_or("-"));
            println!("Priority: {} (qualification {})", score.priority, score.qualification);
            println!("Source:   {}", message.source.as_str());
            if let Some(reason) = &message.fallback_reason {
                println!("Fallback: {reason}");
            }
            println!("Subject:  {}", message.subject);
            println!();
            println!("{}", message.body);
        }
        Command::ListLeads { limit } => {
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let leads = db::list_leads(&pool, limit).await?;
            if leads.is_empty() {
                println!("No leads stored.");
            }
            for lead in &leads {
                let audit = lead.audit_status.map_or("not audited", |s| s.as_str());
                let outreach = match (lead.priority, lead.qualification_score, lead.sent_at) {
                    (Some(p), Some(q), Some(at)) => format!("{p} q={q} sent {}", at.date_naive()),
                    (Some(p), Some(q), None) => format!("{p} q={q} unsent"),
                    _ => "no outreach".to_string(),
                };
                println!(
                    "{:>5}  {:<32}  {:<40}  {:<11}  {}",
                    lead.id, lead.business_name, lead.website_url, audit, outreach
                );
            }
        }
        Command::Send { dry_run, daily_cap } => {
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let transport: Box<dyn SendTransport> = if dry_run {
                Box::new(DryRunTransport)
            } else {
                dispatch::transport_from_config(&cfg)?
            };
            let mut pacer = PacerConfig::from_config(&cfg);
            if let Some(cap) = daily_cap {
                if cap == 0 {
                    bail!("--daily-cap must be > 0");
                }
                pacer.daily_cap = cap;
            }
            let summary =
                dispatch::dispatch(&pool, transport.as_ref(), pacer, &shutdown_token()).await?;
            print_json(&summary)?;
        }
        Command::Track {
            lead_id,
            opened,
            replied,
            positive,
            replied_at,
            meeting_at,
            closed,
            deal_value,
            notes,
        } => {
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let flag = |set: bool| set.then_some(true);
            let update = OutcomeUpdate {
                opened: flag(opened || replied),
                replied: flag(replied || positive),
                positive_reply: flag(positive),
                reply_received_at: replied_at
                    .or_else(|| (replied || positive).then(Utc::now)),
                meeting_booked: flag(meeting_at.is_some()),
                meeting_at,
                client_closed: flag(closed),
                deal_value,
                notes,
            };
            if !db::track_outcome(&pool, lead_id, &update).await? {
                bail!("lead {lead_id} has no outreach to track");
            }
            info!(lead_id, "outcome recorded");
        }
        Command::Stats => {
            let cfg = load_config(&args.config)?;
            let pool = open_store(&cfg).await?;
            let stats = db::conversion_stats(&pool).await?;
            println!("Leads:      {}", stats.leads);
            println!("Audited:    {}", stats.audited);
            println!("Generated:  {}", stats.generated);
            println!("Sent:       {}", stats.sent);
            println!("Opened:     {} ({:.1}%)", stats.opened, stats.open_rate());
            println!("Replied:    {} ({:.1}%)", stats.replied, stats.reply_rate());
            println!("Positive:   {}", stats.positive);
            println!("Meetings:   {} ({:.1}%)", stats.meetings, stats.meeting_rate());
            println!("Closed:     {} ({:.1}%)", stats.closed, stats.close_rate());
            println!("Revenue:    ${:.2}", stats.revenue);
        }
    }

    Ok(())
}
