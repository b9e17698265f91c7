//! Batch orchestration: audit, score, generate, export.
use anyhow::{anyhow, bail, Result};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditAggregator;
use crate::config::Config;
use crate::db;
use crate::export::{CsvExporter, ExportRow, Exporter};
use crate::model::{AuditRecord, GeneratedMessage, Lead, Priority};
use crate::outreach::{Generator, MessageContext};
use crate::scoring::{ScoreResult, ScoringEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Audit,
    Score,
    Generate,
    Export,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StageCounts {
    fn record<T>(&mut self, outcome: &Result<T, String>) {
        self.attempted += 1;
        if outcome.is_ok() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub lead_id: Option<i64>,
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub audit: StageCounts,
    pub scoring: StageCounts,
    pub generation: StageCounts,
    /// Scored leads left out of generation, by tier.
    pub skipped_tiers: BTreeMap<Priority, usize>,
    pub errors: Vec<ItemError>,
    pub export_path: Option<PathBuf>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            audit: StageCounts::default(),
            scoring: StageCounts::default(),
            generation: StageCounts::default(),
            skipped_tiers: BTreeMap::new(),
            errors: Vec::new(),
            export_path: None,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    fn fail(&mut self, lead_id: Option<i64>, stage: Stage, message: String) {
        error!(?lead_id, ?stage, %message, "item failed");
        self.errors.push(ItemError {
            lead_id,
            stage,
            message,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub audit_limit: usize,
    pub generate_limit: usize,
    pub run_id: String,
}

impl RunOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            audit_limit: cfg.pipeline.audit_limit,
            generate_limit: cfg.pipeline.generate_limit,
            run_id: new_run_id(),
        }
    }
}

pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Run one item, turning both errors and panics into a message.
async fn guarded<T, F>(fut: F) -> Result<T, String>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(panic) => Err(panic_message(panic)),
    }
}

/// A lead ready for generation.
struct Scored {
    lead: Lead,
    audit: AuditRecord,
    score: ScoreResult,
}

pub struct Pipeline {
    pool: db::Pool,
    aggregator: AuditAggregator,
    engine: ScoringEngine,
    generator: Generator,
    exporter: Option<Box<dyn Exporter>>,
}

impl Pipeline {
    pub fn new(
        pool: db::Pool,
        aggregator: AuditAggregator,
        engine: ScoringEngine,
        generator: Generator,
        exporter: Option<Box<dyn Exporter>>,
    ) -> Self {
        Self {
            pool,
            aggregator,
            engine,
            generator,
            exporter,
        }
    }

    pub fn from_config(cfg: &Config, pool: db::Pool) -> Result<Self> {
        let exporter: Option<Box<dyn Exporter>> = if cfg.pipeline.export {
            Some(Box::new(CsvExporter::new(cfg.exports_path())))
        } else {
            None
        };
        Ok(Self::new(
            pool,
            AuditAggregator::from_config(cfg)?,
            ScoringEngine::new(cfg.scoring)?,
            Generator::from_config(cfg)?,
            exporter,
        ))
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    /// Run every stage once. Per-lead failures are recorded, never raised;
    /// only store-level failures while selecting work end the run early.
    #[instrument(skip_all, fields(run_id = %opts.run_id))]
    pub async fn run(&self, opts: &RunOptions, cancel: &CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(&opts.run_id);

        self.audit_stage(opts.audit_limit, cancel, &mut summary).await?;
        let ready = if summary.cancelled {
            Vec::new()
        } else {
            self.score_stage(cancel, &mut summary).await?
        };
        let rows = self
            .generate_stage(ready, opts, cancel, &mut summary)
            .await;
        self.export_stage(&rows, &mut summary);

        summary.elapsed = started.elapsed();
        info!(
            audited = summary.audit.succeeded,
            scored = summary.scoring.succeeded,
            generated = summary.generation.succeeded,
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }

    async fn audit_stage(
        &self,
        limit: usize,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let leads = db::leads_without_audit(&self.pool, limit).await?;
        info!(count = leads.len(), "audit stage");
        for lead in &leads {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                return Ok(());
            }
            let outcome = guarded(self.aggregator.audit_and_persist(&self.pool, lead)).await;
            summary.audit.record(&outcome);
            if let Err(msg) = outcome {
                summary.fail(Some(lead.id), Stage::Audit, msg);
            }
        }
        Ok(())
    }

    async fn score_lead_inner(&self, lead: Lead) -> Result<Scored> {
        let audit = db::latest_audit(&self.pool, lead.id)
            .await?
            .ok_or_else(|| anyhow!("lead {} has no audit", lead.id))?;
        let score = self.engine.score(&audit.findings)?;
        Ok(Scored { lead, audit, score })
    }

    async fn score_stage(
        &self,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<Vec<Scored>> {
        let leads = db::leads_awaiting_outreach(&self.pool).await?;
        info!(count = leads.len(), "score stage");
        let mut ready = Vec::new();
        for lead in leads {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let lead_id = lead.id;
            let outcome = guarded(self.score_lead_inner(lead)).await;
            summary.scoring.record(&outcome);
            match outcome {
                Ok(scored) if scored.score.priority.warrants_outreach() => ready.push(scored),
                Ok(scored) => {
                    *summary.skipped_tiers.entry(scored.score.priority).or_default() += 1;
                }
                Err(msg) => summary.fail(Some(lead_id), Stage::Score, msg),
            }
        }
        ready.sort_by(|a, b| {
            b.score
                .qualification
                .cmp(&a.score.qualification)
                .then(a.lead.id.cmp(&b.lead.id))
        });
        Ok(ready)
    }

    async fn generate_stage(
        &self,
        ready: Vec<Scored>,
        opts: &RunOptions,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Vec<ExportRow> {
        let mut rows = Vec::new();
        info!(
            count = ready.len().min(opts.generate_limit),
            eligible = ready.len(),
            "generate stage"
        );
        for item in ready.iter().take(opts.generate_limit) {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let ctx = MessageContext {
                lead: &item.lead,
                findings: &item.audit.findings,
                score: &item.score,
            };
            let outcome = guarded(self.generator.generate_and_persist(
                &self.pool,
                &ctx,
                Some(&opts.run_id),
            ))
            .await;
            summary.generation.record(&outcome);
            match outcome {
                Ok(record) => rows.push(ExportRow::new(&item.lead, &record)),
                Err(msg) => summary.fail(Some(item.lead.id), Stage::Generate, msg),
            }
        }
        rows
    }

    fn export_stage(&self, rows: &[ExportRow], summary: &mut RunSummary) {
        let Some(exporter) = &self.exporter else {
            return;
        };
        match exporter.export(rows) {
            Ok(path) => summary.export_path = path,
            Err(err) => summary.fail(None, Stage::Export, format!("{err:#}")),
        }
    }

    /// Score a lead on its latest audit without persisting anything.
    pub async fn score_lead(&self, lead_id: i64) -> Result<(Lead, AuditRecord, ScoreResult)> {
        let Some(lead) = db::lead_by_id(&self.pool, lead_id).await? else {
            bail!("lead {lead_id} not found");
        };
        let scored = self.score_lead_inner(lead).await?;
        Ok((scored.lead, scored.audit, scored.score))
    }

    /// Generate a message for a lead's latest audit without storing it.
    #[instrument(skip_all, fields(lead_id = lead_id))]
    pub async fn preview(&self, lead_id: i64) -> Result<(Lead, ScoreResult, GeneratedMessage)> {
        let (lead, audit, score) = self.score_lead(lead_id).await?;
        let message = self
            .generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &audit.findings,
                score: &score,
            })
            .await;
        Ok((lead, score, message))
    }

    /// Drop a lead's audits and audit it again.
    #[instrument(skip_all, fields(lead_id = lead_id))]
    pub async fn reaudit(&self, lead_id: i64) -> Result<AuditRecord> {
        let Some(lead) = db::lead_by_id(&self.pool, lead_id).await? else {
            bail!("lead {lead_id} not found");
        };
        let removed = db::delete_audits_for_lead(&self.pool, lead_id).await?;
        if removed > 0 {
            warn!(removed, "previous audits deleted");
        }
        self.aggregator.audit_and_persist(&self.pool, &lead).await
    }
}
