//! Website audit: four independent checks merged into one record.
//!
//! The checks are the external performance API, TLS validation, an HTTP
//! fetch with timing, and a metadata parse of the fetched HTML. Each one
//! yields a [`CheckOutcome`]; a failure in one never stops the others.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::model::{AuditFindings, AuditRecord, AuditStatus, Lead, PageMetadata};
use crate::pagespeed::{PageSpeedClient, PerformanceBackend, PerformanceReport};

pub mod issues;
pub mod meta;
pub mod probe;

pub use probe::HttpProbe;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    /// The site answered but its certificate was rejected.
    #[error("certificate rejected: {0}")]
    Certificate(String),
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("too many redirects ({0})")]
    TooManyRedirects(u32),
    #[error("malformed: {0}")]
    Malformed(String),
}

impl CheckError {
    pub fn from_transport(what: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            CheckError::Timeout(format!("{what}: {err}"))
        } else if err.is_connect() || err.is_request() {
            CheckError::Connect(format!("{what}: {err}"))
        } else {
            CheckError::Malformed(format!("{what}: {err}"))
        }
    }

    /// Target could not be reached at all (DNS, refused, timeout). A
    /// rejected certificate does not count.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, CheckError::Timeout(_) | CheckError::Connect(_))
    }
}

impl From<CheckError> for PipelineError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::RateLimited(msg) => PipelineError::RateLimited(msg),
            CheckError::Timeout(_) | CheckError::Connect(_) => {
                PipelineError::Unreachable(err.to_string())
            }
            other => PipelineError::MalformedResponse(other.to_string()),
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum CheckOutcome<T> {
    Ok(T),
    Skipped(String),
    Failed(String),
}

impl<T> CheckOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckOutcome::Ok(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            CheckOutcome::Ok(v) => Some(v),
            _ => None,
        }
    }

    /// Reason text when the check did not succeed.
    pub fn reason(&self) -> Option<&str> {
        match self {
            CheckOutcome::Ok(_) => None,
            CheckOutcome::Skipped(r) | CheckOutcome::Failed(r) => Some(r),
        }
    }
}

/// A fetched homepage. The HTML is capped and not kept in the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFetch {
    pub final_url: String,
    pub status: u16,
    pub load_time_ms: u64,
    pub redirects: u32,
    #[serde(skip)]
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsReport {
    pub valid: bool,
    pub detail: Option<String>,
}

/// Direct checks against the target site.
#[async_trait]
pub trait SiteProbe: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<PageFetch, CheckError>;
    async fn check_tls(&self, url: &str) -> Result<TlsReport, CheckError>;
}

/// The four tagged outcomes of one audit attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSet {
    pub http: CheckOutcome<PageFetch>,
    pub tls: CheckOutcome<TlsReport>,
    pub metadata: CheckOutcome<PageMetadata>,
    pub performance: CheckOutcome<PerformanceReport>,
}

impl CheckSet {
    fn unreachable(reason: &str) -> Self {
        Self {
            http: CheckOutcome::Failed(reason.to_string()),
            tls: CheckOutcome::Failed(reason.to_string()),
            metadata: CheckOutcome::Failed(reason.to_string()),
            performance: CheckOutcome::Failed(reason.to_string()),
        }
    }

    fn ok_count(&self) -> usize {
        [
            self.http.is_ok(),
            self.tls.is_ok(),
            self.metadata.is_ok(),
            self.performance.is_ok(),
        ]
        .iter()
        .filter(|ok| **ok)
        .count()
    }

    pub fn status(&self) -> AuditStatus {
        match self.ok_count() {
            4 => AuditStatus::Completed,
            0 => AuditStatus::Failed,
            _ => AuditStatus::Partial,
        }
    }

    fn error_summary(&self) -> Option<String> {
        let parts: Vec<String> = [
            ("http", self.http.reason()),
            ("tls", self.tls.reason()),
            ("metadata", self.metadata.reason()),
            ("performance", self.performance.reason()),
        ]
        .into_iter()
        .filter_map(|(name, reason)| reason.map(|r| format!("{name}: {r}")))
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// Runs every check for a URL and merges them into [`AuditFindings`].
pub struct AuditAggregator {
    probe: Arc<dyn SiteProbe>,
    performance: Arc<dyn PerformanceBackend>,
    slow_load_threshold_ms: u64,
}

impl AuditAggregator {
    pub fn new(
        probe: Arc<dyn SiteProbe>,
        performance: Arc<dyn PerformanceBackend>,
        slow_load_threshold_ms: u64,
    ) -> Self {
        Self {
            probe,
            performance,
            slow_load_threshold_ms,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let probe = HttpProbe::from_config(&cfg.audit)?;
        let performance = PageSpeedClient::from_config(&cfg.pagespeed)?;
        Ok(Self::new(
            Arc::new(probe),
            Arc::new(performance),
            cfg.audit.slow_load_threshold_ms,
        ))
    }

    /// Run the checks. Never fails; problems end up in the status and issues.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn audit(&self, url: &str) -> AuditFindings {
        let fetch = match self.probe.fetch_page(url).await {
            Ok(page) => CheckOutcome::Ok(page),
            Err(err) if err.is_unreachable() => {
                warn!(%err, "target unreachable; skipping remaining checks");
                return self.merge(CheckSet::unreachable(&err.to_string()), true);
            }
            Err(err) => CheckOutcome::Failed(err.to_string()),
        };

        let metadata = match &fetch {
            CheckOutcome::Ok(page) => CheckOutcome::Ok(meta::extract(&page.html)),
            _ => CheckOutcome::Skipped("no page fetched".to_string()),
        };

        let (tls, performance) =
            tokio::join!(self.probe.check_tls(url), self.performance.analyze(url));
        let tls = match tls {
            Ok(report) => CheckOutcome::Ok(report),
            Err(err) => CheckOutcome::Failed(err.to_string()),
        };
        let performance = match performance {
            Ok(report) => CheckOutcome::Ok(report),
            Err(err @ CheckError::RateLimited(_)) => CheckOutcome::Skipped(err.to_string()),
            Err(err) => CheckOutcome::Failed(err.to_string()),
        };

        self.merge(
            CheckSet {
                http: fetch,
                tls,
                metadata,
                performance,
            },
            false,
        )
    }

    fn merge(&self, checks: CheckSet, unreachable: bool) -> AuditFindings {
        let status = checks.status();
        let error = checks.error_summary();
        let report = checks.performance.value();
        let page = checks.http.value();
        let metadata = checks.metadata.value();
        let tls = checks.tls.value();

        let (performance_score, seo_score, accessibility_score) = match report {
            Some(r) => (Some(r.performance), Some(r.seo), Some(r.accessibility)),
            None if status == AuditStatus::Failed => (Some(0), Some(0), Some(0)),
            None => (None, None, None),
        };

        let mobile_friendly = match (metadata, report) {
            (Some(meta), _) => meta.has_viewport,
            (None, Some(r)) => r.viewport_ok,
            (None, None) => false,
        };

        let tls_valid = tls.is_some_and(|t| t.valid);
        let tls_detail = match (tls, checks.tls.reason()) {
            (Some(t), _) => t.detail.as_deref(),
            (None, reason) => reason,
        };
        let issue_list = issues::derive(&issues::IssueInputs {
            unreachable: if unreachable { error.as_deref() } else { None },
            http_status: page.map(|p| p.status),
            tls_valid,
            tls_detail,
            metadata,
            load_time_ms: page.map(|p| p.load_time_ms),
            redirects: page.map(|p| p.redirects).unwrap_or(0),
            slow_load_threshold_ms: self.slow_load_threshold_ms,
            lighthouse: report.map(|r| r.issues.as_slice()).unwrap_or(&[]),
        });

        let raw = json!({
            "checks": &checks,
            "unreachable": unreachable,
        });

        AuditFindings {
            performance_score,
            seo_score,
            accessibility_score,
            mobile_friendly,
            tls_valid,
            load_time_ms: page.map(|p| p.load_time_ms),
            metadata: metadata.cloned().unwrap_or_default(),
            issues: issue_list,
            status,
            error,
            raw,
        }
    }

    /// Audit a lead and append the result as a new record.
    #[instrument(skip_all, fields(lead_id = lead.id))]
    pub async fn audit_and_persist(&self, pool: &db::Pool, lead: &Lead) -> Result<AuditRecord> {
        let findings = self.audit(&lead.website_url).await;
        let status = findings.status;
        let audit_id = db::insert_audit(pool, lead.id, &findings).await?;
        info!(audit_id, %status, issues = findings.issues.len(), "audit stored");
        db::latest_audit(pool, lead.id)
            .await?
            .filter(|a| a.id == audit_id)
            .ok_or_else(|| anyhow!("audit {audit_id} not readable after insert"))
    }
}
