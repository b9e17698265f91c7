//! Paced delivery of generated outreach.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{Config, Transport};
use crate::db::{self, PendingSend};

const BREVO_API_BASE: &str = "https://api.brevo.com/";

/// One outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
}

impl From<&PendingSend> for Envelope {
    fn from(p: &PendingSend) -> Self {
        Self {
            to_email: p.email.trim().to_string(),
            to_name: p.business_name.clone(),
            subject: p.subject.clone(),
            body: p.body.clone(),
        }
    }
}

/// Delivers one envelope. `false` means the send did not happen; the
/// transport logs the detail.
#[async_trait]
pub trait SendTransport: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> bool;
}

/// Logs instead of sending.
#[derive(Debug, Default, Clone)]
pub struct DryRunTransport;

#[async_trait]
impl SendTransport for DryRunTransport {
    async fn send(&self, envelope: &Envelope) -> bool {
        info!(
            to = %envelope.to_email,
            subject = %envelope.subject,
            body_chars = envelope.body.chars().count(),
            "dry run: not sending"
        );
        true
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmail<'a> {
    sender: BrevoContact<'a>,
    to: [BrevoContact<'a>; 1],
    subject: &'a str,
    text_content: &'a str,
}

#[derive(Serialize)]
struct BrevoContact<'a> {
    email: &'a str,
    name: &'a str,
}

/// Brevo transactional email API.
#[derive(Clone)]
pub struct BrevoTransport {
    http: Client,
    base_url: Url,
    api_key: String,
    sender_name: String,
    sender_email: String,
}

impl fmt::Debug for BrevoTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrevoTransport")
            .field("base_url", &self.base_url)
            .field("sender_email", &self.sender_email)
            .finish_non_exhaustive()
    }
}

impl BrevoTransport {
    pub fn new(api_key: &str, sender_name: &str, sender_email: &str) -> Result<Self> {
        let base_url = Url::parse(BREVO_API_BASE).context("invalid Brevo URL")?;
        Self::with_base_url(api_key, sender_name, sender_email, base_url)
    }

    pub fn with_base_url(
        api_key: &str,
        sender_name: &str,
        sender_email: &str,
        base_url: Url,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("leadgen/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Brevo HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            sender_name: sender_name.to_string(),
            sender_email: sender_email.to_string(),
        })
    }

    pub fn build_request(&self, envelope: &Envelope) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("v3/smtp/email")
            .context("invalid Brevo base URL")?;
        let body = BrevoEmail {
            sender: BrevoContact {
                email: &self.sender_email,
                name: &self.sender_name,
            },
            to: [BrevoContact {
                email: &envelope.to_email,
                name: &envelope.to_name,
            }],
            subject: &envelope.subject,
            text_content: &envelope.body,
        };
        self.http
            .post(endpoint)
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&body)
            .build()
            .context("failed to build Brevo request")
    }
}

#[async_trait]
impl SendTransport for BrevoTransport {
    async fn send(&self, envelope: &Envelope) -> bool {
        let request = match self.build_request(envelope) {
            Ok(req) => req,
            Err(err) => {
                warn!(?err, "could not build Brevo request");
                return false;
            }
        };
        match self.http.execute(request).await {
            Ok(res) if res.status().is_success() => true,
            Ok(res) => {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                warn!(%status, body = %body.chars().take(300).collect::<String>(), to = %envelope.to_email, "Brevo rejected email");
                false
            }
            Err(err) => {
                warn!(?err, to = %envelope.to_email, "Brevo request failed");
                false
            }
        }
    }
}

/// Transport selected by `dispatch.transport`.
pub fn transport_from_config(cfg: &Config) -> Result<Box<dyn SendTransport>> {
    Ok(match &cfg.dispatch.transport {
        Transport::DryRun => Box::new(DryRunTransport),
        Transport::Brevo { api_key } => Box::new(BrevoTransport::new(
            api_key,
            &cfg.outreach.sender_name,
            &cfg.outreach.sender_email,
        )?),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerConfig {
    /// Minimum gap between consecutive send attempts.
    pub delay: Duration,
    /// Successful sends allowed in any rolling 24 h window.
    pub daily_cap: u32,
}

impl PacerConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            delay: cfg.dispatch_delay(),
            daily_cap: cfg.dispatch.daily_cap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ready,
    Wait(Duration),
    CapReached { resume_at: DateTime<Utc> },
}

fn window() -> ChronoDuration {
    ChronoDuration::hours(24)
}

/// Decide whether a send may happen at `now`.
///
/// `sent` holds successful send times, `last_attempt` the most recent
/// attempt of any outcome.
pub fn admit(
    cfg: &PacerConfig,
    now: DateTime<Utc>,
    sent: &[DateTime<Utc>],
    last_attempt: Option<DateTime<Utc>>,
) -> Admission {
    let window_start = now - window();
    let in_window: Vec<&DateTime<Utc>> = sent.iter().filter(|t| **t > window_start).collect();
    if in_window.len() >= cfg.daily_cap as usize {
        let oldest = in_window.iter().min().map(|t| **t).unwrap_or(now);
        return Admission::CapReached {
            resume_at: oldest + window(),
        };
    }
    if let Some(last) = last_attempt {
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed < cfg.delay {
            return Admission::Wait(cfg.delay - elapsed);
        }
    }
    Admission::Ready
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
    /// Left untouched because the daily cap was reached.
    pub deferred: usize,
    /// Left untouched because the run was cancelled.
    pub cancelled: usize,
    /// Delivered, but the sent mark could not be stored.
    pub unrecorded: usize,
    /// Left untouched because the store stopped accepting writes.
    pub halted: usize,
    pub resume_at: Option<DateTime<Utc>>,
}

enum Gate {
    Go,
    Capped(DateTime<Utc>),
    Cancelled,
}

async fn wait_for_slot(
    pacer: &PacerConfig,
    sent: &[DateTime<Utc>],
    last_attempt: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
) -> Gate {
    loop {
        if cancel.is_cancelled() {
            return Gate::Cancelled;
        }
        match admit(pacer, Utc::now(), sent, last_attempt) {
            Admission::Ready => return Gate::Go,
            Admission::CapReached { resume_at } => return Gate::Capped(resume_at),
            Admission::Wait(d) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Gate::Cancelled,
                    _ = tokio::time::sleep(d) => {}
                }
            }
        }
    }
}

/// Send pending outreach one at a time within the pacing limits.
#[instrument(skip_all, fields(daily_cap = pacer.daily_cap))]
pub async fn dispatch(
    pool: &db::Pool,
    transport: &dyn SendTransport,
    pacer: PacerConfig,
    cancel: &CancellationToken,
) -> Result<DispatchSummary> {
    let pending = db::pending_dispatch(pool).await?;
    let mut sent = db::sent_timestamps_since(pool, Utc::now() - window()).await?;
    let mut last_attempt = db::last_send_attempt(pool)
        .await?
        .max(sent.last().copied());
    let mut summary = DispatchSummary {
        pending: pending.len(),
        ..Default::default()
    };
    info!(pending = pending.len(), already_sent = sent.len(), "dispatch starting");

    for (idx, item) in pending.iter().enumerate() {
        let remaining = pending.len() - idx;
        match wait_for_slot(&pacer, &sent, last_attempt, cancel).await {
            Gate::Go => {}
            Gate::Capped(resume_at) => {
                info!(remaining, %resume_at, "daily cap reached; deferring the rest");
                summary.deferred = remaining;
                summary.resume_at = Some(resume_at);
                break;
            }
            Gate::Cancelled => {
                info!(remaining, "dispatch cancelled");
                summary.cancelled = remaining;
                break;
            }
        }

        let envelope = Envelope::from(item);
        let delivered = transport.send(&envelope).await;
        let at = Utc::now();
        last_attempt = Some(at);
        if delivered {
            if let Err(err) = db::mark_sent(pool, item.outreach_id, at).await {
                error!(
                    ?err,
                    outreach_id = item.outreach_id,
                    lead_id = item.lead_id,
                    to = %envelope.to_email,
                    "email delivered but sent mark failed; stopping dispatch"
                );
                summary.unrecorded += 1;
                summary.halted = remaining - 1;
                break;
            }
            sent.push(at);
            summary.sent += 1;
            info!(
                outreach_id = item.outreach_id,
                lead_id = item.lead_id,
                to = %envelope.to_email,
                "sent"
            );
        } else {
            db::record_send_failure(pool, item.outreach_id, at, "transport reported failure")
                .await?;
            summary.failed += 1;
            warn!(outreach_id = item.outreach_id, lead_id = item.lead_id, "send failed");
        }
    }

    info!(
        sent = summary.sent,
        failed = summary.failed,
        deferred = summary.deferred,
        cancelled = summary.cancelled,
        unrecorded = summary.unrecorded,
        "dispatch finished"
    );
    Ok(summary)
}
