use super::model::{ConversionStats, InsertOutcome, LeadOverview, OutreachScores, PendingSend};
use crate::model::{
    AuditFindings, AuditRecord, AuditStatus, GeneratedMessage, Issue, Lead, Lifecycle,
    MessageSource, NewLead, OutcomeUpdate, OutreachRecord, PageMetadata, Priority,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {normalized}"))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;").execute(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and request file creation. In-memory URLs pass through.
pub fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp {raw:?}"))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn score_from_db(value: i64, column: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| anyhow!("{column} out of range: {value}"))
}

fn opt_score_from_db(value: Option<i64>, column: &str) -> Result<Option<u8>> {
    value.map(|v| score_from_db(v, column)).transpose()
}

// ---- leads ---------------------------------------------------------------

const LEAD_COLUMNS: &str =
    "id, business_name, website_url, phone, email, industry, location, source, created_at";

fn lead_from_row(row: &SqliteRow) -> Result<Lead> {
    let created_at: String = row.try_get("created_at")?;
    Ok(Lead {
        id: row.try_get("id")?,
        business_name: row.try_get("business_name")?,
        website_url: row.try_get("website_url")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        industry: row.try_get("industry")?,
        location: row.try_get("location")?,
        source: row.try_get("source")?,
        created_at: parse_ts(&created_at)?,
    })
}

/// Insert a lead unless its website URL is already known.
#[instrument(skip_all, fields(url = %lead.website_url))]
pub async fn insert_lead(pool: &Pool, lead: &NewLead) -> Result<InsertOutcome> {
    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO leads (business_name, website_url, phone, email, industry, location, source, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(website_url) DO NOTHING
         RETURNING id",
    )
    .bind(&lead.business_name)
    .bind(&lead.website_url)
    .bind(&lead.phone)
    .bind(&lead.email)
    .bind(&lead.industry)
    .bind(&lead.location)
    .bind(&lead.source)
    .bind(Utc::now().to_rfc3339())
    .fetch_optional(pool)
    .await?;
    Ok(match id {
        Some(id) => InsertOutcome::Created(id),
        None => InsertOutcome::Duplicate,
    })
}

#[instrument(skip_all)]
pub async fn lead_by_id(pool: &Pool, lead_id: i64) -> Result<Option<Lead>> {
    let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?"))
        .bind(lead_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(lead_from_row).transpose()
}

/// Leads that have never been audited, oldest first.
#[instrument(skip_all)]
pub async fn leads_without_audit(pool: &Pool, limit: usize) -> Result<Vec<Lead>> {
    let rows = sqlx::query(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads l
         WHERE NOT EXISTS (SELECT 1 FROM audits a WHERE a.lead_id = l.id)
         ORDER BY l.id ASC
         LIMIT ?"
    ))
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    rows.iter().map(lead_from_row).collect()
}

/// Audited leads that have no outreach yet, oldest first.
#[instrument(skip_all)]
pub async fn leads_awaiting_outreach(pool: &Pool) -> Result<Vec<Lead>> {
    let rows = sqlx::query(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads l
         WHERE EXISTS (SELECT 1 FROM audits a WHERE a.lead_id = l.id)
           AND NOT EXISTS (SELECT 1 FROM outreach o WHERE o.lead_id = l.id)
         ORDER BY l.id ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(lead_from_row).collect()
}

/// Stored leads with their latest audit status and outreach state, by id.
#[instrument(skip_all)]
pub async fn list_leads(pool: &Pool, limit: usize) -> Result<Vec<LeadOverview>> {
    let rows = sqlx::query(
        "SELECT l.id, l.business_name, l.website_url, l.email,
                a.status AS audit_status, a.audited_at,
                o.priority, o.qualification_score, o.sent_at
         FROM leads l
         LEFT JOIN audits a ON a.id = (SELECT MAX(id) FROM audits WHERE lead_id = l.id)
         LEFT JOIN outreach o ON o.lead_id = l.id
         ORDER BY l.id ASC
         LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: i64 = row.try_get("id")?;
            let audit_status = row
                .try_get::<Option<String>, _>("audit_status")?
                .map(|s| {
                    AuditStatus::parse_status(&s)
                        .ok_or_else(|| anyhow!("lead {id} has audit with unknown status {s}"))
                })
                .transpose()?;
            let priority = row
                .try_get::<Option<String>, _>("priority")?
                .map(|s| {
                    Priority::parse_priority(&s)
                        .ok_or_else(|| anyhow!("lead {id} has outreach with unknown priority {s}"))
                })
                .transpose()?;
            Ok(LeadOverview {
                id,
                business_name: row.try_get("business_name")?,
                website_url: row.try_get("website_url")?,
                email: row.try_get("email")?,
                audit_status,
                audited_at: parse_opt_ts(row.try_get("audited_at")?)?,
                priority,
                qualification_score: opt_score_from_db(
                    row.try_get("qualification_score")?,
                    "qualification_score",
                )?,
                sent_at: parse_opt_ts(row.try_get("sent_at")?)?,
            })
        })
        .collect()
}

// ---- audits --------------------------------------------------------------

fn audit_from_row(row: &SqliteRow) -> Result<AuditRecord> {
    let id: i64 = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = AuditStatus::parse_status(&status_str)
        .ok_or_else(|| anyhow!("audit {} has unknown status {}", id, status_str))?;
    let issues_json: String = row.try_get("issues")?;
    let issues: Vec<Issue> = serde_json::from_str(&issues_json)
        .with_context(|| format!("audit {id} has invalid issues JSON"))?;
    let raw_json: String = row.try_get("raw_data")?;
    let raw = serde_json::from_str(&raw_json)
        .with_context(|| format!("audit {id} has invalid raw_data JSON"))?;
    let audited_at: String = row.try_get("audited_at")?;
    let load_time: Option<i64> = row.try_get("load_time_ms")?;
    let h1_count: i64 = row.try_get("h1_count")?;

    Ok(AuditRecord {
        id,
        lead_id: row.try_get("lead_id")?,
        audited_at: parse_ts(&audited_at)?,
        findings: AuditFindings {
            performance_score: opt_score_from_db(
                row.try_get("performance_score")?,
                "performance_score",
            )?,
            seo_score: opt_score_from_db(row.try_get("seo_score")?, "seo_score")?,
            accessibility_score: opt_score_from_db(
                row.try_get("accessibility_score")?,
                "accessibility_score",
            )?,
            mobile_friendly: row.try_get("mobile_friendly")?,
            tls_valid: row.try_get("tls_valid")?,
            load_time_ms: load_time.map(|v| v.max(0) as u64),
            metadata: PageMetadata {
                has_title: row.try_get("has_title")?,
                has_meta_description: row.try_get("has_meta_description")?,
                has_viewport: row.try_get("has_viewport")?,
                has_open_graph: row.try_get("has_open_graph")?,
                has_favicon: row.try_get("has_favicon")?,
                h1_count: h1_count.max(0) as u32,
                title: row.try_get("page_title")?,
            },
            issues,
            status,
            error: row.try_get("error_message")?,
            raw,
        },
    })
}

/// Append one audit attempt for a lead.
#[instrument(skip_all, fields(lead_id = lead_id, status = %findings.status))]
pub async fn insert_audit(pool: &Pool, lead_id: i64, findings: &AuditFindings) -> Result<i64> {
    let issues = serde_json::to_string(&findings.issues)?;
    let raw = serde_json::to_string(&findings.raw)?;
    let meta = &findings.metadata;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO audits (
            lead_id, performance_score, seo_score, accessibility_score,
            mobile_friendly, tls_valid, load_time_ms,
            has_title, has_meta_description, has_viewport, has_open_graph, has_favicon,
            h1_count, page_title, issues, status, error_message, raw_data, audited_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(lead_id)
    .bind(findings.performance_score.map(i64::from))
    .bind(findings.seo_score.map(i64::from))
    .bind(findings.accessibility_score.map(i64::from))
    .bind(findings.mobile_friendly)
    .bind(findings.tls_valid)
    .bind(findings.load_time_ms.map(|v| v as i64))
    .bind(meta.has_title)
    .bind(meta.has_meta_description)
    .bind(meta.has_viewport)
    .bind(meta.has_open_graph)
    .bind(meta.has_favicon)
    .bind(i64::from(meta.h1_count))
    .bind(&meta.title)
    .bind(issues)
    .bind(findings.status.as_str())
    .bind(&findings.error)
    .bind(raw)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Most recent audit for a lead (highest id).
#[instrument(skip_all)]
pub async fn latest_audit(pool: &Pool, lead_id: i64) -> Result<Option<AuditRecord>> {
    let row = sqlx::query("SELECT * FROM audits WHERE lead_id = ? ORDER BY id DESC LIMIT 1")
        .bind(lead_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(audit_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn delete_audits_for_lead(pool: &Pool, lead_id: i64) -> Result<u64> {
    let res = sqlx::query("DELETE FROM audits WHERE lead_id = ?")
        .bind(lead_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

// ---- outreach ------------------------------------------------------------

fn outreach_from_row(row: &SqliteRow) -> Result<OutreachRecord> {
    let id: i64 = row.try_get("id")?;
    let source_str: String = row.try_get("source")?;
    let source = MessageSource::parse_source(&source_str)
        .ok_or_else(|| anyhow!("outreach {} has unknown source {}", id, source_str))?;
    let priority_str: String = row.try_get("priority")?;
    let priority = Priority::parse_priority(&priority_str)
        .ok_or_else(|| anyhow!("outreach {} has unknown priority {}", id, priority_str))?;
    let generated_at: String = row.try_get("generated_at")?;

    Ok(OutreachRecord {
        id,
        lead_id: row.try_get("lead_id")?,
        subject: row.try_get("subject_line")?,
        body: row.try_get("email_body")?,
        rationale: row.try_get("rationale")?,
        source,
        qualification_score: score_from_db(
            row.try_get("qualification_score")?,
            "qualification_score",
        )?,
        composite_score: score_from_db(row.try_get("composite_score")?, "composite_score")?,
        priority,
        campaign_id: row.try_get("campaign_id")?,
        version: row.try_get("version")?,
        generated_at: parse_ts(&generated_at)?,
        lifecycle: Lifecycle {
            sent_at: parse_opt_ts(row.try_get("sent_at")?)?,
            last_attempt_at: parse_opt_ts(row.try_get("last_attempt_at")?)?,
            last_send_error: row.try_get("last_send_error")?,
            opened: row.try_get("opened")?,
            replied: row.try_get("replied")?,
            positive_reply: row.try_get("positive_reply")?,
            reply_received_at: parse_opt_ts(row.try_get("reply_received_at")?)?,
            meeting_booked: row.try_get("meeting_booked")?,
            meeting_at: parse_opt_ts(row.try_get("meeting_at")?)?,
            client_closed: row.try_get("client_closed")?,
            deal_value: row.try_get("deal_value")?,
            notes: row.try_get("notes")?,
        },
    })
}

/// Create or overwrite the message columns of a lead's outreach row. Lifecycle
/// columns are left alone; an overwrite bumps `version`.
#[instrument(skip_all, fields(lead_id = lead_id, source = message.source.as_str()))]
pub async fn upsert_outreach(
    pool: &Pool,
    lead_id: i64,
    message: &GeneratedMessage,
    scores: OutreachScores,
    campaign_id: Option<&str>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO outreach (
            lead_id, subject_line, email_body, rationale, source,
            qualification_score, composite_score, priority, campaign_id, generated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(lead_id) DO UPDATE SET
            subject_line = excluded.subject_line,
            email_body = excluded.email_body,
            rationale = excluded.rationale,
            source = excluded.source,
            qualification_score = excluded.qualification_score,
            composite_score = excluded.composite_score,
            priority = excluded.priority,
            campaign_id = excluded.campaign_id,
            generated_at = excluded.generated_at,
            version = outreach.version + 1
         RETURNING id",
    )
    .bind(lead_id)
    .bind(&message.subject)
    .bind(&message.body)
    .bind(&message.rationale)
    .bind(message.source.as_str())
    .bind(i64::from(scores.qualification))
    .bind(i64::from(scores.composite))
    .bind(scores.priority.as_str())
    .bind(campaign_id)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn outreach_for_lead(pool: &Pool, lead_id: i64) -> Result<Option<OutreachRecord>> {
    let row = sqlx::query("SELECT * FROM outreach WHERE lead_id = ?")
        .bind(lead_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(outreach_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn outreach_by_id(pool: &Pool, outreach_id: i64) -> Result<Option<OutreachRecord>> {
    let row = sqlx::query("SELECT * FROM outreach WHERE id = ?")
        .bind(outreach_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(outreach_from_row).transpose()
}

/// Unsent outreach whose lead has an email, best qualified first.
#[instrument(skip_all)]
pub async fn pending_dispatch(pool: &Pool) -> Result<Vec<PendingSend>> {
    let rows = sqlx::query(
        "SELECT o.id AS outreach_id, o.lead_id, l.business_name, l.email,
                o.subject_line, o.email_body, o.qualification_score
         FROM outreach o JOIN leads l ON l.id = o.lead_id
         WHERE o.sent_at IS NULL AND l.email IS NOT NULL AND TRIM(l.email) != ''
         ORDER BY o.qualification_score DESC, o.id ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(PendingSend {
                outreach_id: row.try_get("outreach_id")?,
                lead_id: row.try_get("lead_id")?,
                business_name: row.try_get("business_name")?,
                email: row.try_get("email")?,
                subject: row.try_get("subject_line")?,
                body: row.try_get("email_body")?,
                qualification_score: score_from_db(
                    row.try_get("qualification_score")?,
                    "qualification_score",
                )?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn mark_sent(pool: &Pool, outreach_id: i64, at: DateTime<Utc>) -> Result<()> {
    let ts = at.to_rfc3339();
    sqlx::query(
        "UPDATE outreach SET sent_at = ?, last_attempt_at = ?, last_send_error = NULL WHERE id = ?",
    )
    .bind(&ts)
    .bind(&ts)
    .bind(outreach_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn record_send_failure(
    pool: &Pool,
    outreach_id: i64,
    at: DateTime<Utc>,
    error: &str,
) -> Result<()> {
    sqlx::query("UPDATE outreach SET last_attempt_at = ?, last_send_error = ? WHERE id = ?")
        .bind(at.to_rfc3339())
        .bind(error)
        .bind(outreach_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Successful send times at or after `since`, oldest first.
#[instrument(skip_all)]
pub async fn sent_timestamps_since(
    pool: &Pool,
    since: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let raw: Vec<String> =
        sqlx::query_scalar("SELECT sent_at FROM outreach WHERE sent_at IS NOT NULL")
            .fetch_all(pool)
            .await?;
    let mut stamps = raw
        .iter()
        .map(|s| parse_ts(s))
        .collect::<Result<Vec<_>>>()?;
    stamps.retain(|ts| *ts >= since);
    stamps.sort();
    Ok(stamps)
}

/// Most recent send attempt of any outcome, across all runs.
#[instrument(skip_all)]
pub async fn last_send_attempt(pool: &Pool) -> Result<Option<DateTime<Utc>>> {
    let raw: Vec<String> = sqlx::query_scalar(
        "SELECT last_attempt_at FROM outreach WHERE last_attempt_at IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;
    let stamps = raw
        .iter()
        .map(|s| parse_ts(s))
        .collect::<Result<Vec<_>>>()?;
    Ok(stamps.into_iter().max())
}

/// Apply an outcome update to a lead's outreach. Returns false when the lead
/// has no outreach row.
#[instrument(skip_all, fields(lead_id = lead_id))]
pub async fn track_outcome(pool: &Pool, lead_id: i64, update: &OutcomeUpdate) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE outreach SET
            opened = COALESCE(?, opened),
            replied = COALESCE(?, replied),
            positive_reply = COALESCE(?, positive_reply),
            reply_received_at = COALESCE(?, reply_received_at),
            meeting_booked = COALESCE(?, meeting_booked),
            meeting_at = COALESCE(?, meeting_at),
            client_closed = COALESCE(?, client_closed),
            deal_value = COALESCE(?, deal_value),
            notes = COALESCE(?, notes)
         WHERE lead_id = ?",
    )
    .bind(update.opened)
    .bind(update.replied)
    .bind(update.positive_reply)
    .bind(update.reply_received_at.map(|t| t.to_rfc3339()))
    .bind(update.meeting_booked)
    .bind(update.meeting_at.map(|t| t.to_rfc3339()))
    .bind(update.client_closed)
    .bind(update.deal_value)
    .bind(&update.notes)
    .bind(lead_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn conversion_stats(pool: &Pool) -> Result<ConversionStats> {
    let leads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(pool)
        .await?;
    let audited: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT lead_id) FROM audits")
        .fetch_one(pool)
        .await?;
    let row = sqlx::query(
        "SELECT COUNT(*) AS generated,
                COALESCE(SUM(sent_at IS NOT NULL), 0) AS sent,
                COALESCE(SUM(opened), 0) AS opened,
                COALESCE(SUM(replied), 0) AS replied,
                COALESCE(SUM(positive_reply), 0) AS positive,
                COALESCE(SUM(meeting_booked), 0) AS meetings,
                COALESCE(SUM(client_closed), 0) AS closed,
                COALESCE(SUM(CASE WHEN client_closed THEN deal_value END), 0.0) AS revenue
         FROM outreach",
    )
    .fetch_one(pool)
    .await?;

    Ok(ConversionStats {
        leads,
        audited,
        generated: row.try_get("generated")?,
        sent: row.try_get("sent")?,
        opened: row.try_get("opened")?,
        replied: row.try_get("replied")?,
        positive: row.try_get("positive")?,
        meetings: row.try_get("meetings")?,
        closed: row.try_get("closed")?,
        revenue: row.try_get("revenue")?,
    })
}
