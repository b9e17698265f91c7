use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use leadgen::audit::{AuditAggregator, CheckError, PageFetch, SiteProbe, TlsReport};
use leadgen::config::Scoring;
use leadgen::db::{self, InsertOutcome};
use leadgen::export::CsvExporter;
use leadgen::model::{AuditStatus, MessageSource, NewLead, Priority};
use leadgen::outreach::{Generator, OutreachSettings};
use leadgen::pagespeed::{PerformanceBackend, PerformanceReport};
use leadgen::pipeline::{Pipeline, RunOptions, Stage};
use leadgen::scoring::ScoringEngine;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

const COMPLETE_HTML: &str = r#"<html><head><title>Shop</title>
    <meta name="description" content="d"><meta name="viewport" content="width=device-width">
    <meta property="og:title" content="Shop"><link rel="icon" href="/favicon.ico">
    </head><body><h1>Shop</h1></body></html>"#;
const BARE_HTML: &str = "<html><head><title>Shop</title></head><body><p>hi</p></body></html>";

/// Behaviour is picked from the host name: `panic`, `down`, `perfect`,
/// `meh`, anything else is a poor site.
struct FakeWeb;

fn page(html: &str, load_time_ms: u64) -> PageFetch {
    PageFetch {
        final_url: "https://site.test/".into(),
        status: 200,
        load_time_ms,
        redirects: 0,
        html: html.into(),
    }
}

fn report(performance: u8, seo: u8, accessibility: u8) -> PerformanceReport {
    PerformanceReport {
        performance,
        seo,
        accessibility,
        best_practices: 90,
        viewport_ok: true,
        web_vitals: vec![],
        issues: vec![],
    }
}

#[async_trait]
impl SiteProbe for FakeWeb {
    async fn fetch_page(&self, url: &str) -> Result<PageFetch, CheckError> {
        if url.contains("panic") {
            panic!("probe exploded on {url}");
        }
        if url.contains("down") {
            return Err(CheckError::Connect("connection refused".into()));
        }
        if url.contains("perfect") || url.contains("meh") {
            return Ok(page(COMPLETE_HTML, 500));
        }
        Ok(page(BARE_HTML, 6000))
    }

    async fn check_tls(&self, url: &str) -> Result<TlsReport, CheckError> {
        Ok(TlsReport {
            valid: url.contains("perfect") || url.contains("meh"),
            detail: None,
        })
    }
}

#[async_trait]
impl PerformanceBackend for FakeWeb {
    async fn analyze(&self, url: &str) -> Result<PerformanceReport, CheckError> {
        if url.contains("perfect") {
            Ok(report(100, 100, 100))
        } else if url.contains("meh") {
            Ok(report(40, 50, 50))
        } else {
            Ok(report(30, 50, 60))
        }
    }
}

fn engine() -> ScoringEngine {
    ScoringEngine::new(Scoring::default()).unwrap()
}

fn aggregator() -> AuditAggregator {
    AuditAggregator::new(Arc::new(FakeWeb), Arc::new(FakeWeb), 3000)
}

fn pipeline(pool: &sqlx::SqlitePool, export_dir: Option<&std::path::Path>) -> Pipeline {
    let generator = Generator::new(
        None,
        OutreachSettings {
            sender_name: "Jamie Rivera".into(),
            unsubscribe_url: None,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        },
    );
    let exporter = export_dir.map(|d| {
        Box::new(CsvExporter::new(d)) as Box<dyn leadgen::export::Exporter>
    });
    Pipeline::new(pool.clone(), aggregator(), engine(), generator, exporter)
}

fn opts(audit_limit: usize, generate_limit: usize) -> RunOptions {
    RunOptions {
        audit_limit,
        generate_limit,
        run_id: "run-test".into(),
    }
}

async fn add_lead(pool: &sqlx::SqlitePool, name: &str, url: &str) -> i64 {
    match db::insert_lead(pool, &NewLead::new(name, url)).await.unwrap() {
        InsertOutcome::Created(id) => id,
        InsertOutcome::Duplicate => panic!("duplicate fixture {url}"),
    }
}

async fn audit_count(pool: &sqlx::SqlitePool, lead_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM audits WHERE lead_id = ?")
        .bind(lead_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn panicking_audit_does_not_abort_the_batch() {
    let pool = setup_pool().await;
    let first = add_lead(&pool, "First Bakery", "https://first.test").await;
    let broken = add_lead(&pool, "Broken Bakery", "https://panic.test").await;
    let last = add_lead(&pool, "Last Bakery", "https://last.test").await;

    let summary = pipeline(&pool, None)
        .run(&opts(10, 10), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.audit.attempted, 3);
    assert_eq!(summary.audit.succeeded, 2);
    assert_eq!(summary.audit.failed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].lead_id, Some(broken));
    assert_eq!(summary.errors[0].stage, Stage::Audit);
    assert!(summary.errors[0].message.contains("probe exploded"));

    assert_eq!(audit_count(&pool, first).await, 1);
    assert_eq!(audit_count(&pool, broken).await, 0);
    assert_eq!(audit_count(&pool, last).await, 1);

    assert_eq!(summary.generation.succeeded, 2);
    for lead_id in [first, last] {
        let outreach = db::outreach_for_lead(&pool, lead_id).await.unwrap().unwrap();
        assert_eq!(outreach.source, MessageSource::Template);
        assert_eq!(outreach.campaign_id.as_deref(), Some("run-test"));
        assert_eq!(outreach.priority, Priority::Hot);
    }
}

#[tokio::test]
async fn persisted_audit_rescores_identically() {
    let pool = setup_pool().await;
    let lead_id = add_lead(&pool, "Poor Plumbing", "https://poor.test").await;
    let lead = db::lead_by_id(&pool, lead_id).await.unwrap().unwrap();

    let record = aggregator().audit_and_persist(&pool, &lead).await.unwrap();
    let fresh = engine().score(&record.findings).unwrap();

    let stored = db::latest_audit(&pool, lead_id).await.unwrap().unwrap();
    assert_eq!(stored.id, record.id);
    assert_eq!(stored.findings.issues, record.findings.issues);
    assert_eq!(engine().score(&stored.findings).unwrap(), fresh);
}

#[tokio::test]
async fn generation_takes_best_qualified_first() {
    let pool = setup_pool().await;
    let meh = add_lead(&pool, "Meh Dental", "https://meh.test").await;
    let poor = add_lead(&pool, "Poor Dental", "https://poor.test").await;

    let p = pipeline(&pool, None);
    let summary = p.run(&opts(10, 1), &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.scoring.succeeded, 2);
    assert_eq!(summary.generation.attempted, 1);
    assert!(db::outreach_for_lead(&pool, poor).await.unwrap().is_some());
    assert!(db::outreach_for_lead(&pool, meh).await.unwrap().is_none());

    let summary = p.run(&opts(10, 1), &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.audit.attempted, 0);
    assert_eq!(summary.generation.succeeded, 1);
    let outreach = db::outreach_for_lead(&pool, meh).await.unwrap().unwrap();
    assert_eq!(outreach.priority, Priority::Warm);
}

#[tokio::test]
async fn skip_tier_gets_no_message() {
    let pool = setup_pool().await;
    let lead_id = add_lead(&pool, "Perfect Pilates", "https://perfect.test").await;

    let summary = pipeline(&pool, None)
        .run(&opts(10, 10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.scoring.succeeded, 1);
    assert_eq!(summary.skipped_tiers.get(&Priority::Skip), Some(&1));
    assert_eq!(summary.generation.attempted, 0);
    assert!(db::outreach_for_lead(&pool, lead_id).await.unwrap().is_none());
}

#[tokio::test]
async fn unreachable_site_is_failed_audit_but_still_contacted() {
    let pool = setup_pool().await;
    let lead_id = add_lead(&pool, "Gone Garage", "https://down.test").await;

    let summary = pipeline(&pool, None)
        .run(&opts(10, 10), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.audit.succeeded, 1);

    let audit = db::latest_audit(&pool, lead_id).await.unwrap().unwrap();
    assert_eq!(audit.findings.status, AuditStatus::Failed);
    assert_eq!(audit.findings.performance_score, Some(0));
    assert_eq!(audit.findings.seo_score, Some(0));
    assert_eq!(audit.findings.accessibility_score, Some(0));

    let outreach = db::outreach_for_lead(&pool, lead_id).await.unwrap().unwrap();
    assert_eq!(outreach.priority, Priority::Hot);
    assert!(outreach.body.contains("didn't load"));
}

#[tokio::test]
async fn cancelled_run_touches_nothing() {
    let pool = setup_pool().await;
    let lead_id = add_lead(&pool, "Idle Inn", "https://idle.test").await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = pipeline(&pool, None).run(&opts(10, 10), &cancel).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.audit.attempted, 0);
    assert_eq!(audit_count(&pool, lead_id).await, 0);
}

#[tokio::test]
async fn generated_batch_is_exported() {
    let pool = setup_pool().await;
    add_lead(&pool, "Poor Pizza", "https://poor.test").await;
    let dir = tempfile::tempdir().unwrap();

    let summary = pipeline(&pool, Some(dir.path()))
        .run(&opts(10, 10), &CancellationToken::new())
        .await
        .unwrap();
    let path = summary.export_path.expect("export written");
    assert!(path.starts_with(dir.path()));
    let mut reader = csv::Reader::from_path(&path).unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][1], "Poor Pizza");
}

#[tokio::test]
async fn reaudit_replaces_previous_audits() {
    let pool = setup_pool().await;
    let lead_id = add_lead(&pool, "Poor Pub", "https://poor.test").await;
    let p = pipeline(&pool, None);
    p.run(&opts(10, 0), &CancellationToken::new()).await.unwrap();
    let before = db::latest_audit(&pool, lead_id).await.unwrap().unwrap();

    let after = p.reaudit(lead_id).await.unwrap();
    assert!(after.id > before.id);
    assert_eq!(audit_count(&pool, lead_id).await, 1);

    assert!(p.reaudit(9999).await.is_err());
}

#[tokio::test]
async fn preview_generates_without_storing() {
    let pool = setup_pool().await;
    let lead_id = add_lead(&pool, "Poor Print Shop", "https://poor.test").await;
    let p = pipeline(&pool, None);
    p.run(&opts(10, 0), &CancellationToken::new()).await.unwrap();

    let (lead, score, message) = p.preview(lead_id).await.unwrap();
    assert_eq!(lead.id, lead_id);
    assert_eq!(score.priority, Priority::Hot);
    assert_eq!(message.source, MessageSource::Template);
    assert!(!message.subject.is_empty());
    assert!(message.body.contains("Poor Print Shop"));
    assert!(db::outreach_for_lead(&pool, lead_id).await.unwrap().is_none());

    let unaudited = add_lead(&pool, "Fresh Florist", "https://fresh.test").await;
    assert!(p.preview(unaudited).await.is_err());
}

#[tokio::test]
async fn lead_listing_shows_audit_and_outreach_state() {
    let pool = setup_pool().await;
    let done = add_lead(&pool, "Done Deli", "https://done.test").await;
    let waiting = add_lead(&pool, "Waiting Wines", "https://waiting.test").await;
    pipeline(&pool, None)
        .run(&opts(1, 10), &CancellationToken::new())
        .await
        .unwrap();

    let listed = db::list_leads(&pool, 10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, done);
    assert_eq!(listed[0].audit_status, Some(AuditStatus::Completed));
    assert_eq!(listed[0].priority, Some(Priority::Hot));
    assert!(listed[0].qualification_score.is_some());
    assert!(listed[0].sent_at.is_none());
    assert_eq!(listed[1].id, waiting);
    assert_eq!(listed[1].audit_status, None);
    assert_eq!(listed[1].priority, None);

    assert_eq!(db::list_leads(&pool, 1).await.unwrap().len(), 1);
}
