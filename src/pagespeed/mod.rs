use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audit::CheckError;
use crate::config;
use crate::model::{Issue, IssueCategory};
use crate::pagespeed::model::{LighthouseAudit, LighthouseResult, RunPagespeedResp};

pub mod cache;
pub mod model;

pub use cache::ResponseCache;

const PAGESPEED_API: &str = "https://www.googleapis.com/pagespeedonline/v5/runPagespeed";

/// Lighthouse audits surfaced as issues, with the wording used for them.
const TRACKED_AUDITS: &[(&str, IssueCategory, &str)] = &[
    ("meta-description", IssueCategory::MissingMetaDescription, "Missing meta description"),
    ("document-title", IssueCategory::MissingTitle, "Missing or poor page title"),
    ("viewport", IssueCategory::MissingViewport, "Not mobile optimized (no viewport meta)"),
    ("image-alt", IssueCategory::Accessibility, "Images missing alt text"),
    ("link-text", IssueCategory::Accessibility, "Non-descriptive link text"),
    ("is-crawlable", IssueCategory::Seo, "Website blocks search engine crawling"),
    ("robots-txt", IssueCategory::Seo, "Missing or misconfigured robots.txt"),
    ("canonical", IssueCategory::Seo, "Missing canonical URL"),
    ("font-display", IssueCategory::Performance, "Font loading causes layout shift"),
    ("render-blocking-resources", IssueCategory::Performance, "Render-blocking CSS/JS slowing load"),
    ("uses-optimized-images", IssueCategory::Performance, "Unoptimized images increasing load time"),
    ("uses-responsive-images", IssueCategory::Performance, "Images not properly sized for device"),
    ("uses-text-compression", IssueCategory::Performance, "Text not compressed (missing gzip/brotli)"),
    ("efficient-animated-content", IssueCategory::Performance, "Inefficient animated content"),
    ("unminified-css", IssueCategory::Performance, "CSS files not minified"),
    ("unminified-javascript", IssueCategory::Performance, "JavaScript files not minified"),
    ("unused-css-rules", IssueCategory::Performance, "Large amount of unused CSS"),
    ("unused-javascript", IssueCategory::Performance, "Large amount of unused JavaScript"),
    ("uses-long-cache-ttl", IssueCategory::Performance, "Static assets not cached properly"),
    ("redirects", IssueCategory::Redirects, "Multiple page redirects slowing load"),
    ("server-response-time", IssueCategory::Performance, "Slow server response time (TTFB)"),
    ("dom-size", IssueCategory::Performance, "Excessively large DOM size"),
    ("http-status-code", IssueCategory::HttpStatus, "Page returns unsuccessful HTTP status"),
    ("hreflang", IssueCategory::Seo, "Missing hreflang tags for international SEO"),
    ("structured-data", IssueCategory::Seo, "Missing structured data markup"),
];

const WEB_VITALS: &[(&str, &str)] = &[
    ("largest-contentful-paint", "Largest Contentful Paint"),
    ("interaction-to-next-paint", "Interaction to Next Paint"),
    ("cumulative-layout-shift", "Cumulative Layout Shift"),
    ("first-contentful-paint", "First Contentful Paint"),
    ("total-blocking-time", "Total Blocking Time"),
    ("speed-index", "Speed Index"),
];

/// Audits scoring below this are reported.
const PASSING_SCORE: f64 = 0.9;

/// Performance, SEO and accessibility assessment for one URL.
#[async_trait]
pub trait PerformanceBackend: Send + Sync {
    async fn analyze(&self, url: &str) -> Result<PerformanceReport, CheckError>;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebVital {
    pub audit: String,
    pub label: String,
    pub value: String,
    pub score: u8,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceReport {
    pub performance: u8,
    pub seo: u8,
    pub accessibility: u8,
    pub best_practices: u8,
    /// Lighthouse viewport audit passed.
    pub viewport_ok: bool,
    pub web_vitals: Vec<WebVital>,
    pub issues: Vec<Issue>,
}

fn to_percent(score: Option<f64>) -> u8 {
    score
        .map(|s| (s * 100.0).round().clamp(0.0, 100.0) as u8)
        .unwrap_or(0)
}

impl PerformanceReport {
    pub fn from_lighthouse(lh: &LighthouseResult) -> Self {
        let category = |name: &str| to_percent(lh.categories.get(name).and_then(|c| c.score));

        let web_vitals = WEB_VITALS
            .iter()
            .filter_map(|(key, label)| {
                lh.audits.get(*key).map(|audit| WebVital {
                    audit: key.to_string(),
                    label: label.to_string(),
                    value: audit
                        .display_value
                        .clone()
                        .unwrap_or_else(|| "N/A".to_string()),
                    score: to_percent(audit.score),
                })
            })
            .collect();

        Self {
            performance: category("performance"),
            seo: category("seo"),
            accessibility: category("accessibility"),
            best_practices: category("best-practices"),
            viewport_ok: lh.audits.get("viewport").and_then(|a| a.score) == Some(1.0),
            web_vitals,
            issues: failing_audits(&lh.audits),
        }
    }
}

/// Tracked audits scoring under 0.9, critical (score 0) first, then by score.
fn failing_audits(audits: &std::collections::HashMap<String, LighthouseAudit>) -> Vec<Issue> {
    let mut scored: Vec<(f64, Issue)> = TRACKED_AUDITS
        .iter()
        .filter_map(|(key, category, description)| {
            let audit = audits.get(*key)?;
            let score = audit.score?;
            if score >= PASSING_SCORE {
                return None;
            }
            let issue = if score == 0.0 {
                Issue::critical(*category, *description)
            } else {
                Issue::warning(*category, *description)
            };
            let issue = match &audit.display_value {
                Some(detail) => issue.with_detail(detail.clone()),
                None => issue,
            };
            Some((score, issue))
        })
        .collect();
    scored.sort_by(|(a_score, a), (b_score, b)| {
        b.is_critical()
            .cmp(&a.is_critical())
            .then(a_score.total_cmp(b_score))
    });
    scored.into_iter().map(|(_, issue)| issue).collect()
}

/// PageSpeed Insights v5 client.
#[derive(Clone)]
pub struct PageSpeedClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    strategy: String,
    cache: Option<ResponseCache>,
}

impl fmt::Debug for PageSpeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSpeedClient")
            .field("base_url", &self.base_url)
            .field("strategy", &self.strategy)
            .field("cache", &self.cache.as_ref().map(|c| c.dir()))
            .finish_non_exhaustive()
    }
}

impl PageSpeedClient {
    pub fn from_config(cfg: &config::PageSpeed) -> Result<Self> {
        let base_url = Url::parse(PAGESPEED_API).context("invalid PageSpeed URL")?;
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &config::PageSpeed, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("leadgen/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build PageSpeed HTTP client")?;
        // Placeholder keys from sample configs are treated as absent.
        let api_key = Some(cfg.api_key.trim())
            .filter(|k| !k.is_empty() && !k.starts_with("your_"))
            .map(str::to_string);
        let cache = Some(cfg.cache_dir.trim())
            .filter(|d| !d.is_empty())
            .map(|d| ResponseCache::new(d, cfg.cache_ttl_days));
        Ok(Self {
            http,
            base_url,
            api_key,
            strategy: cfg.strategy.clone(),
            cache,
        })
    }

    pub fn build_request(&self, target: &str) -> Result<reqwest::Request> {
        let mut query: Vec<(&str, &str)> = vec![
            ("url", target),
            ("strategy", self.strategy.as_str()),
            ("category", "performance"),
            ("category", "seo"),
            ("category", "accessibility"),
            ("category", "best-practices"),
        ];
        if let Some(key) = &self.api_key {
            query.push(("key", key.as_str()));
        }
        self.http
            .get(self.base_url.clone())
            .query(&query)
            .build()
            .context("failed to build PageSpeed request")
    }
}

fn report_from_response(response: Value) -> Result<PerformanceReport, CheckError> {
    let payload: RunPagespeedResp = serde_json::from_value(response)
        .map_err(|e| CheckError::Malformed(format!("invalid PageSpeed JSON: {e}")))?;
    let lighthouse = payload.lighthouse_result.ok_or_else(|| {
        CheckError::Malformed("PageSpeed response has no lighthouseResult".to_string())
    })?;
    Ok(PerformanceReport::from_lighthouse(&lighthouse))
}

#[async_trait]
impl PerformanceBackend for PageSpeedClient {
    async fn analyze(&self, url: &str) -> Result<PerformanceReport, CheckError> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.load(url, &self.strategy, Utc::now()).await {
                match report_from_response(cached) {
                    Ok(report) => {
                        debug!(url, "PageSpeed result served from cache");
                        return Ok(report);
                    }
                    Err(err) => debug!(url, %err, "cached PageSpeed result unusable"),
                }
            }
        }

        let request = self
            .build_request(url)
            .map_err(|e| CheckError::Malformed(format!("{e:#}")))?;
        debug!(url, strategy = %self.strategy, "running PageSpeed analysis");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|e| CheckError::from_transport("PageSpeed API", &e))?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(url, "PageSpeed API rate limited; skipping");
            return Err(CheckError::RateLimited(
                "PageSpeed API quota exceeded".to_string(),
            ));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(url, %status, "PageSpeed API error");
            return Err(CheckError::Http {
                status: status.as_u16(),
                detail: body.chars().take(200).collect(),
            });
        }

        let response: Value = res
            .json()
            .await
            .map_err(|e| CheckError::Malformed(format!("invalid PageSpeed JSON: {e}")))?;
        let report = report_from_response(response.clone())?;
        if let Some(cache) = &self.cache {
            match cache.store(url, &self.strategy, Utc::now(), &response).await {
                Ok(()) => info!(url, "PageSpeed result cached"),
                Err(err) => warn!(url, ?err, "could not cache PageSpeed result"),
            }
        }
        Ok(report)
    }
}
