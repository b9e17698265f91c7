use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A business entity. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lead {
    pub id: i64,
    pub business_name: String,
    pub website_url: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lead fields supplied by ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewLead {
    pub business_name: String,
    pub website_url: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub source: Option<String>,
}

impl NewLead {
    pub fn new(business_name: impl Into<String>, website_url: impl Into<String>) -> Self {
        Self {
            business_name: business_name.into(),
            website_url: website_url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Completed,
    Partial,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Completed => "completed",
            AuditStatus::Partial => "partial",
            AuditStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(AuditStatus::Completed),
            "partial" => Some(AuditStatus::Partial),
            "failed" => Some(AuditStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

/// What an issue is about. Drives both the fallback phrasing and the subject
/// line template.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Unreachable,
    HttpStatus,
    NoTls,
    MissingMetaDescription,
    MissingTitle,
    MissingViewport,
    MissingOpenGraph,
    HeadingStructure,
    SlowLoad,
    Redirects,
    Performance,
    Seo,
    Accessibility,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Unreachable => "unreachable",
            IssueCategory::HttpStatus => "http_status",
            IssueCategory::NoTls => "no_tls",
            IssueCategory::MissingMetaDescription => "missing_meta_description",
            IssueCategory::MissingTitle => "missing_title",
            IssueCategory::MissingViewport => "missing_viewport",
            IssueCategory::MissingOpenGraph => "missing_open_graph",
            IssueCategory::HeadingStructure => "heading_structure",
            IssueCategory::SlowLoad => "slow_load",
            IssueCategory::Redirects => "redirects",
            IssueCategory::Performance => "performance",
            IssueCategory::Seo => "seo",
            IssueCategory::Accessibility => "accessibility",
        }
    }

    /// Short label used in rationales and reports.
    pub fn label(&self) -> &'static str {
        match self {
            IssueCategory::Unreachable => "site unreachable",
            IssueCategory::HttpStatus => "error status on homepage",
            IssueCategory::NoTls => "no valid TLS certificate",
            IssueCategory::MissingMetaDescription => "missing meta description",
            IssueCategory::MissingTitle => "missing page title",
            IssueCategory::MissingViewport => "no mobile viewport",
            IssueCategory::MissingOpenGraph => "missing social preview tags",
            IssueCategory::HeadingStructure => "heading structure",
            IssueCategory::SlowLoad => "slow page load",
            IssueCategory::Redirects => "redirect chain",
            IssueCategory::Performance => "performance",
            IssueCategory::Seo => "search visibility",
            IssueCategory::Accessibility => "accessibility",
        }
    }

    /// Categories that at most one issue may carry; the Lighthouse audit for
    /// the same thing is dropped when a direct check already flagged it.
    pub fn is_singleton(&self) -> bool {
        !matches!(
            self,
            IssueCategory::Performance | IssueCategory::Seo | IssueCategory::Accessibility
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Issue {
    pub fn critical(category: IssueCategory, description: impl Into<String>) -> Self {
        Self {
            category,
            severity: Severity::Critical,
            description: description.into(),
            detail: None,
        }
    }

    pub fn warning(category: IssueCategory, description: impl Into<String>) -> Self {
        Self {
            category,
            severity: Severity::Warning,
            description: description.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if !detail.trim().is_empty() {
            self.detail = Some(detail);
        }
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// On-page metadata found in the fetched HTML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageMetadata {
    pub has_title: bool,
    pub has_meta_description: bool,
    pub has_viewport: bool,
    pub has_open_graph: bool,
    pub has_favicon: bool,
    pub h1_count: u32,
    pub title: Option<String>,
}

impl PageMetadata {
    /// Number of the five completeness markers that are present.
    pub fn present_count(&self) -> u8 {
        [
            self.has_title,
            self.has_meta_description,
            self.has_viewport,
            self.has_open_graph,
            self.has_favicon,
        ]
        .iter()
        .filter(|present| **present)
        .count() as u8
    }
}

/// Merged outcome of every website check for one audit attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditFindings {
    pub performance_score: Option<u8>,
    pub seo_score: Option<u8>,
    pub accessibility_score: Option<u8>,
    pub mobile_friendly: bool,
    pub tls_valid: bool,
    pub load_time_ms: Option<u64>,
    pub metadata: PageMetadata,
    pub issues: Vec<Issue>,
    pub status: AuditStatus,
    pub error: Option<String>,
    pub raw: Value,
}

impl AuditFindings {
    pub fn critical_issue_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_critical()).count()
    }

    pub fn top_issue(&self) -> Option<&Issue> {
        self.issues.first()
    }
}

/// A persisted audit attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub id: i64,
    pub lead_id: i64,
    pub audited_at: DateTime<Utc>,
    pub findings: AuditFindings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    #[serde(rename = "HOT")]
    Hot,
    #[serde(rename = "WARM")]
    Warm,
    #[serde(rename = "COLD")]
    Cold,
    #[serde(rename = "SKIP")]
    Skip,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Hot => "HOT",
            Priority::Warm => "WARM",
            Priority::Cold => "COLD",
            Priority::Skip => "SKIP",
        }
    }

    pub fn parse_priority(s: &str) -> Option<Self> {
        match s {
            "HOT" => Some(Priority::Hot),
            "WARM" => Some(Priority::Warm),
            "COLD" => Some(Priority::Cold),
            "SKIP" => Some(Priority::Skip),
            _ => None,
        }
    }

    /// Band lookup. Each band includes its lower bound.
    pub fn from_composite(composite: u8) -> Self {
        match composite {
            0..=49 => Priority::Hot,
            50..=69 => Priority::Warm,
            70..=84 => Priority::Cold,
            _ => Priority::Skip,
        }
    }

    /// Tiers that get a generated message.
    pub fn warrants_outreach(&self) -> bool {
        matches!(self, Priority::Hot | Priority::Warm)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Ai,
    Template,
}

impl MessageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSource::Ai => "ai",
            MessageSource::Template => "template",
        }
    }

    pub fn parse_source(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(MessageSource::Ai),
            "template" => Some(MessageSource::Template),
            _ => None,
        }
    }
}

/// Output of the outreach generator before it is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedMessage {
    pub subject: String,
    pub body: String,
    pub rationale: String,
    pub source: MessageSource,
    /// Why the template path was taken, when it was.
    pub fallback_reason: Option<String>,
}

/// Fields mutated after generation by dispatch and outcome tracking.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Lifecycle {
    pub sent_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_send_error: Option<String>,
    pub opened: bool,
    pub replied: bool,
    pub positive_reply: bool,
    pub reply_received_at: Option<DateTime<Utc>>,
    pub meeting_booked: bool,
    pub meeting_at: Option<DateTime<Utc>>,
    pub client_closed: bool,
    pub deal_value: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutreachRecord {
    pub id: i64,
    pub lead_id: i64,
    pub subject: String,
    pub body: String,
    pub rationale: String,
    pub source: MessageSource,
    pub qualification_score: u8,
    pub composite_score: u8,
    pub priority: Priority,
    pub campaign_id: Option<String>,
    pub version: i64,
    pub generated_at: DateTime<Utc>,
    pub lifecycle: Lifecycle,
}

/// Partial update applied by outcome tracking. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeUpdate {
    pub opened: Option<bool>,
    pub replied: Option<bool>,
    pub positive_reply: Option<bool>,
    pub reply_received_at: Option<DateTime<Utc>>,
    pub meeting_booked: Option<bool>,
    pub meeting_at: Option<DateTime<Utc>>,
    pub client_closed: Option<bool>,
    pub deal_value: Option<f64>,
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bands_include_lower_bound() {
        assert_eq!(Priority::from_composite(0), Priority::Hot);
        assert_eq!(Priority::from_composite(49), Priority::Hot);
        assert_eq!(Priority::from_composite(50), Priority::Warm);
        assert_eq!(Priority::from_composite(69), Priority::Warm);
        assert_eq!(Priority::from_composite(70), Priority::Cold);
        assert_eq!(Priority::from_composite(84), Priority::Cold);
        assert_eq!(Priority::from_composite(85), Priority::Skip);
        assert_eq!(Priority::from_composite(100), Priority::Skip);
    }

    #[test]
    fn status_and_priority_parse_their_own_strings() {
        for status in [AuditStatus::Completed, AuditStatus::Partial, AuditStatus::Failed] {
            assert_eq!(AuditStatus::parse_status(status.as_str()), Some(status));
        }
        for p in [Priority::Hot, Priority::Warm, Priority::Cold, Priority::Skip] {
            assert_eq!(Priority::parse_priority(p.as_str()), Some(p));
        }
        assert_eq!(AuditStatus::parse_status("skipped"), None);
    }

    #[test]
    fn issue_category_serializes_snake_case() {
        let issue = Issue::critical(IssueCategory::NoTls, "SSL certificate missing or invalid");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["category"], "no_tls");
        assert_eq!(json["severity"], "critical");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn metadata_counts_present_markers() {
        let meta = PageMetadata {
            has_title: true,
            has_viewport: true,
            has_favicon: true,
            ..Default::default()
        };
        assert_eq!(meta.present_count(), 3);
    }
}
