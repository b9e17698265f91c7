//! Deterministic lead scoring: audit findings in, composite score and
//! priority tier out.
use serde::Serialize;
use std::fmt;

use crate::config::Scoring as ScoringWeights;
use crate::error::PipelineError;
use crate::model::{AuditFindings, AuditStatus, Priority, Severity};

/// Critical issues needed to lift a COLD lead to WARM.
pub const TIE_BREAK_CRITICAL: usize = 3;
const WEIGHT_TOLERANCE: f64 = 1e-6;
/// Score assumed when the page load was never timed.
const UNMEASURED_LOAD_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Performance,
    Seo,
    Accessibility,
    Mobile,
    Tls,
    Metadata,
    LoadSpeed,
}

impl Factor {
    pub const ALL: [Factor; 7] = [
        Factor::Performance,
        Factor::Seo,
        Factor::Accessibility,
        Factor::Mobile,
        Factor::Tls,
        Factor::Metadata,
        Factor::LoadSpeed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Performance => "performance",
            Factor::Seo => "seo",
            Factor::Accessibility => "accessibility",
            Factor::Mobile => "mobile",
            Factor::Tls => "tls",
            Factor::Metadata => "metadata",
            Factor::LoadSpeed => "load_speed",
        }
    }

    fn weight(&self, w: &ScoringWeights) -> f64 {
        match self {
            Factor::Performance => w.performance,
            Factor::Seo => w.seo,
            Factor::Accessibility => w.accessibility,
            Factor::Mobile => w.mobile,
            Factor::Tls => w.tls,
            Factor::Metadata => w.metadata,
            Factor::LoadSpeed => w.load_speed,
        }
    }

    /// Service that addresses a weak factor. Load speed has none.
    fn service(&self) -> Option<Service> {
        match self {
            Factor::Performance => Some(Service::PerformanceOptimization),
            Factor::Seo => Some(Service::SeoImprovement),
            Factor::Accessibility => Some(Service::AccessibilityFix),
            Factor::Mobile => Some(Service::MobileResponsiveness),
            Factor::Tls => Some(Service::SecuritySetup),
            Factor::Metadata => Some(Service::SeoFoundation),
            Factor::LoadSpeed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Service {
    PerformanceOptimization,
    SeoImprovement,
    AccessibilityFix,
    MobileResponsiveness,
    SecuritySetup,
    SeoFoundation,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::PerformanceOptimization => "Performance Optimization",
            Service::SeoImprovement => "SEO Improvement",
            Service::AccessibilityFix => "Accessibility & UX Fix",
            Service::MobileResponsiveness => "Mobile Responsiveness",
            Service::SecuritySetup => "Security Setup",
            Service::SeoFoundation => "SEO Foundation",
        }
    }

    /// One-line pain statement used when pitching this service.
    pub fn pitch(&self) -> &'static str {
        match self {
            Service::PerformanceOptimization => {
                "Your website loads slowly, causing visitors to leave before seeing your services."
            }
            Service::SeoImprovement => {
                "Your website is nearly invisible in search results. Competitors are getting your potential customers."
            }
            Service::AccessibilityFix => {
                "Your website has accessibility issues that could limit your audience and create legal risk."
            }
            Service::MobileResponsiveness => {
                "Over 60% of web traffic is mobile. Your website doesn't work properly on phones."
            }
            Service::SecuritySetup => {
                "Your website shows a \"Not Secure\" warning to visitors, destroying trust immediately."
            }
            Service::SeoFoundation => {
                "Your website is missing basic SEO tags that search engines need to find and display your business."
            }
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived scoring for one audit. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    pub composite: u8,
    pub priority: Priority,
    /// Per-factor 0..=100 scores in [`Factor::ALL`] order.
    pub factors: Vec<(Factor, u8)>,
    pub critical_issues: usize,
    pub warning_issues: usize,
    pub tie_break_applied: bool,
    pub qualification: u8,
    pub recommended_service: Service,
}

impl ScoreResult {
    pub fn factor(&self, factor: Factor) -> u8 {
        self.factors
            .iter()
            .find(|(f, _)| *f == factor)
            .map(|(_, s)| *s)
            .unwrap_or(0)
    }

    /// Plain-text report with a bar per factor.
    pub fn report(&self) -> String {
        let rule = "=".repeat(50);
        let mut lines = vec![
            rule.clone(),
            "LEAD SCORE REPORT".to_string(),
            rule.clone(),
            String::new(),
            format!("Composite Score: {}/100", self.composite),
            format!("Priority:        {}", self.priority),
            format!("Qualification:   {}/100", self.qualification),
            String::new(),
            "--- Individual Scores ---".to_string(),
        ];
        for (factor, score) in &self.factors {
            let filled = usize::from(*score / 5);
            let bar = format!("{}{}", "█".repeat(filled), "░".repeat(20 - filled));
            lines.push(format!("  {:15} {} {:3}/100", factor.as_str(), bar, score));
        }
        lines.push(String::new());
        lines.push(format!(
            "Issues: {} critical, {} warnings",
            self.critical_issues, self.warning_issues
        ));
        if self.tie_break_applied {
            lines.push("Tier raised COLD -> WARM on critical issue count".to_string());
        }
        lines.push(format!("Recommended Service: {}", self.recommended_service));
        lines.push(rule);
        lines.join("\n")
    }
}

/// Pure scorer. Weights are validated once at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Result<Self, PipelineError> {
        let values = Factor::ALL.map(|f| f.weight(&weights));
        if values.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PipelineError::Validation(
                "scoring weights must be non-negative".into(),
            ));
        }
        let total: f64 = values.iter().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(PipelineError::Validation(format!(
                "scoring weights sum to {total}, expected 1.0"
            )));
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, audit: &AuditFindings) -> Result<ScoreResult, PipelineError> {
        validate(audit)?;

        let factors: Vec<(Factor, u8)> = Factor::ALL
            .iter()
            .map(|f| (*f, factor_score(*f, audit)))
            .collect();

        let weighted: f64 = factors
            .iter()
            .map(|(f, s)| f64::from(*s) * f.weight(&self.weights))
            .sum();
        let composite = weighted.round_ties_even().clamp(0.0, 100.0) as u8;

        let critical_issues = audit.critical_issue_count();
        let warning_issues = audit
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();

        let band = Priority::from_composite(composite);
        let tie_break_applied = band == Priority::Cold && critical_issues >= TIE_BREAK_CRITICAL;
        let priority = if tie_break_applied {
            Priority::Warm
        } else {
            band
        };

        Ok(ScoreResult {
            composite,
            priority,
            recommended_service: recommend_service(&factors),
            qualification: qualification(composite, critical_issues),
            factors,
            critical_issues,
            warning_issues,
            tie_break_applied,
        })
    }
}

fn validate(audit: &AuditFindings) -> Result<(), PipelineError> {
    let subs = [
        ("performance", audit.performance_score),
        ("seo", audit.seo_score),
        ("accessibility", audit.accessibility_score),
    ];
    for (name, score) in subs {
        match (score, audit.status) {
            (Some(s), _) if s > 100 => {
                return Err(PipelineError::Validation(format!(
                    "{name} score {s} exceeds 100"
                )))
            }
            (None, AuditStatus::Completed) => {
                return Err(PipelineError::Validation(format!(
                    "completed audit is missing the {name} score"
                )))
            }
            (Some(s), AuditStatus::Failed) if s != 0 => {
                return Err(PipelineError::Validation(format!(
                    "failed audit carries a non-zero {name} score ({s})"
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

fn binary(flag: bool) -> u8 {
    if flag {
        100
    } else {
        0
    }
}

fn load_speed_score(load_time_ms: Option<u64>) -> u8 {
    match load_time_ms {
        None => UNMEASURED_LOAD_SCORE,
        Some(ms) if ms <= 1000 => 100,
        Some(ms) if ms >= 5000 => 0,
        Some(ms) => (100.0 - (ms - 1000) as f64 / 4000.0 * 100.0) as u8,
    }
}

fn factor_score(factor: Factor, audit: &AuditFindings) -> u8 {
    match factor {
        Factor::Performance => audit.performance_score.unwrap_or(0),
        Factor::Seo => audit.seo_score.unwrap_or(0),
        Factor::Accessibility => audit.accessibility_score.unwrap_or(0),
        Factor::Mobile => binary(audit.mobile_friendly),
        Factor::Tls => binary(audit.tls_valid),
        Factor::Metadata => audit.metadata.present_count() * 20,
        Factor::LoadSpeed => load_speed_score(audit.load_time_ms),
    }
}

/// Outreach worthiness: inverse of quality plus up to 25 for critical issues.
pub fn qualification(composite: u8, critical_issues: usize) -> u8 {
    let boost = (critical_issues.saturating_mul(5)).min(25) as u16;
    let base = 100u16.saturating_sub(u16::from(composite));
    (base + boost).min(100) as u8
}

/// Weakest factor wins; earlier factors win ties.
fn recommend_service(factors: &[(Factor, u8)]) -> Service {
    factors
        .iter()
        .filter_map(|(f, s)| f.service().map(|svc| (svc, *s)))
        .fold(None::<(Service, u8)>, |best, (svc, s)| match best {
            Some((_, best_score)) if best_score <= s => best,
            _ => Some((svc, s)),
        })
        .map(|(svc, _)| svc)
        .unwrap_or(Service::PerformanceOptimization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, IssueCategory, PageMetadata};
    use serde_json::Value;

    fn engine() -> ScoringEngine {
        ScoringEngine::new(ScoringWeights::default()).unwrap()
    }

    fn findings(perf: u8, seo: u8, a11y: u8) -> AuditFindings {
        AuditFindings {
            performance_score: Some(perf),
            seo_score: Some(seo),
            accessibility_score: Some(a11y),
            mobile_friendly: true,
            tls_valid: true,
            load_time_ms: Some(800),
            metadata: PageMetadata {
                has_title: true,
                has_meta_description: true,
                has_viewport: true,
                has_open_graph: true,
                has_favicon: true,
                h1_count: 1,
                title: Some("t".into()),
            },
            issues: vec![],
            status: AuditStatus::Completed,
            error: None,
            raw: Value::Null,
        }
    }

    fn criticals(n: usize) -> Vec<Issue> {
        (0..n)
            .map(|i| Issue::critical(IssueCategory::Performance, format!("issue {i}")))
            .collect()
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((ScoringWeights::default().total() - 1.0).abs() < 1e-9);
        let mut bad = ScoringWeights::default();
        bad.tls = 0.2;
        assert!(matches!(
            ScoringEngine::new(bad),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn perfect_site_scores_100_and_is_skipped() {
        let result = engine().score(&findings(100, 100, 100)).unwrap();
        assert_eq!(result.composite, 100);
        assert_eq!(result.priority, Priority::Skip);
        assert_eq!(result.qualification, 0);
    }

    #[test]
    fn scoring_is_deterministic() {
        let audit = findings(37, 64, 81);
        let a = engine().score(&audit).unwrap();
        let b = engine().score(&audit).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn weighted_composite_matches_hand_calculation() {
        // 0.25*42 + 0.20*60 + 0.15*80 + 0.15*0 + 0.10*100 + 0.10*60 + 0.05*50 = 53
        let mut audit = findings(42, 60, 80);
        audit.mobile_friendly = false;
        audit.metadata.has_viewport = false;
        audit.metadata.has_favicon = false;
        audit.load_time_ms = None;
        let result = engine().score(&audit).unwrap();
        assert_eq!(result.factor(Factor::Metadata), 60);
        assert_eq!(result.factor(Factor::LoadSpeed), 50);
        assert_eq!(result.composite, 53);
        assert_eq!(result.priority, Priority::Warm);
        assert_eq!(result.recommended_service, Service::MobileResponsiveness);
    }

    #[test]
    fn load_speed_is_linear_between_one_and_five_seconds() {
        assert_eq!(load_speed_score(Some(1000)), 100);
        assert_eq!(load_speed_score(Some(3000)), 50);
        assert_eq!(load_speed_score(Some(4000)), 25);
        assert_eq!(load_speed_score(Some(5000)), 0);
        assert_eq!(load_speed_score(Some(12_000)), 0);
    }

    #[test]
    fn tier_boundaries() {
        // composite = 0.25*p + 0.20*s + 0.15*a + 40 with everything else perfect
        let cases = [
            ((36, 0, 0), 49, Priority::Hot),
            ((40, 0, 0), 50, Priority::Warm),
            ((100, 100, 0), 85, Priority::Skip),
            ((100, 95, 0), 84, Priority::Cold),
            // 84.5 rounds half to even
            ((98, 100, 0), 84, Priority::Cold),
        ];
        for ((p, s, a), composite, tier) in cases {
            let result = engine().score(&findings(p, s, a)).unwrap();
            assert_eq!(result.composite, composite, "inputs {p}/{s}/{a}");
            assert_eq!(result.priority, tier, "composite {composite}");
        }
    }

    #[test]
    fn cold_with_three_criticals_becomes_warm() {
        let mut audit = findings(60, 60, 60);
        let base = engine().score(&audit).unwrap();
        assert_eq!(base.priority, Priority::Cold);

        audit.issues = criticals(2);
        assert_eq!(engine().score(&audit).unwrap().priority, Priority::Cold);

        audit.issues = criticals(3);
        let boosted = engine().score(&audit).unwrap();
        assert_eq!(boosted.priority, Priority::Warm);
        assert!(boosted.tie_break_applied);
        assert_eq!(boosted.composite, base.composite);
    }

    #[test]
    fn criticals_never_raise_other_tiers() {
        let mut audit = findings(100, 100, 100);
        audit.issues = criticals(6);
        let result = engine().score(&audit).unwrap();
        assert_eq!(result.priority, Priority::Skip);
        assert!(!result.tie_break_applied);

        let mut audit = findings(40, 0, 0);
        audit.issues = criticals(6);
        assert_eq!(engine().score(&audit).unwrap().priority, Priority::Warm);
    }

    #[test]
    fn qualification_caps_boost_and_total() {
        assert_eq!(qualification(60, 0), 40);
        assert_eq!(qualification(60, 2), 50);
        assert_eq!(qualification(60, 9), 65);
        assert_eq!(qualification(10, 9), 100);
    }

    #[test]
    fn partial_audit_scores_absent_subscores_as_zero() {
        let mut audit = findings(0, 0, 0);
        audit.status = AuditStatus::Partial;
        audit.performance_score = None;
        audit.seo_score = None;
        audit.accessibility_score = None;
        let result = engine().score(&audit).unwrap();
        // mobile 15 + tls 10 + metadata 10 + load 5
        assert_eq!(result.composite, 40);
        assert_eq!(result.priority, Priority::Hot);
        assert_eq!(result.recommended_service, Service::PerformanceOptimization);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let mut audit = findings(50, 50, 50);
        audit.performance_score = Some(101);
        assert!(engine().score(&audit).is_err());

        let mut audit = findings(50, 50, 50);
        audit.seo_score = None;
        assert!(engine().score(&audit).is_err());

        let mut audit = findings(50, 0, 0);
        audit.status = AuditStatus::Failed;
        assert!(engine().score(&audit).is_err());
    }

    #[test]
    fn failed_audit_with_zero_scores_is_hot() {
        let audit = AuditFindings {
            performance_score: Some(0),
            seo_score: Some(0),
            accessibility_score: Some(0),
            mobile_friendly: false,
            tls_valid: false,
            load_time_ms: None,
            metadata: PageMetadata::default(),
            issues: criticals(1),
            status: AuditStatus::Failed,
            error: Some("unreachable".into()),
            raw: Value::Null,
        };
        let result = engine().score(&audit).unwrap();
        assert!(result.composite < 5);
        assert_eq!(result.priority, Priority::Hot);
        assert_eq!(result.qualification, 100);
    }

    #[test]
    fn report_lists_every_factor() {
        let report = engine().score(&findings(40, 60, 80)).unwrap().report();
        for factor in Factor::ALL {
            assert!(report.contains(factor.as_str()));
        }
        assert!(report.contains("Recommended Service: Performance Optimization"));
    }
}
