//! Fixed rules turning check results into the audit issue list.
use std::collections::HashSet;

use crate::model::{Issue, IssueCategory, PageMetadata};

/// Load times above this are critical rather than a warning.
pub const CRITICAL_LOAD_MS: u64 = 5000;
/// Redirect hops tolerated before flagging.
pub const MAX_REDIRECTS: u32 = 2;

/// Everything the rules look at. `None` means the check did not produce a value.
#[derive(Debug, Default)]
pub struct IssueInputs<'a> {
    pub unreachable: Option<&'a str>,
    pub http_status: Option<u16>,
    pub tls_valid: bool,
    pub tls_detail: Option<&'a str>,
    pub metadata: Option<&'a PageMetadata>,
    pub load_time_ms: Option<u64>,
    pub redirects: u32,
    pub slow_load_threshold_ms: u64,
    pub lighthouse: &'a [Issue],
}

pub fn derive(inputs: &IssueInputs<'_>) -> Vec<Issue> {
    if let Some(reason) = inputs.unreachable {
        return vec![
            Issue::critical(IssueCategory::Unreachable, "Website could not be reached")
                .with_detail(reason),
        ];
    }

    let mut issues = Vec::new();

    if !inputs.tls_valid {
        issues.push(
            Issue::critical(IssueCategory::NoTls, "SSL certificate missing or invalid")
                .with_detail(inputs.tls_detail.unwrap_or("No valid SSL")),
        );
    }

    if let Some(status) = inputs.http_status.filter(|s| *s >= 400) {
        issues.push(Issue::critical(
            IssueCategory::HttpStatus,
            format!("Homepage returns HTTP {status}"),
        ));
    }

    if let Some(meta) = inputs.metadata {
        if !meta.has_meta_description {
            issues.push(
                Issue::warning(IssueCategory::MissingMetaDescription, "Missing meta description")
                    .with_detail("Search engines use this for result snippets"),
            );
        }
        if !meta.has_viewport {
            issues.push(
                Issue::critical(
                    IssueCategory::MissingViewport,
                    "Missing viewport meta tag (not mobile optimized)",
                )
                .with_detail("Site will display poorly on mobile devices"),
            );
        }
        if !meta.has_title {
            issues.push(Issue::warning(IssueCategory::MissingTitle, "Missing page title"));
        }
        match meta.h1_count {
            0 => issues.push(
                Issue::warning(IssueCategory::HeadingStructure, "No H1 heading found")
                    .with_detail("Bad for SEO and content structure"),
            ),
            1 => {}
            n => issues.push(
                Issue::warning(
                    IssueCategory::HeadingStructure,
                    format!("Multiple H1 headings found ({n})"),
                )
                .with_detail("Best practice is one H1 per page"),
            ),
        }
        if !meta.has_open_graph {
            issues.push(
                Issue::warning(IssueCategory::MissingOpenGraph, "Missing Open Graph tags")
                    .with_detail("Social media shares will look unprofessional"),
            );
        }
    }

    if let Some(ms) = inputs
        .load_time_ms
        .filter(|ms| *ms > inputs.slow_load_threshold_ms)
    {
        let description = format!("Slow page load ({:.1}s)", ms as f64 / 1000.0);
        let issue = if ms > CRITICAL_LOAD_MS {
            Issue::critical(IssueCategory::SlowLoad, description)
        } else {
            Issue::warning(IssueCategory::SlowLoad, description)
        };
        issues.push(issue.with_detail("Users abandon sites that take over 3 seconds"));
    }

    if inputs.redirects > MAX_REDIRECTS {
        issues.push(
            Issue::warning(
                IssueCategory::Redirects,
                format!("Too many redirects ({})", inputs.redirects),
            )
            .with_detail("Each redirect adds load time"),
        );
    }

    let flagged: HashSet<IssueCategory> = issues.iter().map(|i| i.category).collect();
    issues.extend(
        inputs
            .lighthouse
            .iter()
            .filter(|i| !(i.category.is_singleton() && flagged.contains(&i.category)))
            .cloned(),
    );

    issues.sort_by_key(|i| !i.is_critical());
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn complete_meta() -> PageMetadata {
        PageMetadata {
            has_title: true,
            has_meta_description: true,
            has_viewport: true,
            has_open_graph: true,
            has_favicon: true,
            h1_count: 1,
            title: Some("Home".into()),
        }
    }

    fn inputs<'a>(meta: Option<&'a PageMetadata>, lighthouse: &'a [Issue]) -> IssueInputs<'a> {
        IssueInputs {
            http_status: Some(200),
            tls_valid: true,
            metadata: meta,
            load_time_ms: Some(800),
            slow_load_threshold_ms: 3000,
            lighthouse,
            ..Default::default()
        }
    }

    #[test]
    fn healthy_site_has_no_issues() {
        let meta = complete_meta();
        assert!(derive(&inputs(Some(&meta), &[])).is_empty());
    }

    #[test]
    fn unreachable_is_the_only_issue() {
        let mut i = inputs(None, &[]);
        i.unreachable = Some("connection refused");
        i.tls_valid = false;
        let issues = derive(&i);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, IssueCategory::Unreachable);
        assert_eq!(issues[0].detail.as_deref(), Some("connection refused"));
    }

    #[test]
    fn slow_load_severity_and_wording() {
        let meta = complete_meta();
        let mut i = inputs(Some(&meta), &[]);
        i.load_time_ms = Some(4200);
        let issues = derive(&i);
        assert_eq!(issues[0].description, "Slow page load (4.2s)");
        assert_eq!(issues[0].severity, Severity::Warning);

        i.load_time_ms = Some(5001);
        assert!(derive(&i)[0].is_critical());

        i.load_time_ms = Some(3000);
        assert!(derive(&i).is_empty());
    }

    #[test]
    fn metadata_rules_only_apply_when_measured() {
        let i = inputs(None, &[]);
        assert!(derive(&i).is_empty());

        let meta = PageMetadata::default();
        let issues = derive(&inputs(Some(&meta), &[]));
        let categories: Vec<_> = issues.iter().map(|i| i.category).collect();
        assert_eq!(
            categories,
            vec![
                IssueCategory::MissingViewport,
                IssueCategory::MissingMetaDescription,
                IssueCategory::MissingTitle,
                IssueCategory::HeadingStructure,
                IssueCategory::MissingOpenGraph,
            ]
        );
    }

    #[test]
    fn lighthouse_duplicates_of_direct_checks_are_dropped() {
        let mut meta = complete_meta();
        meta.has_meta_description = false;
        let lighthouse = vec![
            Issue::critical(IssueCategory::MissingMetaDescription, "Missing meta description"),
            Issue::warning(IssueCategory::Performance, "CSS files not minified"),
            Issue::warning(IssueCategory::Performance, "Large amount of unused CSS"),
        ];
        let mut i = inputs(Some(&meta), &lighthouse);
        i.tls_valid = false;
        i.redirects = 3;
        let issues = derive(&i);
        let descriptions: Vec<_> = issues.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "SSL certificate missing or invalid",
                "Missing meta description",
                "Too many redirects (3)",
                "CSS files not minified",
                "Large amount of unused CSS",
            ]
        );
        assert!(!issues[1].is_critical());
    }

    #[test]
    fn error_status_is_critical() {
        let meta = complete_meta();
        let mut i = inputs(Some(&meta), &[]);
        i.http_status = Some(503);
        let issues = derive(&i);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].description, "Homepage returns HTTP 503");
        assert!(issues[0].is_critical());
    }
}
