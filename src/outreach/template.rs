//! Deterministic message template. Always produces a usable message.
use super::grammar::{conversational_name, industry_plural, industry_singular, possessive, with_article};
use super::MessageContext;
use crate::model::{AuditFindings, GeneratedMessage, Issue, IssueCategory, MessageSource, Priority};

const GENERIC_PROBLEM: &str =
    "your website has some technical issues that could be affecting how customers find you";

/// Business-language phrase for an issue.
pub fn problem_phrase(issue: &Issue, findings: &AuditFindings) -> String {
    match issue.category {
        IssueCategory::Unreachable => "your website didn't load at all when I tried to visit it".into(),
        IssueCategory::HttpStatus => {
            "your homepage shows an error page instead of your content".into()
        }
        IssueCategory::NoTls => {
            "visitors see a \"Not Secure\" warning when they visit your site".into()
        }
        IssueCategory::MissingMetaDescription => {
            "Google has no description to show for your site in search results".into()
        }
        IssueCategory::MissingTitle => {
            "your website doesn't have a proper page title for search engines".into()
        }
        IssueCategory::MissingViewport => "your site may not display correctly on phones".into(),
        IssueCategory::MissingOpenGraph => {
            "when someone shares your site on social media, it shows up without an image or preview"
                .into()
        }
        IssueCategory::HeadingStructure => {
            "your homepage has no clear main heading, so search engines struggle to tell what you do"
                .into()
        }
        IssueCategory::SlowLoad => match findings.load_time_ms {
            Some(ms) => format!(
                "your website takes {:.1} seconds to load, and most visitors leave after 3",
                ms as f64 / 1000.0
            ),
            None => "your website loads slowly, and most visitors leave after 3 seconds".into(),
        },
        IssueCategory::Redirects => {
            "your homepage bounces visitors through several redirects before it loads".into()
        }
        IssueCategory::Performance => {
            "parts of your site load slowly because of heavy images and scripts".into()
        }
        IssueCategory::Seo => "search engines have trouble reading and ranking your site".into(),
        IssueCategory::Accessibility => {
            "some visitors, including people using screen readers, struggle to use your site".into()
        }
    }
}

/// Up to `n` phrases for distinct issue categories, in issue order.
fn top_problems(findings: &AuditFindings, n: usize) -> Vec<String> {
    let mut seen = Vec::new();
    let mut phrases = Vec::new();
    for issue in &findings.issues {
        if phrases.len() == n {
            break;
        }
        if seen.contains(&issue.category) {
            continue;
        }
        seen.push(issue.category);
        phrases.push(problem_phrase(issue, findings));
    }
    phrases
}

pub fn subject(ctx: &MessageContext<'_>) -> String {
    let name = conversational_name(&ctx.lead.business_name);
    let owner = possessive(&ctx.lead.business_name);
    let place = ctx
        .lead
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or("local");

    match ctx.findings.top_issue().map(|i| i.category) {
        Some(IssueCategory::SlowLoad | IssueCategory::Performance | IssueCategory::Redirects) => {
            format!("{name}: your site might be losing visitors")
        }
        Some(
            IssueCategory::MissingMetaDescription
            | IssueCategory::MissingTitle
            | IssueCategory::HeadingStructure
            | IssueCategory::Seo,
        ) => format!("Is {name} showing up in {place} searches?"),
        Some(IssueCategory::NoTls) => format!("{owner} website shows a security warning"),
        Some(IssueCategory::MissingViewport) => format!("{owner} website on a phone"),
        Some(IssueCategory::Unreachable | IssueCategory::HttpStatus) => {
            format!("Trouble reaching {owner} website")
        }
        Some(IssueCategory::MissingOpenGraph | IssueCategory::Accessibility) | None => {
            let industry = industry_singular(ctx.lead.industry.as_deref());
            format!("Spotted something on {owner} website ({industry})")
        }
    }
}

pub fn body(ctx: &MessageContext<'_>, sender_name: &str, unsubscribe_url: Option<&str>) -> String {
    let name = conversational_name(&ctx.lead.business_name);
    let plural = industry_plural(ctx.lead.industry.as_deref());
    let singular = with_article(&industry_singular(ctx.lead.industry.as_deref()));
    let location = ctx
        .lead
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());
    let area = location.map(|l| format!("in {l}")).unwrap_or_else(|| "in your area".into());

    let problems = top_problems(ctx.findings, 2);
    let main = problems
        .first()
        .cloned()
        .unwrap_or_else(|| GENERIC_PROBLEM.to_string());

    let mut lines = vec![
        "Hi,".to_string(),
        String::new(),
        format!(
            "I came across {name} while researching {plural} {area} and took a quick look at your website."
        ),
        String::new(),
        "I run performance audits for small local businesses and spotted a couple of things on your site."
            .to_string(),
        String::new(),
        format!("The main one: {main}."),
    ];
    if let Some(second) = problems.get(1) {
        lines.push(format!("There's also an issue where {second}."));
    }
    lines.push(String::new());

    if ctx.score.priority == Priority::Hot {
        let where_ = location.unwrap_or("your area");
        lines.push(format!(
            "When {singular}'s site is slow or hard to find, visitors tend to check the next option instead. \
             In {where_} there's always a next option, and that's traffic and bookings going to a competitor."
        ));
    } else {
        lines.push(format!(
            "These are the kinds of small things that quietly push potential customers toward a competitor. \
             Someone searches for {singular} {area}, your site doesn't work right, and they pick the next one."
        ));
    }

    lines.extend([
        String::new(),
        format!(
            "I've helped similar local businesses with exactly this kind of {}. Happy to show you what I found; \
             it takes about 10 minutes, no strings attached.",
            ctx.score.recommended_service.as_str().to_lowercase()
        ),
        String::new(),
        "If you're open to it, I can walk you through it.".to_string(),
        String::new(),
        sender_name.to_string(),
        String::new(),
        "P.S. If this isn't relevant, just ignore this. No follow-ups.".to_string(),
        String::new(),
        "---".to_string(),
        "Reply 'unsubscribe' to opt out.".to_string(),
    ]);
    if let Some(url) = unsubscribe_url.map(str::trim).filter(|u| !u.is_empty()) {
        lines.push(format!("Or unsubscribe here: {url}"));
    }
    lines.join("\n")
}

/// Summary of why this lead was contacted.
pub fn rationale(ctx: &MessageContext<'_>) -> String {
    let top = ctx
        .findings
        .top_issue()
        .map(|i| i.category.label())
        .unwrap_or("no specific issue");
    format!(
        "{} lead: composite {}/100, {} critical issue(s); top problem: {}; pitch: {}.",
        ctx.score.priority,
        ctx.score.composite,
        ctx.score.critical_issues,
        top,
        ctx.score.recommended_service
    )
}

pub fn render(
    ctx: &MessageContext<'_>,
    sender_name: &str,
    unsubscribe_url: Option<&str>,
    fallback_reason: Option<String>,
) -> GeneratedMessage {
    GeneratedMessage {
        subject: subject(ctx),
        body: body(ctx, sender_name, unsubscribe_url),
        rationale: rationale(ctx),
        source: MessageSource::Template,
        fallback_reason,
    }
}
