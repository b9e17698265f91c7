use std::fmt::Write;

use super::grammar::industry_singular;
use super::MessageContext;

const MAX_PROMPT_ISSUES: usize = 6;

fn score_or_na(score: Option<u8>) -> String {
    score.map(|s| format!("{s}/100")).unwrap_or_else(|| "n/a".into())
}

/// Structured prompt for the generative backend. Asks for JSON only.
pub fn build(ctx: &MessageContext<'_>, sender_name: &str) -> String {
    let lead = ctx.lead;
    let findings = ctx.findings;
    let score = ctx.score;
    let industry = industry_singular(lead.industry.as_deref());
    let location = lead.location.as_deref().unwrap_or("unknown");

    let mut issues = String::new();
    for issue in findings.issues.iter().take(MAX_PROMPT_ISSUES) {
        let severity = if issue.is_critical() { "critical" } else { "warning" };
        let _ = write!(issues, "- [{severity}] {}", issue.description);
        if let Some(detail) = &issue.detail {
            let _ = write!(issues, " ({detail})");
        }
        issues.push('\n');
    }
    if issues.is_empty() {
        issues.push_str("- no specific issues recorded\n");
    }

    format!(
        r#"Write a short, professional outreach email to a {industry} business owner.

RECIPIENT:
- Business: {business}
- Industry: {industry}
- Location: {location}
- Website: {url}

WEBSITE AUDIT:
- Composite quality score: {composite}/100 (priority {priority})
- Performance: {performance}
- SEO: {seo}
- Accessibility: {accessibility}
- Mobile friendly: {mobile}
- Valid TLS certificate: {tls}

ISSUES FOUND:
{issues}
SERVICE OFFERED: {service}
WHY IT MATTERS: {pitch}
SENDER: {sender}

Respond in EXACTLY this JSON format:
{{
    "subject": "Email subject, specific to their business, not generic",
    "body": "The full email text",
    "rationale": "One sentence on why this business is worth contacting"
}}

EMAIL RULES:
- Maximum 150 words for the body
- Open with a specific observation about THEIR website
- Include a subtle authority line such as "I run performance audits for small local businesses"
- Mention ONE concrete problem and its business impact
- Frame the loss competitively: visitors check the next option
- Offer a quick call, not a hard sell
- No fake urgency or pressure tactics
- End with a low-pressure close and an unsubscribe note
- Sound like a real person
- Output ONLY valid JSON, no other text"#,
        business = lead.business_name,
        url = lead.website_url,
        composite = score.composite,
        priority = score.priority,
        performance = score_or_na(findings.performance_score),
        seo = score_or_na(findings.seo_score),
        accessibility = score_or_na(findings.accessibility_score),
        mobile = if findings.mobile_friendly { "yes" } else { "no" },
        tls = if findings.tls_valid { "yes" } else { "no" },
        service = score.recommended_service,
        pitch = score.recommended_service.pitch(),
        sender = sender_name,
    )
}
