//! Outreach message generation.
//!
//! Generation is a two-state machine. `Attempt` asks the AI backend and
//! validates the reply; any failure moves to `Fallback`, which renders the
//! deterministic template and cannot fail.
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::ai::{clean_json_fences, AiBackend, AiError, GeminiClient};
use crate::config::Config;
use crate::db::{self, OutreachScores};
use crate::model::{AuditFindings, GeneratedMessage, Lead, MessageSource, OutreachRecord};
use crate::scoring::ScoreResult;

pub mod grammar;
pub mod prompt;
pub mod template;

/// Inputs for one message.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub lead: &'a Lead,
    pub findings: &'a AuditFindings,
    pub score: &'a ScoreResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutreachSettings {
    pub sender_name: String,
    pub unsubscribe_url: Option<String>,
    /// Extra attempts after the first for transient AI errors.
    pub max_retries: u32,
    /// Backoff unit; retry `n` waits `n * retry_delay`.
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl OutreachSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            sender_name: cfg.outreach.sender_name.clone(),
            unsubscribe_url: Some(cfg.outreach.unsubscribe_url.trim().to_string())
                .filter(|u| !u.is_empty()),
            max_retries: cfg.ai.max_retries,
            retry_delay: Duration::from_secs(cfg.ai.retry_delay_secs),
            timeout: Duration::from_secs(cfg.ai.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AiMessage {
    #[serde(default, alias = "subject_line")]
    subject: Option<String>,
    #[serde(default, alias = "email_body")]
    body: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Why an attempt did not yield a message.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptFailure {
    Ai(AiError),
    Parse(String),
}

/// Generator state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Attempt { attempt: u32 },
    Fallback { reason: String },
}

/// Single transition function over an attempt's outcome.
fn next_state(attempt: u32, failure: &AttemptFailure, max_retries: u32) -> State {
    match failure {
        AttemptFailure::Ai(AiError::QuotaExhausted(msg)) => State::Fallback {
            reason: format!("quota exhausted: {msg}"),
        },
        AttemptFailure::Ai(err) if err.is_transient() && attempt <= max_retries => {
            State::Attempt {
                attempt: attempt + 1,
            }
        }
        AttemptFailure::Ai(err) => State::Fallback {
            reason: err.to_string(),
        },
        AttemptFailure::Parse(msg) => State::Fallback {
            reason: format!("unusable AI reply: {msg}"),
        },
    }
}

fn parse_reply(text: &str) -> Result<(String, String, Option<String>), String> {
    let cleaned = clean_json_fences(text);
    let parsed: AiMessage = serde_json::from_str(cleaned).map_err(|e| e.to_string())?;
    let subject = parsed
        .subject
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("missing subject")?;
    let body = parsed
        .body
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("missing body")?;
    let rationale = parsed
        .rationale
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok((subject, body, rationale))
}

pub struct Generator {
    backend: Option<Arc<dyn AiBackend>>,
    settings: OutreachSettings,
}

impl Generator {
    pub fn new(backend: Option<Arc<dyn AiBackend>>, settings: OutreachSettings) -> Self {
        Self { backend, settings }
    }

    /// Gemini-backed generator when AI is enabled, template-only otherwise.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let backend: Option<Arc<dyn AiBackend>> = if cfg.ai.enabled {
            Some(Arc::new(GeminiClient::from_config(&cfg.ai)?))
        } else {
            None
        };
        Ok(Self::new(backend, OutreachSettings::from_config(cfg)))
    }

    pub fn settings(&self) -> &OutreachSettings {
        &self.settings
    }

    async fn attempt(
        &self,
        backend: &dyn AiBackend,
        prompt: &str,
    ) -> Result<(String, String, Option<String>), AttemptFailure> {
        let reply = match tokio::time::timeout(self.settings.timeout, backend.complete(prompt)).await
        {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => return Err(AttemptFailure::Ai(err)),
            Err(_) => return Err(AttemptFailure::Ai(AiError::Timeout)),
        };
        parse_reply(&reply).map_err(AttemptFailure::Parse)
    }

    /// Produce a message. Never fails: every AI problem ends in the template.
    #[instrument(skip_all, fields(lead_id = ctx.lead.id))]
    pub async fn generate(&self, ctx: &MessageContext<'_>) -> GeneratedMessage {
        let Some(backend) = self.backend.as_deref() else {
            return self.fallback(ctx, "AI backend disabled".to_string());
        };
        let prompt = prompt::build(ctx, &self.settings.sender_name);

        let mut state = State::Attempt { attempt: 1 };
        loop {
            match state {
                State::Attempt { attempt } => {
                    debug!(attempt, "requesting AI message");
                    match self.attempt(backend, &prompt).await {
                        Ok((subject, body, rationale)) => {
                            return GeneratedMessage {
                                subject,
                                body,
                                rationale: rationale
                                    .unwrap_or_else(|| template::rationale(ctx)),
                                source: MessageSource::Ai,
                                fallback_reason: None,
                            };
                        }
                        Err(failure) => {
                            warn!(attempt, ?failure, "AI attempt failed");
                            state = next_state(attempt, &failure, self.settings.max_retries);
                            if let State::Attempt { attempt: next } = state {
                                tokio::time::sleep(self.settings.retry_delay * (next - 1)).await;
                            }
                        }
                    }
                }
                State::Fallback { reason } => return self.fallback(ctx, reason),
            }
        }
    }

    fn fallback(&self, ctx: &MessageContext<'_>, reason: String) -> GeneratedMessage {
        info!(%reason, "using template message");
        template::render(
            ctx,
            &self.settings.sender_name,
            self.settings.unsubscribe_url.as_deref(),
            Some(reason),
        )
    }

    /// Generate and create-or-update the lead's outreach record.
    pub async fn generate_and_persist(
        &self,
        pool: &db::Pool,
        ctx: &MessageContext<'_>,
        campaign_id: Option<&str>,
    ) -> Result<OutreachRecord> {
        let message = self.generate(ctx).await;
        let scores = OutreachScores {
            qualification: ctx.score.qualification,
            composite: ctx.score.composite,
            priority: ctx.score.priority,
        };
        let id = db::upsert_outreach(pool, ctx.lead.id, &message, scores, campaign_id).await?;
        db::outreach_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow!("outreach {id} not readable after upsert"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Scoring;
    use crate::model::{AuditStatus, Issue, IssueCategory, PageMetadata, Priority};
    use crate::scoring::ScoringEngine;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct ScriptedAi {
        replies: Mutex<VecDeque<Result<String, AiError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedAi {
        fn new(replies: Vec<Result<String, AiError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::from(replies)),
                ..Default::default()
            })
        }

        async fn calls(&self) -> usize {
            *self.calls.lock().await
        }
    }

    #[async_trait]
    impl AiBackend for ScriptedAi {
        async fn complete(&self, _prompt: &str) -> Result<String, AiError> {
            *self.calls.lock().await += 1;
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(AiError::Empty))
        }
    }

    fn generator(ai: &Arc<ScriptedAi>) -> Generator {
        let backend: Arc<dyn AiBackend> = ai.clone();
        Generator::new(Some(backend), settings())
    }

    fn settings() -> OutreachSettings {
        OutreachSettings {
            sender_name: "Jamie Rivera".into(),
            unsubscribe_url: Some("https://example.com/unsub".into()),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn lead() -> Lead {
        Lead {
            id: 7,
            business_name: "Bright Smiles Dental LLC".into(),
            website_url: "https://brightsmiles.test".into(),
            phone: None,
            email: Some("hello@brightsmiles.test".into()),
            industry: Some("dental".into()),
            location: Some("Austin, TX".into()),
            source: None,
            created_at: Utc::now(),
        }
    }

    fn findings(issues: Vec<Issue>) -> AuditFindings {
        AuditFindings {
            performance_score: Some(30),
            seo_score: Some(60),
            accessibility_score: Some(70),
            mobile_friendly: false,
            tls_valid: false,
            load_time_ms: Some(6200),
            metadata: PageMetadata::default(),
            issues,
            status: AuditStatus::Completed,
            error: None,
            raw: Value::Null,
        }
    }

    fn score(f: &AuditFindings) -> ScoreResult {
        ScoringEngine::new(Scoring::default())
            .unwrap()
            .score(f)
            .unwrap()
    }

    fn default_issues() -> Vec<Issue> {
        vec![
            Issue::critical(IssueCategory::SlowLoad, "Slow page load (6.2s)"),
            Issue::critical(IssueCategory::NoTls, "SSL certificate missing or invalid"),
            Issue::warning(IssueCategory::MissingOpenGraph, "Missing Open Graph tags"),
        ]
    }

    const GOOD_REPLY: &str = "```json\n{\"subject_line\": \"Quick idea for Bright Smiles\", \"email_body\": \"Hi there...\"}\n```";

    #[tokio::test]
    async fn ai_reply_is_used_with_aliases_and_fences() {
        let ai = ScriptedAi::new(vec![Ok(GOOD_REPLY.into())]);
        let generator = generator(&ai);
        let (lead, f) = (lead(), findings(default_issues()));
        let s = score(&f);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert_eq!(msg.source, MessageSource::Ai);
        assert_eq!(msg.subject, "Quick idea for Bright Smiles");
        assert_eq!(msg.body, "Hi there...");
        assert!(msg.rationale.starts_with("HOT lead"));
        assert_eq!(ai.calls().await, 1);
    }

    #[tokio::test]
    async fn quota_exhaustion_falls_back_without_retry() {
        let ai = ScriptedAi::new(vec![Err(AiError::QuotaExhausted("PerDay".into()))]);
        let generator = generator(&ai);
        let (lead, f) = (lead(), findings(default_issues()));
        let s = score(&f);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert_eq!(msg.source, MessageSource::Template);
        assert!(msg.fallback_reason.unwrap().starts_with("quota exhausted"));
        assert_eq!(ai.calls().await, 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_succeed() {
        let ai = ScriptedAi::new(vec![
            Err(AiError::RateLimited("slow down".into())),
            Err(AiError::Timeout),
            Ok(r#"{"subject":"S","body":"B","rationale":"R"}"#.into()),
        ]);
        let generator = generator(&ai);
        let (lead, f) = (lead(), findings(default_issues()));
        let s = score(&f);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert_eq!(msg.source, MessageSource::Ai);
        assert_eq!(msg.rationale, "R");
        assert_eq!(ai.calls().await, 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let ai = ScriptedAi::new(vec![
            Err(AiError::Transport("reset".into())),
            Err(AiError::Transport("reset".into())),
            Err(AiError::Transport("reset".into())),
            Ok(GOOD_REPLY.into()),
        ]);
        let generator = generator(&ai);
        let (lead, f) = (lead(), findings(default_issues()));
        let s = score(&f);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert_eq!(msg.source, MessageSource::Template);
        assert_eq!(ai.calls().await, 3);
    }

    #[tokio::test]
    async fn unparseable_or_empty_reply_falls_back() {
        for reply in ["not json", r#"{"subject":"","body":"x"}"#, r#"{"body":"x"}"#] {
            let ai = ScriptedAi::new(vec![Ok(reply.into())]);
            let generator = generator(&ai);
            let (lead, f) = (lead(), findings(default_issues()));
            let s = score(&f);
            let msg = generator
                .generate(&MessageContext {
                    lead: &lead,
                    findings: &f,
                    score: &s,
                })
                .await;
            assert_eq!(msg.source, MessageSource::Template, "reply {reply:?}");
            assert_eq!(ai.calls().await, 1);
        }
    }

    #[tokio::test]
    async fn blocked_content_is_not_retried() {
        let ai = ScriptedAi::new(vec![Err(AiError::Blocked("SAFETY".into()))]);
        let generator = generator(&ai);
        let (lead, f) = (lead(), findings(default_issues()));
        let s = score(&f);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert_eq!(msg.source, MessageSource::Template);
        assert_eq!(ai.calls().await, 1);
    }

    #[test]
    fn transition_table() {
        let quota = AttemptFailure::Ai(AiError::QuotaExhausted("q".into()));
        assert!(matches!(next_state(1, &quota, 5), State::Fallback { .. }));
        let timeout = AttemptFailure::Ai(AiError::Timeout);
        assert_eq!(next_state(1, &timeout, 1), State::Attempt { attempt: 2 });
        assert!(matches!(next_state(2, &timeout, 1), State::Fallback { .. }));
        let parse = AttemptFailure::Parse("eof".into());
        assert!(matches!(next_state(1, &parse, 5), State::Fallback { .. }));
    }

    #[tokio::test]
    async fn template_message_for_hot_lead() {
        let generator = Generator::new(None, settings());
        let (lead, f) = (lead(), findings(default_issues()));
        let s = score(&f);
        assert_eq!(s.priority, Priority::Hot);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert_eq!(msg.source, MessageSource::Template);
        assert_eq!(msg.subject, "Bright Smiles Dental: your site might be losing visitors");
        assert!(msg
            .body
            .contains("while researching dental practices in Austin, TX"));
        assert!(msg
            .body
            .contains("The main one: your website takes 6.2 seconds to load"));
        assert!(msg.body.contains("There's also an issue where visitors see a \"Not Secure\""));
        assert!(msg.body.contains("When a dental practice's site is slow"));
        assert!(msg.body.contains("Jamie Rivera"));
        assert!(msg.body.contains("Or unsubscribe here: https://example.com/unsub"));
        assert!(!msg.body.contains("LLC"));
        assert!(msg.rationale.contains("top problem: slow page load"));
    }

    #[tokio::test]
    async fn template_handles_sparse_leads() {
        let generator = Generator::new(None, settings());
        let mut lead = lead();
        lead.industry = None;
        lead.location = None;
        let mut f = findings(vec![]);
        f.performance_score = Some(60);
        f.seo_score = Some(70);
        f.accessibility_score = Some(80);
        f.tls_valid = true;
        f.mobile_friendly = true;
        let s = score(&f);
        assert_ne!(s.priority, Priority::Hot);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert!(!msg.subject.is_empty());
        assert!(msg.subject.starts_with("Spotted something on Bright Smiles Dental's website"));
        assert!(msg.body.contains("researching local businesses in your area"));
        assert!(msg.body.contains("some technical issues"));
        assert!(msg.body.contains("searches for a local business in your area"));
    }

    #[tokio::test]
    async fn plural_industry_reads_naturally_in_template() {
        let generator = Generator::new(None, settings());
        let mut lead = lead();
        lead.industry = Some("Plumbers".into());
        let f = findings(default_issues());
        let s = score(&f);
        let msg = generator
            .generate(&MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            })
            .await;
        assert!(msg.body.contains("while researching plumbers in Austin, TX"));
        assert!(msg.body.contains("When a plumber's site is slow"));
        assert!(!msg.body.contains("plumbers's"));
    }

    #[test]
    fn prompt_carries_context() {
        let (lead, f) = (lead(), findings(default_issues()));
        let s = score(&f);
        let text = prompt::build(
            &MessageContext {
                lead: &lead,
                findings: &f,
                score: &s,
            },
            "Jamie Rivera",
        );
        assert!(text.contains("Business: Bright Smiles Dental LLC"));
        assert!(text.contains("Industry: dental practice"));
        assert!(text.contains("Location: Austin, TX"));
        assert!(text.contains("- [critical] Slow page load (6.2s)"));
        assert!(text.contains("SERVICE OFFERED: "));
        assert!(text.contains("\"subject\""));
    }
}
