//! Generative text backend used by the outreach generator.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    /// Daily quota is gone; retrying within this run is pointless.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out")]
    Timeout,
    #[error("blocked by safety filter: {0}")]
    Blocked(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("empty response")]
    Empty,
}

impl AiError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiError::RateLimited(_) | AiError::Timeout | AiError::Transport(_) | AiError::Empty
        )
    }
}

/// One prompt in, one completion out. No retries at this layer.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AiError>;
}

/// Strip a surrounding markdown code fence (```json ... ```) if present.
pub fn clean_json_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

fn is_daily_quota(body: &str) -> bool {
    body.contains("PerDay") || body.to_ascii_lowercase().contains("per day")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug, Default)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn extract_text(resp: GenerateResponse) -> Result<String, AiError> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(AiError::Blocked(reason));
    }
    let candidate = resp.candidates.into_iter().next().ok_or(AiError::Empty)?;
    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(AiError::Blocked("SAFETY".to_string()));
    }
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(AiError::Empty);
    }
    Ok(text.to_string())
}

/// Gemini `generateContent` client in JSON response mode.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn from_config(cfg: &config::Ai) -> Result<Self> {
        let base_url = Url::parse(GEMINI_API_BASE).context("invalid Gemini URL")?;
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &config::Ai, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("leadgen/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }

    pub fn build_request(&self, prompt: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", self.model))
            .context("invalid Gemini base URL")?;
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                response_mime_type: "application/json",
            },
        };
        self.http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .build()
            .context("failed to build Gemini request")
    }
}

#[async_trait]
impl AiBackend for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        let request = self
            .build_request(prompt)
            .map_err(|e| AiError::Transport(format!("{e:#}")))?;
        debug!(model = %self.model, "Gemini request");

        let res = self.http.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout
            } else {
                AiError::Transport(e.to_string())
            }
        })?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            if is_daily_quota(&body) {
                warn!("Gemini daily quota exhausted");
                return Err(AiError::QuotaExhausted(truncate(&body)));
            }
            return Err(AiError::RateLimited(truncate(&body)));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "Gemini API error");
            return Err(AiError::Transport(format!("{status}: {}", truncate(&body))));
        }

        let payload: GenerateResponse = res.json().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout
            } else {
                AiError::Malformed(e.to_string())
            }
        })?;
        extract_text(payload)
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(300).collect()
}
