//! Configuration loader and validator for the lead pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub audit: Audit,
    pub pagespeed: PageSpeed,
    pub ai: Ai,
    #[serde(default)]
    pub scoring: Scoring,
    pub outreach: Outreach,
    pub pipeline: Pipeline,
    pub dispatch: Dispatch,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub exports_dir: String,
}

/// Direct website checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Audit {
    pub http_timeout_secs: u64,
    pub tls_timeout_secs: u64,
    pub slow_load_threshold_ms: u64,
    pub user_agent: String,
    pub max_html_bytes: usize,
}

/// PageSpeed Insights backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageSpeed {
    #[serde(default)]
    pub api_key: String,
    pub strategy: String,
    pub timeout_secs: u64,
    /// Directory for cached API responses. Empty disables the cache.
    #[serde(default)]
    pub cache_dir: String,
    #[serde(default = "default_cache_ttl_days")]
    pub cache_ttl_days: u64,
}

fn default_cache_ttl_days() -> u64 {
    30
}

/// Generative backend used for outreach copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ai {
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

/// Factor weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Scoring {
    pub performance: f64,
    pub seo: f64,
    pub accessibility: f64,
    pub mobile: f64,
    pub tls: f64,
    pub metadata: f64,
    pub load_speed: f64,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            performance: 0.25,
            seo: 0.20,
            accessibility: 0.15,
            mobile: 0.15,
            tls: 0.10,
            metadata: 0.10,
            load_speed: 0.05,
        }
    }
}

impl Scoring {
    pub fn total(&self) -> f64 {
        self.performance
            + self.seo
            + self.accessibility
            + self.mobile
            + self.tls
            + self.metadata
            + self.load_speed
    }
}

/// Sender identity used in generated messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outreach {
    pub sender_name: String,
    #[serde(default)]
    pub sender_email: String,
    #[serde(default)]
    pub unsubscribe_url: String,
}

/// Default stage limits for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pipeline {
    pub audit_limit: usize,
    pub generate_limit: usize,
    pub export: bool,
}

/// Send cadence and transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    pub delay_seconds: u64,
    pub daily_cap: u32,
    pub transport: Transport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transport {
    DryRun,
    Brevo { api_key: String },
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and
    /// `app.exports_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.app.exports_dir] {
            if dir.trim().is_empty() {
                continue;
            }
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn exports_path(&self) -> PathBuf {
        PathBuf::from(&self.app.exports_dir)
    }

    pub fn default_database_url(&self) -> String {
        format!("sqlite://{}/leadgen.db", self.app.data_dir.trim_end_matches('/'))
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_secs(self.dispatch.delay_seconds)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.exports_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.exports_dir must be non-empty"));
    }

    if cfg.audit.http_timeout_secs == 0 {
        return Err(ConfigError::Invalid("audit.http_timeout_secs must be > 0"));
    }
    if cfg.audit.tls_timeout_secs == 0 {
        return Err(ConfigError::Invalid("audit.tls_timeout_secs must be > 0"));
    }
    if cfg.audit.max_html_bytes == 0 {
        return Err(ConfigError::Invalid("audit.max_html_bytes must be > 0"));
    }

    if !matches!(cfg.pagespeed.strategy.as_str(), "mobile" | "desktop") {
        return Err(ConfigError::Invalid(
            "pagespeed.strategy must be \"mobile\" or \"desktop\"",
        ));
    }
    if cfg.pagespeed.timeout_secs == 0 {
        return Err(ConfigError::Invalid("pagespeed.timeout_secs must be > 0"));
    }

    if cfg.ai.enabled && cfg.ai.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.api_key must be set when ai.enabled"));
    }
    if cfg.ai.model.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.model must be non-empty"));
    }
    if cfg.ai.timeout_secs == 0 {
        return Err(ConfigError::Invalid("ai.timeout_secs must be > 0"));
    }
    if !(0.0..=2.0).contains(&cfg.ai.temperature) {
        return Err(ConfigError::Invalid("ai.temperature must be within 0.0..=2.0"));
    }

    let weights = [
        cfg.scoring.performance,
        cfg.scoring.seo,
        cfg.scoring.accessibility,
        cfg.scoring.mobile,
        cfg.scoring.tls,
        cfg.scoring.metadata,
        cfg.scoring.load_speed,
    ];
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ConfigError::Invalid("scoring weights must be non-negative"));
    }
    if (cfg.scoring.total() - 1.0).abs() > 1e-6 {
        return Err(ConfigError::Invalid("scoring weights must sum to 1.0"));
    }

    if cfg.outreach.sender_name.trim().is_empty() {
        return Err(ConfigError::Invalid("outreach.sender_name must be non-empty"));
    }

    if cfg.dispatch.daily_cap == 0 {
        return Err(ConfigError::Invalid("dispatch.daily_cap must be > 0"));
    }
    if let Transport::Brevo { api_key } = &cfg.dispatch.transport {
        if api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("dispatch.transport.api_key must be non-empty"));
        }
        if cfg.outreach.sender_email.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "outreach.sender_email is required for the brevo transport",
            ));
        }
    }

    Ok(())
}

/// Returns the example YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  exports_dir: "./exports"

audit:
  http_timeout_secs: 15
  tls_timeout_secs: 10
  slow_load_threshold_ms: 3000
  user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36"
  max_html_bytes: 50000

pagespeed:
  api_key: ""
  strategy: "mobile"
  timeout_secs: 60
  cache_dir: "./data/pagespeed_cache"
  cache_ttl_days: 30

ai:
  enabled: false
  api_key: ""
  model: "gemini-2.0-flash"
  temperature: 0.7
  max_tokens: 1000
  timeout_secs: 30
  max_retries: 2
  retry_delay_secs: 5

scoring:
  performance: 0.25
  seo: 0.20
  accessibility: 0.15
  mobile: 0.15
  tls: 0.10
  metadata: 0.10
  load_speed: 0.05

outreach:
  sender_name: "Web Performance Consultant"
  sender_email: ""
  unsubscribe_url: ""

pipeline:
  audit_limit: 10
  generate_limit: 10
  export: true

dispatch:
  delay_seconds: 480
  daily_cap: 30
  transport:
    kind: dry_run
"#
}
