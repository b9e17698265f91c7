//! On-disk cache of PageSpeed API responses, one JSON file per URL.
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    strategy: String,
    fetched_at: DateTime<Utc>,
    response: Value,
}

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: ChronoDuration,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, ttl_days: u64) -> Self {
        Self {
            dir: dir.into(),
            ttl: ChronoDuration::days(ttl_days.min(36_500) as i64),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, url: &str, strategy: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(strategy.as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    /// Cached response for `url` if one exists and is younger than the TTL.
    /// Unreadable or stale entries count as a miss.
    pub async fn load(&self, url: &str, strategy: &str, now: DateTime<Utc>) -> Option<Value> {
        let path = self.path_for(url, strategy);
        let raw = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(path = %path.display(), %err, "ignoring unreadable cache entry");
                return None;
            }
        };
        if entry.url != url || entry.strategy != strategy {
            return None;
        }
        if now - entry.fetched_at >= self.ttl {
            debug!(url, fetched_at = %entry.fetched_at, "cache entry expired");
            return None;
        }
        Some(entry.response)
    }

    pub async fn store(
        &self,
        url: &str,
        strategy: &str,
        fetched_at: DateTime<Utc>,
        response: &Value,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let entry = CacheEntry {
            url: url.to_string(),
            strategy: strategy.to_string(),
            fetched_at,
            response: response.clone(),
        };
        let path = self.path_for(url, strategy);
        tokio::fs::write(&path, serde_json::to_vec(&entry)?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
