//! Direct HTTP and TLS checks against the target site.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{redirect, Client, Url};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{CheckError, PageFetch, SiteProbe, TlsReport};
use crate::config;

const MAX_HOPS: u32 = 10;

/// `SiteProbe` over reqwest. Redirects are followed by hand so they can be
/// counted; certificate verification stays on for the TLS check.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: Client,
    tls: Client,
    max_html_bytes: usize,
}

impl HttpProbe {
    pub fn from_config(cfg: &config::Audit) -> Result<Self> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(redirect::Policy::none())
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .context("failed to build HTTP probe client")?;
        let tls = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(redirect::Policy::none())
            .timeout(Duration::from_secs(cfg.tls_timeout_secs))
            .build()
            .context("failed to build TLS probe client")?;
        Ok(Self {
            http,
            tls,
            max_html_bytes: cfg.max_html_bytes,
        })
    }

    async fn read_capped(&self, mut res: reqwest::Response) -> Result<Vec<u8>, CheckError> {
        let mut body = Vec::new();
        while body.len() < self.max_html_bytes {
            match res.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => return Err(CheckError::from_transport("page body", &e)),
            }
        }
        body.truncate(self.max_html_bytes);
        Ok(body)
    }
}

fn parse_target(url: &str) -> Result<Url, CheckError> {
    Url::parse(url).map_err(|e| CheckError::Malformed(format!("invalid URL {url:?}: {e}")))
}

/// Walks an error's source chain into one line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn looks_like_certificate_error(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    ["certificate", "handshake", "tls", "ssl", "unknownissuer", "notvalidforname"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Classify a failed page request. Certificate rejections are kept apart
/// from connection failures: the site is up, it just is not trusted.
fn fetch_error(err: &reqwest::Error) -> CheckError {
    certificate_failure(&error_chain(err), err.is_timeout())
        .unwrap_or_else(|| CheckError::from_transport("site", err))
}

fn certificate_failure(chain: &str, timed_out: bool) -> Option<CheckError> {
    (!timed_out && looks_like_certificate_error(chain))
        .then(|| CheckError::Certificate(format!("site: {chain}")))
}

#[async_trait]
impl SiteProbe for HttpProbe {
    async fn fetch_page(&self, url: &str) -> Result<PageFetch, CheckError> {
        let mut current = parse_target(url)?;
        let mut redirects = 0u32;
        let started = Instant::now();

        loop {
            let res = self
                .http
                .get(current.clone())
                .send()
                .await
                .map_err(|e| fetch_error(&e))?;

            let status = res.status();
            let location = res
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            if status.is_redirection() {
                if let Some(location) = location {
                    if redirects >= MAX_HOPS {
                        return Err(CheckError::TooManyRedirects(redirects));
                    }
                    current = current.join(&location).map_err(|e| {
                        CheckError::Malformed(format!("bad redirect target {location:?}: {e}"))
                    })?;
                    redirects += 1;
                    debug!(url, hop = redirects, to = %current, "following redirect");
                    continue;
                }
            }

            let body = self.read_capped(res).await?;
            let load_time_ms = started.elapsed().as_millis() as u64;
            return Ok(PageFetch {
                final_url: current.to_string(),
                status: status.as_u16(),
                load_time_ms,
                redirects,
                html: String::from_utf8_lossy(&body).into_owned(),
            });
        }
    }

    async fn check_tls(&self, url: &str) -> Result<TlsReport, CheckError> {
        let mut target = parse_target(url)?;
        if target.scheme() != "https" {
            target
                .set_scheme("https")
                .map_err(|_| CheckError::Malformed(format!("cannot use https for {url:?}")))?;
        }
        target.set_path("/");
        target.set_query(None);

        match self.tls.head(target).send().await {
            Ok(_) => Ok(TlsReport {
                valid: true,
                detail: None,
            }),
            Err(e) if e.is_timeout() => Err(CheckError::Timeout(format!("TLS handshake: {e}"))),
            Err(e) => {
                let chain = error_chain(&e);
                let detail = if looks_like_certificate_error(&chain) {
                    chain
                } else {
                    format!("no TLS endpoint: {chain}")
                };
                Ok(TlsReport {
                    valid: false,
                    detail: Some(detail),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_errors_are_recognised() {
        assert!(looks_like_certificate_error(
            "error sending request: invalid peer certificate: UnknownIssuer"
        ));
        assert!(!looks_like_certificate_error(
            "error sending request: Connection refused (os error 111)"
        ));
    }

    #[test]
    fn rejected_certificate_is_not_unreachable() {
        let err = certificate_failure(
            "error sending request: invalid peer certificate: Other(CaUsedAsEndEntity)",
            false,
        )
        .unwrap();
        assert!(matches!(err, CheckError::Certificate(_)));
        assert!(!err.is_unreachable());

        assert!(certificate_failure("tls handshake timed out", true).is_none());
        assert!(certificate_failure("tcp connect error: Connection refused", false).is_none());
    }

    #[test]
    fn invalid_target_is_malformed() {
        let err = parse_target("not a url").unwrap_err();
        assert!(matches!(err, CheckError::Malformed(_)));
        assert!(!err.is_unreachable());
    }
}
