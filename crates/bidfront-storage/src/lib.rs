//! Listing-page fetch + raw page archive for BidFront.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "bidfront-storage";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; BidFrontBot/1.0)";

/// Certificate handling for one source. `AcceptInvalidCerts` exists for a
/// single county host that serves a broken chain; it is chosen per request and
/// never becomes the client default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    #[default]
    Verify,
    AcceptInvalidCerts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Listing-page fetcher. Every request carries the identifying user agent and
/// the configured timeout; transient failures are retried with backoff.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    verified: reqwest::Client,
    lenient: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let build = |accept_invalid_certs: bool| {
            reqwest::Client::builder()
                .gzip(true)
                .brotli(true)
                .timeout(config.timeout)
                .user_agent(config.user_agent.clone())
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
                .map_err(FetchError::Client)
        };

        Ok(Self {
            verified: build(false)?,
            lenient: build(true)?,
            backoff: config.backoff,
        })
    }

    fn client_for(&self, tls: TlsPolicy) -> &reqwest::Client {
        match tls {
            TlsPolicy::Verify => &self.verified,
            TlsPolicy::AcceptInvalidCerts => &self.lenient,
        }
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
        tls: TlsPolicy,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, url);
        self.fetch_with_retries(url, tls).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str, tls: TlsPolicy) -> Result<FetchedResponse, FetchError> {
        let client = self.client_for(tls);
        let mut attempt = 0usize;

        loop {
            let retry_allowed = attempt < self.backoff.max_retries;
            match client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                            fetched_at: Utc::now(),
                        });
                    }

                    if classify_status(status) == RetryDisposition::NonRetryable || !retry_allowed {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    warn!(status = status.as_u16(), attempt, "retrying listing fetch");
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable || !retry_allowed {
                        return Err(FetchError::Request(err));
                    }
                    warn!(error = %err, attempt, "retrying listing fetch");
                }
            }

            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchivedPage {
    pub sha256: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub deduplicated: bool,
}

/// Content-addressed archive of raw listing pages, laid out as
/// `<root>/<source_id>/<YYYYMMDD>/<sha256>.html`.
#[derive(Debug, Clone)]
pub struct PageArchive {
    root: PathBuf,
}

impl PageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn relative_path_for(source_id: &str, fetched_at: DateTime<Utc>, sha256: &str) -> PathBuf {
        PathBuf::from(source_id)
            .join(fetched_at.format("%Y%m%d").to_string())
            .join(format!("{sha256}.html"))
    }

    /// Writes `body` unless an identical page already sits at the same path.
    /// The write goes through a temp file + rename so readers never observe a
    /// partial page.
    pub async fn archive(
        &self,
        source_id: &str,
        fetched_at: DateTime<Utc>,
        body: &[u8],
    ) -> anyhow::Result<ArchivedPage> {
        let sha256 = Self::sha256_hex(body);
        let relative_path = Self::relative_path_for(source_id, fetched_at, &sha256);
        let absolute_path = self.root.join(&relative_path);
        let dir = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating archive directory {}", dir.display()))?;

        let page = |deduplicated| ArchivedPage {
            sha256: sha256.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(page(true));
        }

        let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("creating temp page {}", temp_path.display()))?;
        file.write_all(body)
            .await
            .with_context(|| format!("writing temp page {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp page {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming archived page {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(page(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn page_hashing_is_stable() {
        assert_eq!(
            PageArchive::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_pages_are_archived_once() {
        let dir = tempdir().expect("tempdir");
        let archive = PageArchive::new(dir.path());
        let fetched_at = Utc.with_ymd_and_hms(2025, 2, 10, 6, 0, 0).unwrap();

        let first = archive
            .archive("rockford", fetched_at, b"<html>bids</html>")
            .await
            .expect("first archive");
        let second = archive
            .archive("rockford", fetched_at, b"<html>bids</html>")
            .await
            .expect("second archive");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("rockford/20250210"));
        assert!(first.absolute_path.exists());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn unreachable_host_surfaces_request_error() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_millis(500),
            backoff: BackoffPolicy::none(),
            ..Default::default()
        })
        .expect("client");
        let err = fetcher
            .fetch_bytes(Uuid::new_v4(), "test", "http://127.0.0.1:9/", TlsPolicy::Verify)
            .await
            .expect_err("port 9 is closed");
        assert!(matches!(err, FetchError::Request(_)));
    }
}
