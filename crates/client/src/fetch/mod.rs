//! HTTP fetch port and its reqwest-backed implementation.
//!
//! ### Retry policy
//! - Network errors, body read errors and 5xx responses are retried with
//!   exponential backoff starting at `base_delay`.
//! - HTTP 429 waits `rate_limit_delay`, or the `Retry-After` value when larger.
//! - Other 4xx responses fail immediately.
//! - After `max_retries` retries the last error is returned.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use roomwatch_core::{AppConfig, Error};

/// Upper bound on any single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Upper bound honored for server supplied `Retry-After` values.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Retry settings handed to a [`Fetcher`] with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    pub base_delay: Duration,
    /// Minimum wait after an HTTP 429.
    pub rate_limit_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for RetryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for the given zero-based retry attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Wait before retrying after `failure`, or `None` when it must not be retried.
    fn delay_for(&self, failure: &AttemptError, attempt: u32) -> Option<Duration> {
        match failure {
            AttemptError::RateLimited { retry_after } => {
                Some(retry_after.map_or(self.rate_limit_delay, |after| after.max(self.rate_limit_delay)))
            }
            AttemptError::Status(status) if status.is_client_error() => None,
            AttemptError::Status(_) | AttemptError::Network(_) | AttemptError::Body(_) => Some(self.backoff(attempt)),
        }
    }
}

/// Source of raw listing pages.
///
/// Implementations own their retry loop; callers treat any returned error as
/// exhausted.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, headers: &HeaderMap, retry: &RetryConfig) -> Result<String, Error>;
}

/// Outcome of a single HTTP attempt.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("network error: {0}")]
    Network(String),

    #[error("status {}", .0.as_u16())]
    Status(StatusCode),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("failed to read response: {0}")]
    Body(String),
}

impl From<AttemptError> for Error {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::RateLimited { .. } => Error::RateLimited(err.to_string()),
            AttemptError::Status(_) => Error::HttpError(err.to_string()),
            AttemptError::Network(_) | AttemptError::Body(_) => Error::FetchFailed(err.to_string()),
        }
    }
}

/// Parse a `Retry-After` header given in delta seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Fetcher backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Build a client with the configured user agent and timeout.
    pub fn new(config: &AppConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(5))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::FetchFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http })
    }

    /// Wrap an already configured client.
    pub fn from_client(http: Client) -> Self {
        Self { http }
    }

    async fn attempt(&self, url: &url::Url, headers: &HeaderMap) -> Result<String, AttemptError> {
        let response = self
            .http
            .get(url.as_str())
            .header(header::ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| AttemptError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::RateLimited { retry_after: parse_retry_after(response.headers()) });
        }
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        response.text().await.map_err(|e| AttemptError::Body(e.to_string()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, headers: &HeaderMap, retry: &RetryConfig) -> Result<String, Error> {
        let parsed = url::Url::parse(url.trim()).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!("unsupported scheme: {}", parsed.scheme())));
        }

        let start = Instant::now();
        let mut attempt = 0;
        loop {
            match self.attempt(&parsed, headers).await {
                Ok(body) => {
                    tracing::debug!(
                        url = %parsed,
                        attempts = attempt + 1,
                        bytes = body.len(),
                        "fetched in {}ms",
                        start.elapsed().as_millis()
                    );
                    return Ok(body);
                }
                Err(failure) => {
                    let Some(wait) = retry.delay_for(&failure, attempt).filter(|_| attempt < retry.max_retries)
                    else {
                        return Err(failure.into());
                    };
                    tracing::warn!(url = %parsed, attempt = attempt + 1, ?wait, "fetch failed: {failure}");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nrooms";
    const TOO_MANY: &str = "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAVAILABLE: &str = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    /// Serve the scripted responses in order, one per connection.
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);

                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf[read..]).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    read += n;
                }
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}/list?ek=001"), hits)
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::from_client(Client::builder().no_proxy().build().unwrap())
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            rate_limit_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_retry_config_from_app_config() {
        let retry = RetryConfig::from(&AppConfig::default());
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.base_delay, Duration::from_millis(1_000));
        assert_eq!(retry.rate_limit_delay, Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_secs(1));
        assert_eq!(retry.backoff(1), Duration::from_secs(2));
        assert_eq!(retry.backoff(3), Duration::from_secs(8));
        assert_eq!(retry.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn test_rate_limit_delay_prefers_larger_retry_after() {
        let retry = fast_retry(3);
        let short = AttemptError::RateLimited { retry_after: Some(Duration::from_millis(1)) };
        let long = AttemptError::RateLimited { retry_after: Some(Duration::from_secs(2)) };
        assert_eq!(retry.delay_for(&short, 0), Some(Duration::from_millis(5)));
        assert_eq!(retry.delay_for(&long, 0), Some(Duration::from_secs(2)));
        assert_eq!(retry.delay_for(&AttemptError::Status(StatusCode::NOT_FOUND), 0), None);
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(header::RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_fetch_new_client() {
        assert!(HttpFetcher::new(&AppConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_retries_after_rate_limit() {
        let (url, hits) = serve(vec![TOO_MANY, OK]).await;
        let body = fetcher().fetch(&url, &HeaderMap::new(), &fast_retry(3)).await.unwrap();
        assert_eq!(body, "rooms");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_client_errors() {
        let (url, hits) = serve(vec![NOT_FOUND, OK]).await;
        let result = fetcher().fetch(&url, &HeaderMap::new(), &fast_retry(3)).await;
        assert!(matches!(result, Err(Error::HttpError(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_raises_after_exhaustion() {
        let (url, hits) = serve(vec![UNAVAILABLE, UNAVAILABLE, UNAVAILABLE]).await;
        let result = fetcher().fetch(&url, &HeaderMap::new(), &fast_retry(2)).await;
        assert!(matches!(result, Err(Error::HttpError(msg)) if msg.contains("503")));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let result = fetcher().fetch("ftp://example.com/list", &HeaderMap::new(), &fast_retry(0)).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
        let result = fetcher().fetch("not a url", &HeaderMap::new(), &fast_retry(0)).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
