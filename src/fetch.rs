//! HTTP fetch collaborator.
//!
//! Discovery and content-fill only see the [`Fetcher`] trait: give it a URL,
//! get page text back or a [`FetchError`] meaning "unavailable". The default
//! [`HttpFetcher`] retries transient failures internally with exponential
//! backoff and jitter:
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Only HTTP 403/429 and network-level errors are retried. Any other status
//! of 400 or above, and any content type that is neither HTML nor XML, is
//! final.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::{Rng, rng};
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderValue, PRAGMA, REFERER,
};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::error::FetchError;

const ACCEPT_MARKUP: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Source of page text.
///
/// Implementations must never panic on a bad page; every failure is a
/// [`FetchError`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for &T {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url).await
    }
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for std::sync::Arc<T> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        (**self).fetch(url).await
    }
}

/// Tunables for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub accept_language: String,
    pub request_timeout: Duration,
    /// Total attempts per URL, including the first one.
    pub max_attempts: usize,
    /// Initial backoff delay; doubles with each retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
                .to_string(),
            accept_language: "hu-HU,hu;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            request_timeout: Duration::from_secs(25),
            max_attempts: 3,
            base_delay: Duration::from_millis(750),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

/// Outcome of a single attempt.
enum Attempt {
    Done(Result<String, FetchError>),
    Retry(FetchError),
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn headers(&self, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_MARKUP));
        if let Ok(v) = HeaderValue::from_str(&self.settings.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, v);
        }
        if let Ok(v) = HeaderValue::from_str(url) {
            headers.insert(REFERER, v);
        }
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers
    }

    async fn attempt(&self, url: &reqwest::Url) -> Attempt {
        let request = self
            .client
            .get(url.clone())
            .headers(self.headers(url.as_str()));
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(FetchError::Network(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::Retry(FetchError::HttpStatus(status.as_u16()));
        }
        if status.as_u16() >= 400 {
            return Attempt::Done(Err(FetchError::HttpStatus(status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !is_markup(&content_type) {
            return Attempt::Done(Err(FetchError::UnsupportedContentType(content_type)));
        }

        match response.text().await {
            Ok(text) => Attempt::Done(Ok(text)),
            Err(e) => Attempt::Retry(FetchError::Network(e.to_string())),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(16);
        let delay = self
            .settings
            .base_delay
            .saturating_mul(1 << exp)
            .min(self.settings.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

fn is_markup(content_type: &str) -> bool {
    content_type.contains("html") || content_type.contains("xml")
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        let t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match self.attempt(&parsed).await {
                Attempt::Done(result) => {
                    match &result {
                        Ok(text) => debug!(
                            %url,
                            bytes = text.len(),
                            elapsed_ms = t0.elapsed().as_millis() as u64,
                            "Fetched page"
                        ),
                        Err(e) => debug!(%url, error = %e, "Page unavailable"),
                    }
                    return result;
                }
                Attempt::Retry(e) if attempt >= self.settings.max_attempts => {
                    warn!(%url, attempt, error = %e, "Fetch exhausted retries");
                    return Err(e);
                }
                Attempt::Retry(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        %url,
                        attempt,
                        max = self.settings.max_attempts,
                        ?delay,
                        error = %e,
                        "Fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
