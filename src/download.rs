//! HTTP retrieval with bounded retries.
//!
//! Transport sits behind [`HttpSource`] so the retry policy can be driven by
//! an in-memory source in tests. [`ReqwestSource`] is the real thing.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use indicatif::ProgressBar;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ETAG, LAST_MODIFIED},
    Client, RequestBuilder,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    cli::{create_spinner, set_byte_progress_style},
    error::{DecodeError, FetchError},
};

/// Media type the OECD SDMX endpoint expects for JSON output.
pub const SDMX_JSON: &str = "application/vnd.sdmx.data+json;version=1.0.0-wd";

pub fn accept(media_type: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(media_type));
    headers
}

/// HTTP cache validators returned with a response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validators {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl Validators {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Validators {
            last_modified: read(LAST_MODIFIED),
            etag: read(ETAG),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_modified.is_none() && self.etag.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub validators: Validators,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Anything that can answer GET and HEAD requests.
///
/// Non-2xx answers come back as `Ok` with their status; only transport
/// failures are errors.
#[async_trait]
pub trait HttpSource: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<HttpResponse, FetchError>;

    async fn head(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<HttpResponse, FetchError>;
}

pub struct ReqwestSource {
    client: Client,
    show_progress: bool,
}

impl ReqwestSource {
    pub fn new(show_progress: bool) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("climate-feeds/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(ReqwestSource {
            client,
            show_progress,
        })
    }

    async fn send(
        &self,
        request: RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response, FetchError> {
        request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))
    }
}

/// Upper bound on the buffer reserved from a Content-Length header.
const MAX_PREALLOCATION: u64 = 64 << 20;

fn preallocation(content_length: u64) -> usize {
    usize::try_from(content_length.min(MAX_PREALLOCATION)).unwrap_or(0)
}

fn classify(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout.as_secs())
    } else {
        FetchError::Network(e.to_string())
    }
}

#[async_trait]
impl HttpSource for ReqwestSource {
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<HttpResponse, FetchError> {
        let response = self
            .send(self.client.get(url).headers(headers.clone()), timeout)
            .await?;

        let status = response.status().as_u16();
        let validators = Validators::from_headers(response.headers());
        if !response.status().is_success() {
            return Ok(HttpResponse {
                status,
                validators,
                body: Vec::new(),
            });
        }

        let progress_bar = if self.show_progress {
            create_spinner("Downloading...".to_string())
        } else {
            ProgressBar::hidden()
        };

        // Switch to a byte bar when the server tells us the size
        let total_size = response.content_length().unwrap_or(0);
        if total_size > 0 {
            set_byte_progress_style(&progress_bar, total_size);
        }

        let mut body = Vec::with_capacity(preallocation(total_size));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(e, timeout))?;
            body.extend_from_slice(&chunk);
            progress_bar.set_position(body.len() as u64);
        }
        progress_bar.finish_and_clear();

        Ok(HttpResponse {
            status,
            validators,
            body,
        })
    }

    async fn head(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<HttpResponse, FetchError> {
        let response = self
            .send(self.client.head(url).headers(headers.clone()), timeout)
            .await?;

        Ok(HttpResponse {
            status: response.status().as_u16(),
            validators: Validators::from_headers(response.headers()),
            body: Vec::new(),
        })
    }
}

/// How hard to try before giving up on a resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Timeout of the first attempt.
    pub timeout: Duration,
    /// Added to the timeout after each timed-out attempt.
    pub timeout_step: Duration,
    /// Pause after a failed status or connection error.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(180),
            timeout_step: Duration::from_secs(60),
            delay: Duration::from_secs(10),
        }
    }
}

/// A parsed payload together with the response it came from.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub response: HttpResponse,
}

/// GETs `url` and parses the body, retrying transport failures.
///
/// Timeouts escalate the next attempt's timeout, other failures pause for
/// `policy.delay`. A body that fails to parse ends the loop at once.
pub async fn fetch_with_retry<S, T, F>(
    source: &S,
    url: &str,
    headers: &HeaderMap,
    policy: &RetryPolicy,
    parse: F,
) -> Result<Fetched<T>, FetchError>
where
    S: HttpSource + ?Sized,
    F: Fn(&[u8]) -> Result<T, DecodeError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut timeout = policy.timeout;
    let mut attempt = 0;

    loop {
        attempt += 1;
        info!(
            attempt,
            attempts,
            timeout_secs = timeout.as_secs(),
            "GET {}",
            url
        );

        let failure = match source.get(url, headers, timeout).await {
            Ok(response) if response.is_success() => {
                debug!(bytes = response.body.len(), "response received");
                return match parse(&response.body) {
                    Ok(value) => Ok(Fetched { value, response }),
                    Err(e) => {
                        error!(error = %e, "payload rejected, not retrying");
                        Err(e.into())
                    }
                };
            }
            Ok(response) => FetchError::Status(response.status),
            Err(e) => e,
        };

        if !failure.is_retryable() {
            return Err(failure);
        }
        if attempt >= attempts {
            error!(attempts, error = %failure, "giving up on {}", url);
            return Err(FetchError::Exhausted {
                attempts,
                last: Box::new(failure),
            });
        }

        match failure {
            FetchError::Timeout(_) => {
                timeout += policy.timeout_step;
                warn!(
                    error = %failure,
                    next_timeout_secs = timeout.as_secs(),
                    "attempt {attempt} timed out, raising timeout"
                );
            }
            _ => {
                warn!(
                    error = %failure,
                    delay_secs = policy.delay.as_secs(),
                    "attempt {attempt} failed, retrying"
                );
                sleep(policy.delay).await;
            }
        }
    }
}


// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::reading::sdmx::decode_table;
    use tokio::time::Instant;

    #[test]
    fn should_cap_preallocation() {
        assert_eq!(preallocation(0), 0);
        assert_eq!(preallocation(1024), 1024);
        assert_eq!(preallocation(u64::MAX), 64 << 20);
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    fn raw_body(body: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(body.to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn should_return_body_after_two_server_errors() {
        let source = StubSource::new()
            .with_get(status(503))
            .with_get(status(503))
            .with_get(ok(b"payload"));
        let started = Instant::now();

        let fetched = fetch_with_retry(&source, "http://test", &HeaderMap::new(), &policy(), raw_body)
            .await
            .unwrap();

        assert_eq!(fetched.value, b"payload");
        assert_eq!(source.get_calls(), 3);
        // paused between 1→2 and 2→3
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn should_give_up_after_max_attempts() {
        let source = StubSource::new()
            .with_get(status(500))
            .with_get(Err(FetchError::Network("connection refused".into())))
            .with_get(status(502))
            .with_get(ok(b"never reached"));

        let err = fetch_with_retry(&source, "http://test", &HeaderMap::new(), &policy(), raw_body)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(source.get_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn should_escalate_timeout_without_pausing() {
        let source = StubSource::new()
            .with_get(Err(FetchError::Timeout(180)))
            .with_get(ok(b"late"));
        let started = Instant::now();

        fetch_with_retry(&source, "http://test", &HeaderMap::new(), &policy(), raw_body)
            .await
            .unwrap();

        let timeouts = source.get_timeouts.lock().unwrap().clone();
        assert_eq!(timeouts, vec![Duration::from_secs(180), Duration::from_secs(240)]);
        assert!(started.elapsed() < policy().delay);
    }

    #[tokio::test(start_paused = true)]
    async fn should_not_retry_malformed_payload() {
        let source = StubSource::new()
            .with_get(ok(br#"{"data": {}}"#))
            .with_get(ok(b"unused"));

        let err = fetch_with_retry(&source, "http://test", &HeaderMap::new(), &policy(), |b| {
            decode_table(b, "CO2_Emissions")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, FetchError::Decode(DecodeError::MissingField(_))));
        assert_eq!(source.get_calls(), 1);
    }

    #[tokio::test]
    async fn should_make_single_attempt_when_configured_for_one() {
        let source = StubSource::new().with_get(status(404));
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };

        let err = fetch_with_retry(&source, "http://test", &HeaderMap::new(), &policy, raw_body)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 1, .. }));
    }

    #[test]
    fn should_read_validators_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_static("\"abc\""));

        let validators = Validators::from_headers(&headers);

        assert_eq!(validators.etag.as_deref(), Some("\"abc\""));
        assert_eq!(validators.last_modified, None);
        assert!(!validators.is_empty());
    }

    #[test]
    fn should_switch_spinner_to_byte_bar() {
        let pb = create_spinner("Downloading...".to_string());

        set_byte_progress_style(&pb, 1000);
        pb.set_position(500);

        assert_eq!(pb.length(), Some(1000));
        assert_eq!(pb.position(), 500);
        pb.finish_and_clear();
    }
}
