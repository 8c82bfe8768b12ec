//! Retrying provider requests.
//!
//! Defaults match the vendor SDKs: two retries, 500ms doubling to an 8s cap,
//! up to 25% down-jitter. Retry hints from the server (`Retry-After`,
//! `Retry-After-Ms`, `x-should-retry`) take precedence. All attempts of one
//! request share an `Idempotency-Key` and carry their `X-Retry-Count`.

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};
use tokio::time::sleep;
use uuid::Uuid;

use crate::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial request.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Down-jitter factor (0.25 = up to 25% shorter).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `step + 1`. A usable server hint wins over
    /// the exponential schedule.
    #[must_use]
    pub fn delay(&self, step: u32, headers: Option<&HeaderMap>) -> Duration {
        if let Some(hint) = headers.and_then(parse_retry_after) {
            return hint;
        }
        let doubled = self
            .initial_delay
            .saturating_mul(2_u32.saturating_pow(step))
            .min(self.max_delay);
        let shrink = 1.0 - rand::random::<f64>() * self.jitter_factor;
        doubled.mul_f64(shrink)
    }
}

const MAX_SERVER_HINT: Duration = Duration::from_secs(60);

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Server-provided delay from `Retry-After-Ms` (float millis) or
/// `Retry-After` (integer seconds). Hints outside (0, 60s) are ignored.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let usable = |d: &Duration| !d.is_zero() && *d < MAX_SERVER_HINT;

    header_str(headers, "retry-after-ms")
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .filter(usable)
        .or_else(|| {
            header_str(headers, "retry-after")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .filter(usable)
        })
}

/// `x-should-retry` decides when present; otherwise timeouts, conflicts,
/// rate limits and server errors are retried.
#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    match header_str(headers, "x-should-retry") {
        Some(v) if v.eq_ignore_ascii_case("true") => true,
        Some(v) if v.eq_ignore_ascii_case("false") => false,
        _ => status.is_server_error() || matches!(status.as_u16(), 408 | 409 | 429),
    }
}

#[must_use]
pub fn generate_idempotency_key() -> String {
    format!("wedge-retry-{}", Uuid::new_v4())
}

/// What one attempt produced, from the retry loop's point of view.
enum Attempt {
    Done(Response),
    Again {
        wait: Duration,
        why: String,
    },
    Fail(ProviderError),
}

async fn judge(
    sent: Result<Response, reqwest::Error>,
    step: u32,
    config: &RetryConfig,
) -> Attempt {
    let last = step >= config.max_retries;
    match sent {
        Ok(response) if response.status().is_success() => Attempt::Done(response),
        Ok(response) => {
            let status = response.status();
            if !last && should_retry(status, response.headers()) {
                return Attempt::Again {
                    wait: config.delay(step, Some(response.headers())),
                    why: status.to_string(),
                };
            }
            let body = crate::read_capped_error_body(response).await;
            Attempt::Fail(ProviderError::Http {
                status: status.as_u16(),
                body,
            })
        }
        Err(e) if !last && (e.is_connect() || e.is_timeout() || e.is_request()) => {
            Attempt::Again {
                wait: config.delay(step, None),
                why: e.to_string(),
            }
        }
        Err(e) => Attempt::Fail(ProviderError::Transport {
            attempts: step + 1,
            source: e,
        }),
    }
}

/// Send a request built by `build_request`, retrying per `config`.
///
/// Returns the first 2xx response. A non-2xx response that is not retried
/// (or is still failing on the last attempt) becomes `ProviderError::Http`
/// with a capped body.
pub async fn send_with_retry<F>(
    build_request: F,
    config: &RetryConfig,
) -> Result<Response, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    let key = generate_idempotency_key();

    let mut step = 0;
    loop {
        let sent = build_request()
            .header("Idempotency-Key", &key)
            .header("X-Retry-Count", step.to_string())
            .send()
            .await;
        match judge(sent, step, config).await {
            Attempt::Done(response) => return Ok(response),
            Attempt::Fail(e) => return Err(e),
            Attempt::Again { wait, why } => {
                tracing::debug!(
                    retry = step + 1,
                    wait_ms = wait.as_millis(),
                    "Provider request failed ({why}), retrying"
                );
                sleep(wait).await;
            }
        }
        step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after_prefers_millis() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after-ms", HeaderValue::from_static("1500"));
        headers.insert("retry-after", HeaderValue::from_static("9"));
        assert_eq!(
            parse_retry_after(&headers),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_parse_retry_after_ignores_out_of_range() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("0"));
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_should_retry_statuses_and_override() {
        let mut headers = HeaderMap::new();
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS, &headers));
        assert!(should_retry(StatusCode::BAD_GATEWAY, &headers));
        assert!(should_retry(StatusCode::REQUEST_TIMEOUT, &headers));
        assert!(!should_retry(StatusCode::BAD_REQUEST, &headers));
        assert!(!should_retry(StatusCode::UNAUTHORIZED, &headers));

        headers.insert("x-should-retry", HeaderValue::from_static("true"));
        assert!(should_retry(StatusCode::BAD_REQUEST, &headers));
        headers.insert("x-should-retry", HeaderValue::from_static("false"));
        assert!(!should_retry(StatusCode::SERVICE_UNAVAILABLE, &headers));
    }

    #[test]
    fn test_retry_delay_backs_off_within_jitter_and_cap() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let first = config.delay(0, None);
            assert!(first >= Duration::from_millis(375) && first <= Duration::from_millis(500));

            let second = config.delay(1, None);
            assert!(second >= Duration::from_millis(750) && second <= Duration::from_secs(1));

            let late = config.delay(10, None);
            assert!(late <= config.max_delay);
        }
    }

    #[test]
    fn test_idempotency_keys_are_unique() {
        let a = generate_idempotency_key();
        let b = generate_idempotency_key();
        assert!(a.starts_with("wedge-retry-"));
        assert_ne!(a, b);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry_config() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_retry_on_503_then_success() {
        let server = MockServer::start().await;
        let attempt = AtomicU32::new(0);

        Mock::given(method("POST"))
            .and(path("/complete"))
            .respond_with(move |_: &wiremock::Request| {
                if attempt.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_string("ok")
                }
            })
            .expect(2)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/complete", server.uri());
        let response = send_with_retry(|| client.post(&url), &fast_retry_config())
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_http_error_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/complete", server.uri());
        let err = send_with_retry(|| client.post(&url), &fast_retry_config())
            .await
            .unwrap_err();
        match err {
            ProviderError::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/complete", server.uri());
        let err = send_with_retry(|| client.post(&url), &fast_retry_config())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_idempotency_key_stable_and_retry_count_increments() {
        let server = MockServer::start().await;
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
        let recorder = Arc::clone(&seen);

        Mock::given(method("POST"))
            .respond_with(move |req: &wiremock::Request| {
                let header = |name: &str| {
                    req.headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                let mut seen = recorder.lock().unwrap();
                seen.push((header("idempotency-key"), header("x-retry-count")));
                if seen.len() < 3 {
                    ResponseTemplate::new(429)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/complete", server.uri());
        send_with_retry(|| client.post(&url), &fast_retry_config())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(key, _)| key == &seen[0].0));
        let counts: Vec<&str> = seen.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(counts, ["0", "1", "2"]);
    }
}
