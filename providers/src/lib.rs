//! LLM provider clients for single-shot completions.
//!
//! - [`complete`] - unified entry point that dispatches on [`Provider`]
//! - [`claude`] - Anthropic Messages API
//! - [`openai`] - OpenAI-compatible Chat Completions API (also serves local
//!   gateways through a custom base URL)
//!
//! Requests go through [`retry::send_with_retry`], so transient failures
//! (429, 5xx, dropped connections) are retried before surfacing as
//! [`ProviderError`].

pub mod retry;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(alias = "anthropic")]
    Claude,
    OpenAI,
}

impl Provider {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Some(Self::Claude),
            "openai" | "gpt" => Some(Self::OpenAI),
            _ => None,
        }
    }

    /// Environment variable consulted when no key is configured.
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::Claude => "ANTHROPIC_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }

    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Claude => "claude-sonnet-4-5",
            Self::OpenAI => "gpt-4o-mini",
        }
    }

    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Claude => "https://api.anthropic.com/v1",
            Self::OpenAI => "https://api.openai.com/v1",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::OpenAI => "OpenAI",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not decode {provider} response: {detail}")]
    Decode {
        provider: Provider,
        detail: String,
    },
    #[error("{0} returned no choices")]
    EmptyResponse(Provider),
    #[error("invalid base URL {url:?}: {detail}")]
    BaseUrl { url: String, detail: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Provider, credentials and sampling settings for one model.
#[derive(Clone)]
pub struct ApiConfig {
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    temperature: f32,
    max_tokens: u32,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ApiConfig {
    #[must_use]
    pub fn new(provider: Provider, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: model.into(),
            base_url: provider.default_base_url().to_string(),
            timeout: Duration::from_secs(60),
            temperature: 0.2,
            max_tokens: 512,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub(crate) fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.base_url)
    }
}

/// HTTPS is required except for loopback hosts (local gateways, tests).
fn requires_https(base_url: &str) -> Result<bool, ProviderError> {
    let url = url::Url::parse(base_url).map_err(|e| ProviderError::BaseUrl {
        url: base_url.to_string(),
        detail: e.to_string(),
    })?;
    let loopback = match url.host() {
        Some(url::Host::Domain(host)) => host.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };
    Ok(!loopback)
}

/// Client tuned for one `ApiConfig`: request timeout, keepalive, no redirects.
pub fn http_client(config: &ApiConfig) -> Result<reqwest::Client, ProviderError> {
    use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
    use reqwest::redirect::Policy;

    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("wedge/", env!("CARGO_PKG_VERSION"))),
    );

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(config.timeout())
        .redirect(Policy::none())
        .https_only(requires_https(config.base_url())?)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
        .build()
        .map_err(ProviderError::Client)
}

/// Error body text, capped so a misbehaving server cannot flood logs.
pub async fn read_capped_error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// One system + user exchange.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
}

/// Send a single-turn completion and return the model's text.
///
/// An empty string is a valid answer; callers decide what it means.
pub async fn complete(
    client: &reqwest::Client,
    config: &ApiConfig,
    request: CompletionRequest<'_>,
) -> Result<String, ProviderError> {
    let retry_config = retry::RetryConfig::default();
    tracing::debug!(
        provider = %config.provider(),
        model = config.model(),
        user_bytes = request.user.len(),
        "Sending completion request"
    );
    match config.provider() {
        Provider::Claude => claude::complete(client, config, request, &retry_config).await,
        Provider::OpenAI => openai::complete(client, config, request, &retry_config).await,
    }
}

/// Anthropic Messages API (`POST {base}/messages`), non-streaming.
pub mod claude;

/// OpenAI-compatible Chat Completions (`POST {base}/chat/completions`).
pub mod openai;
