//! Suggestion oracle: asks an external model for one stepping-stone statement.
//!
//! [`SuggestionOracle`] is the raw transport (text in, text out). [`OracleClient`]
//! enforces the exactly-one-statement contract on top of it, so nothing
//! malformed ever reaches the document.

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use regex::Regex;
use wedge_providers::{ApiConfig, CompletionRequest, ProviderError};
use wedge_types::{AbandonReason, BufferId, Obligation, ObligationSyntax, Statement};

pub type OracleFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything the oracle may use to propose a candidate.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionRequest<'a> {
    pub buffer: &'a BufferId,
    pub context: &'a str,
    pub target: &'a Obligation,
    pub buffer_text: &'a str,
    /// Candidates already disabled for this target.
    pub rejected: &'a [Statement],
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Other(String),
}

pub trait SuggestionOracle: Send {
    fn complete<'a>(
        &'a self,
        request: &'a SuggestionRequest<'a>,
    ) -> OracleFut<'a, Result<String, OracleError>>;
}

/// A response that cannot be used as a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Unavailable(String),
    Malformed(String),
    Declined,
}

impl From<Rejection> for AbandonReason {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Unavailable(detail) => Self::OracleUnavailable(detail),
            Rejection::Malformed(detail) => Self::OracleMalformed(detail),
            Rejection::Declined => Self::OracleDeclined,
        }
    }
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)\A```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?```\z")
            .expect("valid code fence regex")
    })
}

/// Trim whitespace and at most one surrounding markdown code fence.
#[must_use]
pub fn normalize_response(raw: &str) -> &str {
    let trimmed = raw.trim();
    match code_fence().captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

pub struct OracleClient<O> {
    oracle: O,
    syntax: ObligationSyntax,
}

impl<O: SuggestionOracle> OracleClient<O> {
    pub fn new(oracle: O, syntax: ObligationSyntax) -> Self {
        Self { oracle, syntax }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Ask for one candidate statement.
    pub async fn suggest(&self, request: &SuggestionRequest<'_>) -> Result<Statement, Rejection> {
        let raw = match self.oracle.complete(request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(buffer = %request.buffer, error = %e, "Suggestion oracle unavailable");
                return Err(Rejection::Unavailable(e.to_string()));
            }
        };

        let text = normalize_response(&raw);
        if text.is_empty() {
            tracing::info!(buffer = %request.buffer, "Suggestion oracle declined");
            return Err(Rejection::Declined);
        }

        Statement::parse(text, &self.syntax).map_err(|e| {
            tracing::info!(
                buffer = %request.buffer,
                error = %e,
                response_bytes = raw.len(),
                "Rejected malformed suggestion"
            );
            Rejection::Malformed(e.to_string())
        })
    }
}

const SYSTEM_PROMPT: &str = "You help a program verifier prove a failing obligation by \
proposing ONE intermediate fact that, asserted just above the obligation, makes it easier \
to prove. Reply with the bare boolean expression only: no explanation, no obligation \
keyword, no terminator, a single line.";

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// User prompt: rules, context window, target, prior failures, then the buffer.
#[must_use]
pub fn build_user_prompt(
    request: &SuggestionRequest<'_>,
    syntax: &ObligationSyntax,
    max_buffer_bytes: usize,
) -> String {
    use std::fmt::Write;

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Do not start with `{}` and do not include `{}`.\n",
        syntax.keyword, syntax.terminator
    );
    let _ = writeln!(prompt, "File: {}", request.buffer);
    let _ = writeln!(prompt, "Failing obligation ({}):", request.target);
    let _ = writeln!(prompt, "{}\n", request.target.statement());
    let _ = writeln!(prompt, "Context:\n{}\n", request.context);

    if !request.rejected.is_empty() {
        prompt.push_str("Already tried without success (do not repeat):\n");
        for candidate in request.rejected {
            let _ = writeln!(prompt, "- {candidate}");
        }
        prompt.push('\n');
    }

    let cut = floor_char_boundary(request.buffer_text, max_buffer_bytes);
    let _ = writeln!(prompt, "Full file:\n{}", &request.buffer_text[..cut]);
    if cut < request.buffer_text.len() {
        prompt.push_str("...(truncated)\n");
    }
    prompt
}

/// [`SuggestionOracle`] backed by an LLM provider.
pub struct LlmOracle {
    client: reqwest::Client,
    config: ApiConfig,
    syntax: ObligationSyntax,
    max_buffer_bytes: usize,
}

impl LlmOracle {
    pub fn new(
        config: ApiConfig,
        syntax: ObligationSyntax,
        max_buffer_bytes: usize,
    ) -> Result<Self, ProviderError> {
        let client = wedge_providers::http_client(&config)?;
        Ok(Self {
            client,
            config,
            syntax,
            max_buffer_bytes,
        })
    }
}

impl SuggestionOracle for LlmOracle {
    fn complete<'a>(
        &'a self,
        request: &'a SuggestionRequest<'a>,
    ) -> OracleFut<'a, Result<String, OracleError>> {
        Box::pin(async move {
            let user = build_user_prompt(request, &self.syntax, self.max_buffer_bytes);
            let text = wedge_providers::complete(
                &self.client,
                &self.config,
                CompletionRequest {
                    system: SYSTEM_PROMPT,
                    user: &user,
                },
            )
            .await?;
            Ok(text)
        })
    }
}
