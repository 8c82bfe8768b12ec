use serde::Deserialize;
use serde_json::json;

use crate::retry::{RetryConfig, send_with_retry};
use crate::{ApiConfig, CompletionRequest, Provider, ProviderError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

fn build_request_body(config: &ApiConfig, request: CompletionRequest<'_>) -> serde_json::Value {
    json!({
        "model": config.model(),
        "max_tokens": config.max_tokens(),
        "temperature": config.temperature(),
        "system": request.system,
        "messages": [
            { "role": "user", "content": request.user }
        ]
    })
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    fn into_text(self) -> String {
        self.content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect()
    }
}

pub(crate) async fn complete(
    client: &reqwest::Client,
    config: &ApiConfig,
    request: CompletionRequest<'_>,
    retry_config: &RetryConfig,
) -> Result<String, ProviderError> {
    let url = config.endpoint("messages");
    let body = build_request_body(config, request);

    let response = send_with_retry(
        || {
            client
                .post(&url)
                .header("x-api-key", config.api_key())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
        },
        retry_config,
    )
    .await?;

    let parsed: MessagesResponse = response.json().await.map_err(|e| ProviderError::Decode {
        provider: Provider::Claude,
        detail: e.to_string(),
    })?;
    if parsed.stop_reason.as_deref() == Some("max_tokens") {
        tracing::warn!(model = config.model(), "Claude response truncated at max_tokens");
    }
    Ok(parsed.into_text())
}
