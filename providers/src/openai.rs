use serde::Deserialize;
use serde_json::json;

use crate::retry::{RetryConfig, send_with_retry};
use crate::{ApiConfig, CompletionRequest, Provider, ProviderError};

fn build_request_body(config: &ApiConfig, request: CompletionRequest<'_>) -> serde_json::Value {
    json!({
        "model": config.model(),
        "temperature": config.temperature(),
        "max_tokens": config.max_tokens(),
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user }
        ]
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    /// `null` when the model refuses or only calls tools.
    #[serde(default)]
    content: Option<String>,
}

pub(crate) async fn complete(
    client: &reqwest::Client,
    config: &ApiConfig,
    request: CompletionRequest<'_>,
    retry_config: &RetryConfig,
) -> Result<String, ProviderError> {
    let url = config.endpoint("chat/completions");
    let body = build_request_body(config, request);
    let auth_header = format!("Bearer {}", config.api_key());

    let response = send_with_retry(
        || {
            client
                .post(&url)
                .header("Authorization", &auth_header)
                .header("content-type", "application/json")
                .json(&body)
        },
        retry_config,
    )
    .await?;

    let parsed: ChatCompletion = response.json().await.map_err(|e| ProviderError::Decode {
        provider: Provider::OpenAI,
        detail: e.to_string(),
    })?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyResponse(Provider::OpenAI))?;
    if choice.finish_reason.as_deref() == Some("length") {
        tracing::warn!(model = config.model(), "OpenAI response truncated at max_tokens");
    }
    Ok(choice.message.content.unwrap_or_default())
}
