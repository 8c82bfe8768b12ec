//! Suggestion oracle over HTTP: prompt shape, provider wire formats, failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wedge_engine::wedge_providers::{ApiConfig, Provider};
use wedge_engine::wedge_types::{BufferId, ObligationSyntax, Statement};
use wedge_engine::{
    LlmOracle, OracleClient, Rejection, SuggestionRequest, context_window, extract_obligation,
};

use crate::common::{PROOF, TARGET_LINE, mount_openai_answers, openai_config};

async fn suggest(config: ApiConfig, rejected: &[Statement]) -> Result<Statement, Rejection> {
    let syntax = ObligationSyntax::default();
    let buffer = BufferId::new("/work/proof.dfy");
    let target = extract_obligation(PROOF, TARGET_LINE, &syntax).unwrap();
    let context = context_window(PROOF, TARGET_LINE, 5);
    let request = SuggestionRequest {
        buffer: &buffer,
        context: &context,
        target: &target,
        buffer_text: PROOF,
        rejected,
    };
    let oracle = LlmOracle::new(config, syntax.clone(), 64 * 1024).unwrap();
    OracleClient::new(oracle, syntax).suggest(&request).await
}

#[tokio::test]
async fn prompt_carries_target_context_and_rejections() {
    let server = MockServer::start().await;
    mount_openai_answers(&server, &["g > x"]).await;
    let rejected = [Statement::parse("x >= 1", &ObligationSyntax::default()).unwrap()];

    let statement = suggest(openai_config(&server), &rejected).await.unwrap();
    assert_eq!(statement.as_str(), "g > x");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let auth = requests[0].headers.get("authorization").unwrap();
    assert_eq!(auth.to_str().unwrap(), "Bearer sk-test");

    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["messages"][0]["role"], "system");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("File: /work/proof.dfy"));
    assert!(user.contains("line 11: x > 0 && g > x"));
    assert!(user.contains("<<<TARGET>>>  assert x > 0 && g > x;<<<END>>>"));
    assert!(user.contains("Context:\n  var c := b + 1;"));
    assert!(user.contains("- x >= 1"));
    assert!(user.contains("Full file:\nmethod M(x: int)"));
}

#[tokio::test]
async fn claude_messages_api_is_supported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_test",
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "text", "text": "```dafny\ng >= x + 1\n```" }],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ApiConfig::new(Provider::Claude, "sk-ant-test", "claude-sonnet-4-5")
        .with_base_url(format!("{}/v1", server.uri()))
        .with_timeout(Duration::from_secs(5));
    let statement = suggest(config, &[]).await.unwrap();
    assert_eq!(statement.as_str(), "g >= x + 1");
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&attempts);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |_: &wiremock::Request| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(503).insert_header("retry-after-ms", "10")
            } else {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "choices": [{
                        "message": { "role": "assistant", "content": "g > x" },
                        "finish_reason": "stop"
                    }]
                }))
            }
        })
        .mount(&server)
        .await;

    let statement = suggest(openai_config(&server), &[]).await.unwrap();
    assert_eq!(statement.as_str(), "g > x");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejected_credentials_make_the_oracle_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = suggest(openai_config(&server), &[]).await.unwrap_err();
    let detail = match err {
        Rejection::Unavailable(detail) => detail,
        other => panic!("expected Unavailable, got {other:?}"),
    };
    assert!(detail.contains("401"), "{detail}");
}

#[tokio::test]
async fn multi_statement_answer_is_malformed() {
    let server = MockServer::start().await;
    mount_openai_answers(&server, &["g > x\nx > 0"]).await;

    let err = suggest(openai_config(&server), &[]).await.unwrap_err();
    assert!(matches!(err, Rejection::Malformed(_)));
}
