//! Shared test utilities and fixtures
//!
//! Common infrastructure for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wedge_engine::wedge_lsp::{DiagnosticSeverity, WedgeDiagnostic};
use wedge_engine::wedge_providers::{ApiConfig, Provider};
use wedge_engine::wedge_types::{BufferId, DocumentVersion, ObligationSyntax};
use wedge_engine::{
    DriverOptions, FeedbackAdapter, FileDocuments, LlmOracle, Notification, Orchestrator,
    OrchestratorConfig, SeverityClassifier, Verifier, VerifierError, VerifierFut,
    extract_obligation,
};

/// Dafny-flavoured buffer whose line 10 (0-indexed) is the failing target.
pub const PROOF: &str = "\
method M(x: int)
  requires x > 0
{
  var a := x;
  var b := a + 1;
  var c := b + 1;
  var d := c + 1;
  var e := d + 1;
  var f := e + 1;
  var g := f + 1;
  assert x > 0 && g > x;
}
";

pub const TARGET_LINE: u32 = 10;

/// Serve `answers` in order from an OpenAI-compatible endpoint, then empty
/// answers. Returns the shared request counter.
pub async fn mount_openai_answers(server: &MockServer, answers: &[&str]) -> Arc<AtomicUsize> {
    let answers: Vec<String> = answers.iter().map(|a| (*a).to_string()).collect();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |_: &wiremock::Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let content = answers.get(n).cloned().unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": format!("chatcmpl-{n}"),
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": content },
                    "finish_reason": "stop"
                }]
            }))
        })
        .mount(server)
        .await;

    calls
}

pub fn openai_config(server: &MockServer) -> ApiConfig {
    ApiConfig::new(Provider::OpenAI, "sk-test", "gpt-4o-mini")
        .with_base_url(format!("{}/v1", server.uri()))
        .with_timeout(Duration::from_secs(5))
}

pub fn write_buffer(dir: &Path, name: &str, content: &str) -> BufferId {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    BufferId::new(path)
}

/// A verifier that decides obligations by rule instead of by proof.
///
/// A statement holds when it is in `provable`, or when the statement it
/// `needs` appears as an active obligation on an earlier line.
#[derive(Default)]
pub struct RuleVerifier {
    provable: HashSet<String>,
    needs: HashMap<String, String>,
    pending: VecDeque<Notification>,
    version: i32,
    pub requests: usize,
}

impl RuleVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provable(mut self, statement: &str) -> Self {
        self.provable.insert(statement.to_string());
        self
    }

    pub fn needs(mut self, statement: &str, hypothesis: &str) -> Self {
        self.needs
            .insert(statement.to_string(), hypothesis.to_string());
        self
    }

    fn check(&self, text: &str) -> Vec<WedgeDiagnostic> {
        let syntax = ObligationSyntax::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut failures = Vec::new();

        for line in 0..text.lines().count() as u32 {
            let Ok(obligation) = extract_obligation(text, line, &syntax) else {
                continue;
            };
            let statement = obligation.statement().as_str().to_string();
            let holds = self.provable.contains(&statement)
                || self
                    .needs
                    .get(&statement)
                    .is_some_and(|hypothesis| seen.contains(hypothesis));
            if !holds {
                failures.push(WedgeDiagnostic::new(
                    DiagnosticSeverity::Error,
                    Some("assertion-might-not-hold".to_string()),
                    "assertion might not hold".to_string(),
                    line,
                    2,
                    "rules".to_string(),
                ));
            }
            seen.insert(statement);
        }
        failures
    }
}

impl Verifier for RuleVerifier {
    fn request_verification<'a>(
        &'a mut self,
        buffer: &'a BufferId,
        text: &'a str,
    ) -> VerifierFut<'a, Result<DocumentVersion, VerifierError>> {
        Box::pin(async move {
            self.version += 1;
            self.requests += 1;
            let version = DocumentVersion::new(self.version);
            let diagnostics = self.check(text);
            self.pending.push_back(Notification {
                buffer: buffer.clone(),
                version: Some(version),
                diagnostics,
            });
            Ok(version)
        })
    }

    fn next_notification(&mut self) -> VerifierFut<'_, Option<Notification>> {
        Box::pin(async move { self.pending.pop_front() })
    }
}

pub type TestOrchestrator = Orchestrator<LlmOracle, FileDocuments, RuleVerifier>;

pub fn orchestrator(server: &MockServer, verifier: RuleVerifier) -> TestOrchestrator {
    let syntax = ObligationSyntax::default();
    let oracle = LlmOracle::new(openai_config(server), syntax.clone(), 64 * 1024).unwrap();
    Orchestrator::new(
        OrchestratorConfig::default(),
        oracle,
        FileDocuments::new(syntax),
        verifier,
    )
}

pub fn feedback(buffer: &BufferId) -> FeedbackAdapter {
    FeedbackAdapter::new(buffer.clone(), Box::new(SeverityClassifier::default()))
}

pub fn quick_options() -> DriverOptions {
    DriverOptions {
        verification_timeout: Duration::from_secs(5),
        settle: Duration::ZERO,
    }
}
