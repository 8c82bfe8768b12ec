//! End-to-end decomposition over a real file, an HTTP oracle and a rule-based verifier.

use std::fs;
use std::sync::atomic::Ordering;

use wiremock::MockServer;

use wedge_engine::wedge_types::{AbandonReason, BufferId, Outcome};
use wedge_engine::{DriverError, StartError, run_decomposition};

use crate::common::{
    PROOF, RuleVerifier, TARGET_LINE, feedback, mount_openai_answers, orchestrator, quick_options,
    write_buffer,
};

const TARGET: &str = "x > 0 && g > x";

fn file_lines(buffer: &BufferId) -> Vec<String> {
    fs::read_to_string(buffer.as_path())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn first_candidate_proves_target() {
    let server = MockServer::start().await;
    let calls = mount_openai_answers(&server, &["g > x"]).await;
    let dir = tempfile::tempdir().unwrap();
    let buffer = write_buffer(dir.path(), "proof.dfy", PROOF);

    let verifier = RuleVerifier::new().needs(TARGET, "g > x").provable("g > x");
    let mut orch = orchestrator(&server, verifier);
    let mut adapter = feedback(&buffer);

    let report = run_decomposition(
        &mut orch,
        &mut adapter,
        buffer.clone(),
        TARGET_LINE,
        &quick_options(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.advances, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orch.verifier_mut().requests, 1);

    let lines = file_lines(&buffer);
    assert_eq!(lines[10], "  assert g > x;");
    assert_eq!(lines[11], "  assert x > 0 && g > x;");
    assert!(fs::read_to_string(buffer.as_path()).unwrap().ends_with("}\n"));
}

#[tokio::test]
async fn retry_then_promote_then_prove() {
    let server = MockServer::start().await;
    mount_openai_answers(&server, &["x >= 1", "```\ng > x\n```", "g == x + 7"]).await;
    let dir = tempfile::tempdir().unwrap();
    let buffer = write_buffer(dir.path(), "proof.dfy", PROOF);

    let verifier = RuleVerifier::new()
        .needs(TARGET, "g > x")
        .needs("g > x", "g == x + 7")
        .provable("g == x + 7");
    let mut orch = orchestrator(&server, verifier);
    let mut adapter = feedback(&buffer);

    let report = run_decomposition(
        &mut orch,
        &mut adapter,
        buffer.clone(),
        TARGET_LINE,
        &quick_options(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.advances, 3);
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.history[0].statement().as_str(), TARGET);
    assert_eq!(report.final_target.statement().as_str(), "g > x");
    assert!(report.to_string().contains("proved after 3"));

    let lines = file_lines(&buffer);
    assert_eq!(
        &lines[10..14],
        [
            "  // assert x >= 1;",
            "  assert g == x + 7;",
            "  assert g > x;",
            "  assert x > 0 && g > x;",
        ]
    );
    assert!(orch.session(&buffer).is_none());
}

#[tokio::test]
async fn unhelpful_oracle_exhausts_depth() {
    let server = MockServer::start().await;
    let calls =
        mount_openai_answers(&server, &["a > 0", "b > 0", "c > 0", "d > 0", "e > 0", "f > 0"])
            .await;
    let dir = tempfile::tempdir().unwrap();
    let buffer = write_buffer(dir.path(), "proof.dfy", PROOF);

    let mut orch = orchestrator(&server, RuleVerifier::new());
    let mut adapter = feedback(&buffer);

    let report = run_decomposition(
        &mut orch,
        &mut adapter,
        buffer.clone(),
        TARGET_LINE,
        &quick_options(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, Outcome::Exhausted { attempts: 5 });
    assert_eq!(report.advances, 6);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert!(report.to_string().contains("gave up after 5 attempts"));

    let lines = file_lines(&buffer);
    assert_eq!(lines.len(), PROOF.lines().count() + 5);
    let disabled: Vec<&str> = lines
        .iter()
        .filter(|l| l.trim_start().starts_with("// assert"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        disabled,
        [
            "  // assert a > 0;",
            "  // assert b > 0;",
            "  // assert c > 0;",
            "  // assert d > 0;",
            "  // assert e > 0;",
        ]
    );
    assert_eq!(lines[15], "  assert x > 0 && g > x;");
}

#[tokio::test]
async fn malformed_answer_leaves_file_untouched() {
    let server = MockServer::start().await;
    mount_openai_answers(&server, &["assert g > x;"]).await;
    let dir = tempfile::tempdir().unwrap();
    let buffer = write_buffer(dir.path(), "proof.dfy", PROOF);

    let mut orch = orchestrator(&server, RuleVerifier::new());
    let mut adapter = feedback(&buffer);

    let report = run_decomposition(
        &mut orch,
        &mut adapter,
        buffer.clone(),
        TARGET_LINE,
        &quick_options(),
    )
    .await
    .unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::Abandoned {
            reason: AbandonReason::OracleMalformed(_)
        }
    ));
    assert!(report.to_string().contains("could not understand the suggestion"));
    assert_eq!(fs::read_to_string(buffer.as_path()).unwrap(), PROOF);
    assert_eq!(orch.verifier_mut().requests, 0);
}

#[tokio::test]
async fn empty_answer_is_a_decline() {
    let server = MockServer::start().await;
    mount_openai_answers(&server, &["   "]).await;
    let dir = tempfile::tempdir().unwrap();
    let buffer = write_buffer(dir.path(), "proof.dfy", PROOF);

    let mut orch = orchestrator(&server, RuleVerifier::new());
    let report = run_decomposition(
        &mut orch,
        &mut feedback(&buffer),
        buffer.clone(),
        TARGET_LINE,
        &quick_options(),
    )
    .await
    .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Abandoned {
            reason: AbandonReason::OracleDeclined
        }
    );
    assert_eq!(fs::read_to_string(buffer.as_path()).unwrap(), PROOF);
}

#[tokio::test]
async fn non_obligation_line_never_reaches_the_oracle() {
    let server = MockServer::start().await;
    let calls = mount_openai_answers(&server, &["g > x"]).await;
    let dir = tempfile::tempdir().unwrap();
    let buffer = write_buffer(dir.path(), "proof.dfy", PROOF);

    let mut orch = orchestrator(&server, RuleVerifier::new());
    let err = run_decomposition(
        &mut orch,
        &mut feedback(&buffer),
        buffer.clone(),
        4,
        &quick_options(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        DriverError::Start(StartError::NotAnObligation(_))
    ));
    assert!(err.to_string().contains("line 5 is not an obligation"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(orch.session(&buffer).is_none());
    assert_eq!(fs::read_to_string(buffer.as_path()).unwrap(), PROOF);
}

#[tokio::test]
async fn missing_file_fails_to_start() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let buffer = BufferId::new(dir.path().join("absent.dfy"));

    let mut orch = orchestrator(&server, RuleVerifier::new());
    let err = run_decomposition(
        &mut orch,
        &mut feedback(&buffer),
        buffer,
        0,
        &quick_options(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DriverError::Start(StartError::Document(_))));
}
