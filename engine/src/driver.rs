//! Runs one decomposition to completion against a live verifier.
//!
//! The orchestrator never waits on anything itself; this loop owns the one
//! suspension point, waiting for the verifier's next notification after each
//! dispatched candidate.

use std::time::Duration;

use tokio::time::{Instant, timeout, timeout_at};
use wedge_types::{AbandonReason, BufferId, DocumentVersion, Report};

use crate::document::{Documents, Notification, Verifier};
use crate::feedback::FeedbackAdapter;
use crate::oracle::SuggestionOracle;
use crate::orchestrator::{Orchestrator, Session, StartError, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// How long to wait for feedback on one candidate.
    pub verification_timeout: Duration,
    /// Quiet period after a relevant notification before acting on it.
    ///
    /// Verifiers may publish partial results for a version before the final
    /// set. Zero acts on the first notification.
    pub settle: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            verification_timeout: Duration::from_secs(120),
            settle: Duration::from_millis(750),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Start(#[from] StartError),
    #[error("decomposition session for {0} ended without a report")]
    SessionLost(BufferId),
}

/// Decompose the obligation on `line` of `buffer` and wait for the outcome.
pub async fn run_decomposition<O, D, V>(
    orchestrator: &mut Orchestrator<O, D, V>,
    feedback: &mut FeedbackAdapter,
    buffer: BufferId,
    line: u32,
    options: &DriverOptions,
) -> Result<Report, DriverError>
where
    O: SuggestionOracle,
    D: Documents,
    V: Verifier,
{
    let mut step = orchestrator.start(buffer.clone(), line).await?;
    let mut deadline = Instant::now() + options.verification_timeout;

    loop {
        match step {
            Step::Finished(report) => return Ok(report),
            Step::Awaiting { generation, .. } => {
                tracing::debug!(buffer = %buffer, generation = %generation, "Waiting for verifier");
                deadline = Instant::now() + options.verification_timeout;
            }
            Step::Ignored => {
                if orchestrator.session(&buffer).is_none() {
                    return Err(DriverError::SessionLost(buffer));
                }
            }
        }
        step = Step::Ignored;

        let waited = timeout_at(deadline, orchestrator.verifier_mut().next_notification()).await;
        let notification = match waited {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                let reason =
                    AbandonReason::VerifierUnavailable("all language servers stopped".to_string());
                return give_up(orchestrator, buffer, reason);
            }
            Err(_) => {
                tracing::warn!(buffer = %buffer, "Verifier did not answer before the deadline");
                return give_up(orchestrator, buffer, AbandonReason::VerifierTimeout);
            }
        };
        if outdated(orchestrator, &notification) {
            tracing::debug!(
                buffer = %buffer,
                version = ?notification.version,
                "Dropping diagnostics for a superseded version"
            );
            continue;
        }
        if !feedback.accept(&notification) {
            continue;
        }

        let mut version = feedback.version();
        if orchestrator.generation_for(&buffer, version).is_none() {
            tracing::debug!(buffer = %buffer, version = ?version, "Diagnostics for an undispatched version");
            continue;
        }
        if let Some(latest) = settle(orchestrator, feedback, options.settle).await {
            version = latest;
        }
        let Some(generation) = orchestrator.generation_for(&buffer, version) else {
            continue;
        };

        step = orchestrator.on_feedback(&buffer, generation, feedback).await;
    }
}

/// Keep absorbing notifications for the adapter's buffer until `window`
/// passes without one. Returns the version of the last one absorbed.
async fn settle<O, D, V>(
    orchestrator: &mut Orchestrator<O, D, V>,
    feedback: &mut FeedbackAdapter,
    window: Duration,
) -> Option<Option<DocumentVersion>>
where
    O: SuggestionOracle,
    D: Documents,
    V: Verifier,
{
    if window.is_zero() {
        return None;
    }
    let mut latest = None;
    while let Ok(Some(notification)) =
        timeout(window, orchestrator.verifier_mut().next_notification()).await
    {
        if outdated(orchestrator, &notification) {
            continue;
        }
        if feedback.accept(&notification) {
            latest = Some(notification.version);
        }
    }
    if let Some(version) = latest {
        tracing::trace!(buffer = %feedback.buffer(), version = ?version, "Settled on later diagnostics");
    }
    latest
}

/// A versioned publication older than the version the session awaits.
/// Accepting it would overwrite newer feedback in the adapter.
fn outdated<O, D, V>(orchestrator: &Orchestrator<O, D, V>, notification: &Notification) -> bool
where
    O: SuggestionOracle,
    D: Documents,
    V: Verifier,
{
    let Some(version) = notification.version else {
        return false;
    };
    orchestrator
        .session(&notification.buffer)
        .and_then(Session::awaiting)
        .is_some_and(|dispatch| version < dispatch.version)
}

fn give_up<O, D, V>(
    orchestrator: &mut Orchestrator<O, D, V>,
    buffer: BufferId,
    reason: AbandonReason,
) -> Result<Report, DriverError>
where
    O: SuggestionOracle,
    D: Documents,
    V: Verifier,
{
    orchestrator
        .abandon(&buffer, reason)
        .ok_or(DriverError::SessionLost(buffer))
}
