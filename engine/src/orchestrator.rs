//! Decomposition orchestrator: the session registry and its state machine.
//!
//! A session walks `Generating -> Verifying` and then either promotes its
//! candidate, retries with a new one, or terminates. The only suspension
//! point is between [`Orchestrator::advance`] returning [`Step::Awaiting`]
//! and the matching [`Orchestrator::on_feedback`] call.
//!
//! Every issued candidate gets a fresh [`Generation`] from a counter shared by
//! all sessions, so feedback for a superseded or cancelled attempt can never
//! be mistaken for feedback on the current one.

use std::collections::HashMap;
use std::mem;

use wedge_types::{
    AbandonReason, BufferId, DocumentVersion, Generation, MAX_DEPTH, Obligation,
    ObligationSyntax, Outcome, Report, Statement, CONTEXT_RADIUS,
};

use crate::context::context_window;
use crate::document::{Documents, DocumentError, Verifier};
use crate::extract::{ExtractError, extract_obligation};
use crate::feedback::FeedbackAdapter;
use crate::oracle::{OracleClient, SuggestionOracle, SuggestionRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_depth: u32,
    pub context_radius: u32,
    pub syntax: ObligationSyntax,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            context_radius: CONTEXT_RADIUS,
            syntax: ObligationSyntax::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    NotAnObligation(#[from] ExtractError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// A verification request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub generation: Generation,
    pub version: DocumentVersion,
}

#[derive(Debug, Clone)]
pub struct Session {
    target: Obligation,
    attempt: Option<Obligation>,
    depth: u32,
    history: Vec<Obligation>,
    generation: Generation,
    awaiting: Option<Dispatch>,
    ledger: Vec<Dispatch>,
    rejected: Vec<Statement>,
    advances: u32,
}

impl Session {
    fn new(target: Obligation, generation: Generation) -> Self {
        Self {
            target,
            attempt: None,
            depth: 0,
            history: Vec::new(),
            generation,
            awaiting: None,
            ledger: Vec::new(),
            rejected: Vec::new(),
            advances: 0,
        }
    }

    #[must_use]
    pub fn target(&self) -> &Obligation {
        &self.target
    }

    #[must_use]
    pub fn attempt(&self) -> Option<&Obligation> {
        self.attempt.as_ref()
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn history(&self) -> &[Obligation] {
        &self.history
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn awaiting(&self) -> Option<Dispatch> {
        self.awaiting
    }

    #[must_use]
    pub fn rejected(&self) -> &[Statement] {
        &self.rejected
    }

    #[must_use]
    pub fn advances(&self) -> u32 {
        self.advances
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A candidate was inserted and verification requested; wait for feedback.
    Awaiting {
        generation: Generation,
        version: DocumentVersion,
    },
    /// Nothing changed (no session, nothing pending, or stale feedback).
    Ignored,
    /// The session ended and was destroyed.
    Finished(Report),
}

pub struct Orchestrator<O, D, V> {
    config: OrchestratorConfig,
    oracle: OracleClient<O>,
    documents: D,
    verifier: V,
    sessions: HashMap<BufferId, Session>,
    last_generation: Generation,
}

impl<O, D, V> Orchestrator<O, D, V>
where
    O: SuggestionOracle,
    D: Documents,
    V: Verifier,
{
    pub fn new(config: OrchestratorConfig, oracle: O, documents: D, verifier: V) -> Self {
        let oracle = OracleClient::new(oracle, config.syntax.clone());
        Self {
            config,
            oracle,
            documents,
            verifier,
            sessions: HashMap::new(),
            last_generation: Generation::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self, buffer: &BufferId) -> Option<&Session> {
        self.sessions.get(buffer)
    }

    pub fn documents_mut(&mut self) -> &mut D {
        &mut self.documents
    }

    pub fn verifier_mut(&mut self) -> &mut V {
        &mut self.verifier
    }

    fn next_generation(&mut self) -> Generation {
        self.last_generation = self.last_generation.next();
        self.last_generation
    }

    /// Begin decomposing the obligation on `line` of `buffer`.
    ///
    /// Any live session for the buffer is cancelled first. Nothing is created
    /// or edited when the line is not an obligation.
    pub async fn start(&mut self, buffer: BufferId, line: u32) -> Result<Step, StartError> {
        let text = self.documents.text(&buffer)?;
        let target = extract_obligation(&text, line, &self.config.syntax)?;

        if self.cancel(&buffer).is_some() {
            tracing::info!(buffer = %buffer, "Replaced live decomposition session");
        }

        let generation = self.next_generation();
        tracing::info!(
            buffer = %buffer,
            line = target.line(),
            generation = %generation,
            target = %target.statement(),
            "Starting decomposition"
        );
        self.sessions
            .insert(buffer.clone(), Session::new(target, generation));
        Ok(self.advance(&buffer).await)
    }

    /// Request, insert and dispatch the next candidate for `buffer`.
    pub async fn advance(&mut self, buffer: &BufferId) -> Step {
        let Some(session) = self.sessions.get(buffer) else {
            tracing::debug!(buffer = %buffer, "Advance without a session");
            return Step::Ignored;
        };
        if session.awaiting.is_some() {
            tracing::debug!(buffer = %buffer, "Advance while feedback is pending");
            return Step::Ignored;
        }
        let Some(session) = self.sessions.remove(buffer) else {
            return Step::Ignored;
        };
        self.advance_session(buffer, session).await
    }

    async fn advance_session(&mut self, buffer: &BufferId, mut session: Session) -> Step {
        session.advances += 1;
        if session.depth >= self.config.max_depth {
            let attempts = session.depth;
            return finish(buffer, session, Outcome::Exhausted { attempts });
        }
        session.depth += 1;

        let text = match self.documents.text(buffer) {
            Ok(text) => text,
            Err(e) => return abandon_io(buffer, session, &e),
        };
        let context = context_window(&text, session.target.line(), self.config.context_radius);
        let request = SuggestionRequest {
            buffer,
            context: &context,
            target: &session.target,
            buffer_text: &text,
            rejected: &session.rejected,
        };
        let candidate = match self.oracle.suggest(&request).await {
            Ok(candidate) => candidate,
            Err(rejection) => return finish_abandoned(buffer, session, rejection.into()),
        };

        if candidate.same_as(session.target.statement())
            || session.rejected.iter().any(|r| r.same_as(&candidate))
        {
            tracing::info!(buffer = %buffer, candidate = %candidate, "Oracle repeated a candidate");
            return finish_abandoned(
                buffer,
                session,
                AbandonReason::DuplicateCandidate(candidate),
            );
        }

        if let Err(e) = self
            .documents
            .insert(buffer, session.target.line(), &candidate)
        {
            return abandon_io(buffer, session, &e);
        }
        session.target = session.target.shifted_down();
        session.attempt = Some(Obligation::new(session.target.line() - 1, candidate));
        session.generation = self.next_generation();

        let text = match self.documents.text(buffer) {
            Ok(text) => text,
            Err(e) => return abandon_io(buffer, session, &e),
        };
        let version = match self.verifier.request_verification(buffer, &text).await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(buffer = %buffer, error = %e, "Verification request failed");
                return finish_abandoned(
                    buffer,
                    session,
                    AbandonReason::VerifierUnavailable(e.to_string()),
                );
            }
        };

        let dispatch = Dispatch {
            generation: session.generation,
            version,
        };
        session.awaiting = Some(dispatch);
        session.ledger.push(dispatch);
        tracing::info!(
            buffer = %buffer,
            generation = %dispatch.generation,
            version = %version,
            depth = session.depth,
            line = session.target.line(),
            candidate = %session.attempt.as_ref().map_or("", |a| a.statement().as_str()),
            "Candidate inserted; awaiting verification"
        );
        self.sessions.insert(buffer.clone(), session);
        Step::Awaiting {
            generation: dispatch.generation,
            version,
        }
    }

    /// Map a diagnostics notification's document version to the generation
    /// whose dispatch produced it.
    ///
    /// Unversioned notifications resolve to the pending generation. Versions
    /// this session never dispatched resolve to `None`.
    #[must_use]
    pub fn generation_for(
        &self,
        buffer: &BufferId,
        version: Option<DocumentVersion>,
    ) -> Option<Generation> {
        let session = self.sessions.get(buffer)?;
        let awaiting = session.awaiting?;
        match version {
            None => Some(awaiting.generation),
            Some(version) => session
                .ledger
                .iter()
                .rev()
                .find(|d| d.version == version)
                .map(|d| d.generation),
        }
    }

    /// Classify verifier feedback for the attempt dispatched at `generation`.
    pub async fn on_feedback(
        &mut self,
        buffer: &BufferId,
        generation: Generation,
        feedback: &FeedbackAdapter,
    ) -> Step {
        let Some(session) = self.sessions.get(buffer) else {
            tracing::debug!(buffer = %buffer, generation = %generation, "Feedback without a session");
            return Step::Ignored;
        };
        if feedback.buffer() != buffer {
            tracing::debug!(buffer = %buffer, other = %feedback.buffer(), "Feedback for another buffer");
            return Step::Ignored;
        }
        if session.awaiting.is_none() {
            tracing::debug!(buffer = %buffer, generation = %generation, "Feedback with nothing pending");
            return Step::Ignored;
        }
        if generation != session.generation {
            tracing::debug!(
                buffer = %buffer,
                generation = %generation,
                current = %session.generation,
                "Discarding stale feedback"
            );
            return Step::Ignored;
        }
        let Some(mut session) = self.sessions.remove(buffer) else {
            return Step::Ignored;
        };
        session.awaiting = None;

        let target_ok = feedback.holds(session.target.line());
        let Some(attempt) = session.attempt.take() else {
            let outcome = if target_ok {
                Outcome::Succeeded
            } else {
                Outcome::Abandoned {
                    reason: AbandonReason::TargetUnresolved,
                }
            };
            return finish(buffer, session, outcome);
        };
        let attempt_ok = feedback.holds(attempt.line());

        match (target_ok, attempt_ok) {
            (true, true) => finish(buffer, session, Outcome::Succeeded),
            (true, false) => {
                tracing::info!(
                    buffer = %buffer,
                    generation = %generation,
                    new_target = %attempt,
                    "Promoting candidate to target"
                );
                let previous = mem::replace(&mut session.target, attempt);
                session.history.push(previous);
                session.rejected.clear();
                self.advance_session(buffer, session).await
            }
            (false, _) => {
                tracing::info!(
                    buffer = %buffer,
                    generation = %generation,
                    candidate = %attempt,
                    "Candidate did not help; disabling and retrying"
                );
                if let Err(e) = self.documents.disable(buffer, attempt.line()) {
                    return abandon_io(buffer, session, &e);
                }
                session.rejected.push(attempt.statement().clone());
                self.advance_session(buffer, session).await
            }
        }
    }

    /// Drop the session for `buffer`; any feedback still in flight for it
    /// becomes stale.
    pub fn cancel(&mut self, buffer: &BufferId) -> Option<Session> {
        let session = self.sessions.remove(buffer)?;
        tracing::debug!(buffer = %buffer, generation = %session.generation, "Cancelled session");
        Some(session)
    }

    /// Terminate the session for `buffer` as abandoned, e.g. when the
    /// verifier never answers.
    pub fn abandon(&mut self, buffer: &BufferId, reason: AbandonReason) -> Option<Report> {
        let session = self.sessions.remove(buffer)?;
        Some(report(buffer, session, Outcome::Abandoned { reason }))
    }
}

fn abandon_io(buffer: &BufferId, session: Session, error: &DocumentError) -> Step {
    tracing::warn!(buffer = %buffer, error = %error, "Buffer edit failed");
    finish_abandoned(buffer, session, AbandonReason::DocumentIo(error.to_string()))
}

fn finish_abandoned(buffer: &BufferId, session: Session, reason: AbandonReason) -> Step {
    finish(buffer, session, Outcome::Abandoned { reason })
}

fn finish(buffer: &BufferId, session: Session, outcome: Outcome) -> Step {
    Step::Finished(report(buffer, session, outcome))
}

fn report(buffer: &BufferId, session: Session, outcome: Outcome) -> Report {
    tracing::info!(
        buffer = %buffer,
        outcome = outcome.label(),
        advances = session.advances,
        depth = session.depth,
        "Decomposition finished"
    );
    Report {
        buffer: buffer.clone(),
        outcome,
        advances: session.advances,
        history: session.history,
        final_target: session.target,
    }
}
