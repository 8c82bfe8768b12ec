//! Terminal outcomes of a decomposition session.

use std::fmt;

use crate::{BufferId, Obligation, Statement};

/// Why a session gave up before proving its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// The oracle could not be reached or returned an error.
    OracleUnavailable(String),
    /// The oracle answered with something other than one bare statement.
    OracleMalformed(String),
    /// The oracle answered with nothing.
    OracleDeclined,
    /// The oracle repeated the target or a candidate already disabled for it.
    DuplicateCandidate(Statement),
    /// Feedback arrived with no pending candidate and the target still fails.
    TargetUnresolved,
    /// Editing or persisting the buffer failed.
    DocumentIo(String),
    /// The verifier could not be asked to re-check the buffer.
    VerifierUnavailable(String),
    /// No verifier feedback arrived in time.
    VerifierTimeout,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OracleUnavailable(detail) => {
                write!(f, "the suggestion service failed: {detail}")
            }
            Self::OracleMalformed(detail) => {
                write!(f, "could not understand the suggestion: {detail}")
            }
            Self::OracleDeclined => f.write_str("the suggestion service had no candidate"),
            Self::DuplicateCandidate(statement) => {
                write!(f, "the suggestion service repeated `{statement}`")
            }
            Self::TargetUnresolved => f.write_str("the target still does not verify"),
            Self::DocumentIo(detail) => write!(f, "could not edit the buffer: {detail}"),
            Self::VerifierUnavailable(detail) => {
                write!(f, "could not reach the verifier: {detail}")
            }
            Self::VerifierTimeout => f.write_str("the verifier did not answer in time"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The candidate chain and the original obligation all verify.
    Succeeded,
    /// The depth budget ran out.
    Exhausted { attempts: u32 },
    Abandoned { reason: AbandonReason },
}

impl Outcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Exhausted { .. } => "exhausted",
            Self::Abandoned { .. } => "abandoned",
        }
    }
}

/// Final account of a destroyed session, surfaced to the user exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub buffer: BufferId,
    pub outcome: Outcome,
    /// Number of `advance` calls the session made.
    pub advances: u32,
    /// Targets promoted past, oldest first.
    pub history: Vec<Obligation>,
    /// The target at the time the session ended.
    pub final_target: Obligation,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Succeeded => write!(
                f,
                "{}: proved after {} suggestion(s); {} now verifies",
                self.buffer,
                self.advances,
                self.history.first().unwrap_or(&self.final_target),
            ),
            Outcome::Exhausted { attempts } => write!(
                f,
                "{}: gave up after {attempts} attempts; still unproved: {}",
                self.buffer, self.final_target,
            ),
            Outcome::Abandoned { reason } => write!(
                f,
                "{}: stopped after {} suggestion(s): {reason}",
                self.buffer, self.advances,
            ),
        }
    }
}
