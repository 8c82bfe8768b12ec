//! Core domain types for wedge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod ids;
mod obligation;
mod outcome;

pub use ids::{BufferId, DocumentVersion, Generation};
pub use obligation::{Obligation, ObligationSyntax, Statement, StatementError};
pub use outcome::{AbandonReason, Outcome, Report};

/// Default number of candidate generations a session may issue.
pub const MAX_DEPTH: u32 = 5;

/// Default number of lines kept on each side of the target in oracle prompts.
pub const CONTEXT_RADIUS: u32 = 5;
