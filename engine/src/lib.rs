//! Decomposition engine for wedge.
//!
//! Given an obligation the verifier cannot discharge, the engine asks an
//! oracle for an intermediate fact, inserts it above the obligation, re-runs
//! the verifier and decides whether to promote, retry or stop. The pieces:
//!
//! - [`extract_obligation`] turns a cursor line into an [`Obligation`](wedge_types::Obligation)
//! - [`context_window`] builds the prompt excerpt around it
//! - [`OracleClient`] wraps a [`SuggestionOracle`] and validates its answer
//! - [`Documents`] edits buffers; [`Verifier`] re-checks them
//! - [`FeedbackAdapter`] turns diagnostics into "does line N hold"
//! - [`Orchestrator`] owns sessions and the state machine
//! - [`run_decomposition`] waits on the verifier between steps

mod config;
mod context;
mod document;
mod driver;
mod extract;
mod feedback;
mod oracle;
mod orchestrator;

pub use config::{
    ConfigError, DecomposeConfig, OracleConfig, WedgeConfig, config_path, expand_env_vars,
};
pub use context::{TARGET_CLOSE, TARGET_OPEN, context_window};
pub use document::{
    DocumentError, Documents, FileDocument, FileDocuments, LspVerifier, Notification, Verifier,
    VerifierError, VerifierFut,
};
pub use driver::{DriverError, DriverOptions, run_decomposition};
pub use extract::{ExtractError, NotObligationReason, extract_obligation};
pub use feedback::{FeedbackAdapter, ObligationClassifier, SeverityClassifier};
pub use oracle::{
    LlmOracle, OracleClient, OracleError, OracleFut, Rejection, SuggestionOracle,
    SuggestionRequest, build_user_prompt, normalize_response,
};
pub use orchestrator::{Dispatch, Orchestrator, OrchestratorConfig, Session, StartError, Step};

pub use wedge_lsp;
pub use wedge_providers;
pub use wedge_types;
