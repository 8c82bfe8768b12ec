//! LSP client that drives verifiers and collects their diagnostics.

pub mod codec;
pub mod types;

pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod server;

mod manager;

pub use manager::{LspError, LspManager, PublishedDiagnostics};
pub use types::{
    DiagnosticSeverity, LspConfig, LspEvent, ServerConfig, ServerStopReason, WedgeDiagnostic,
};
