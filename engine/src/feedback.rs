//! Verification feedback: which lines of one buffer currently hold.

use std::collections::HashSet;

use serde::Deserialize;
use wedge_lsp::{DiagnosticSeverity, WedgeDiagnostic};
use wedge_types::{BufferId, DocumentVersion};

use crate::document::Notification;

/// Decides whether a diagnostic means "this obligation is not proved".
pub trait ObligationClassifier: Send + Sync {
    fn is_unresolved(&self, diagnostic: &WedgeDiagnostic) -> bool;
}

/// Classifies by structured fields only: severity, then optionally `code`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SeverityClassifier {
    pub min_severity: DiagnosticSeverity,
    /// When non-empty, only diagnostics carrying one of these codes count.
    pub codes: Vec<String>,
}

impl Default for SeverityClassifier {
    fn default() -> Self {
        Self {
            min_severity: DiagnosticSeverity::Error,
            codes: Vec::new(),
        }
    }
}

impl ObligationClassifier for SeverityClassifier {
    fn is_unresolved(&self, diagnostic: &WedgeDiagnostic) -> bool {
        if !diagnostic.severity().at_least(self.min_severity) {
            return false;
        }
        self.codes.is_empty()
            || diagnostic
                .code()
                .is_some_and(|code| self.codes.iter().any(|c| c == code))
    }
}

/// Latest diagnostics for a single buffer.
pub struct FeedbackAdapter {
    buffer: BufferId,
    classifier: Box<dyn ObligationClassifier>,
    unresolved: HashSet<u32>,
    version: Option<DocumentVersion>,
}

impl FeedbackAdapter {
    pub fn new(buffer: BufferId, classifier: Box<dyn ObligationClassifier>) -> Self {
        Self {
            buffer,
            classifier,
            unresolved: HashSet::new(),
            version: None,
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &BufferId {
        &self.buffer
    }

    /// Version of the last accepted notification, if it carried one.
    #[must_use]
    pub fn version(&self) -> Option<DocumentVersion> {
        self.version
    }

    /// Replace the diagnostics if `notification` is for this buffer.
    ///
    /// Returns whether it was accepted.
    pub fn accept(&mut self, notification: &Notification) -> bool {
        if notification.buffer != self.buffer {
            tracing::trace!(
                buffer = %self.buffer,
                other = %notification.buffer,
                "Ignoring diagnostics for another buffer"
            );
            return false;
        }
        self.unresolved = notification
            .diagnostics
            .iter()
            .filter(|d| self.classifier.is_unresolved(d))
            .map(WedgeDiagnostic::line)
            .collect();
        self.version = notification.version;
        tracing::debug!(
            buffer = %self.buffer,
            version = ?self.version,
            unresolved = self.unresolved.len(),
            "Accepted diagnostics"
        );
        true
    }

    /// True iff no unresolved-obligation diagnostic is reported at `line`.
    #[must_use]
    pub fn holds(&self, line: u32) -> bool {
        !self.unresolved.contains(&line)
    }
}
