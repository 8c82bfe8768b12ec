//! Types shared with the engine: server configuration, verifier
//! diagnostics, and the events server tasks hand to the manager.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use wedge_types::DocumentVersion;

/// Language servers to run, keyed by name (e.g. "dafny").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LspConfig {
    #[serde(default)]
    servers: HashMap<String, ServerConfig>,
}

impl LspConfig {
    #[must_use]
    pub fn with_server(mut self, name: impl Into<String>, server: ServerConfig) -> Self {
        self.servers.insert(name.into(), server);
        self
    }

    #[must_use]
    pub fn servers(&self) -> &HashMap<String, ServerConfig> {
        &self.servers
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// File extension to server name.
    ///
    /// When two servers claim an extension the alphabetically first name
    /// keeps it, so routing does not depend on map order.
    pub(crate) fn extension_routes(&self) -> HashMap<String, String> {
        let mut names: Vec<&String> = self.servers.keys().collect();
        names.sort();

        let mut routes: HashMap<String, String> = HashMap::new();
        for name in names {
            for ext in &self.servers[name].file_extensions {
                match routes.get(ext) {
                    Some(owner) => tracing::warn!(
                        extension = %ext,
                        "'{name}' also claims .{ext}; keeping '{owner}'"
                    ),
                    None => {
                        routes.insert(ext.clone(), name.clone());
                    }
                }
            }
        }
        routes
    }
}

/// How to launch one verifier and which files it owns.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    /// LSP `languageId` sent on `didOpen`.
    language_id: String,
    /// Extensions without the dot, e.g. `["dfy"]`.
    #[serde(default)]
    file_extensions: Vec<String>,
}

impl ServerConfig {
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        language_id: impl Into<String>,
        file_extensions: Vec<String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            language_id: language_id.into(),
            file_extensions,
        }
    }

    /// `dafny server` for `.dfy` files.
    #[must_use]
    pub fn dafny() -> Self {
        Self::new(
            "dafny",
            vec!["server".to_string()],
            "dafny",
            vec!["dfy".to_string()],
        )
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn file_extensions(&self) -> &[String] {
        &self.file_extensions
    }
}

/// Diagnostic severity, ordered most severe first so that "at least as
/// severe as" is `<=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    #[serde(alias = "info")]
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Map the LSP wire value; anything outside 1..=4 is `None`.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        Some(match value {
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Information,
            4 => Self::Hint,
            _ => return None,
        })
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    /// Whether this severity is `threshold` or worse.
    #[must_use]
    pub fn at_least(self, threshold: Self) -> bool {
        self <= threshold
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        })
    }
}

/// One diagnostic reported by a verifier. Positions are 0-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WedgeDiagnostic {
    severity: DiagnosticSeverity,
    /// Server-supplied classification such as `assert-might-not-hold`.
    code: Option<String>,
    message: String,
    line: u32,
    col: u32,
    source: String,
}

impl WedgeDiagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        code: Option<String>,
        message: String,
        line: u32,
        col: u32,
        source: String,
    ) -> Self {
        Self {
            severity,
            code,
            message,
            line,
            col,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `path:line:col: severity: [source] message`, 1-indexed like a compiler.
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.line + 1,
            self.col + 1,
            self.severity,
            self.source,
            self.message,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStopReason {
    Exited,
    Failed(String),
}

/// What a server task reports back to the manager.
#[derive(Debug)]
pub enum LspEvent {
    ServerStopped {
        server: String,
        reason: ServerStopReason,
    },
    /// A full replacement set of diagnostics for one file.
    Diagnostics {
        path: PathBuf,
        /// The document version the set was computed for, when reported.
        version: Option<DocumentVersion>,
        items: Vec<WedgeDiagnostic>,
    },
}
