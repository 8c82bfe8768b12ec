//! Internal LSP message serde types for JSON-RPC communication.

use std::path::{Path, PathBuf};
use std::process;

use serde::{Deserialize, Serialize};
use wedge_types::DocumentVersion;

use crate::types::{DiagnosticSeverity, WedgeDiagnostic};

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub(crate) struct PathToUriError {
    path: PathBuf,
}

/// A frame we send: a request when `id` is set, a notification otherwise.
#[derive(Debug, Serialize)]
pub(crate) struct Outgoing {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

impl Outgoing {
    pub fn request(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    pub fn notification(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        }
    }
}

/// `initialize` params. We ask for versioned diagnostics so late results can
/// be matched to the edit that produced them.
pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false,
                    "versionSupport": true
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

/// Reply to a request the server sent us.
///
/// Verifiers report progress and pull configuration through server-to-client
/// requests and may stall until they are answered. Progress and capability
/// registration are acknowledged, configuration is answered with one `null`
/// per requested item, and anything else is refused.
pub(crate) fn reply_to_server_request(
    id: &serde_json::Value,
    method: &str,
    params: Option<&serde_json::Value>,
) -> serde_json::Value {
    let result = match method {
        "window/workDoneProgress/create"
        | "client/registerCapability"
        | "client/unregisterCapability"
        | "window/showMessageRequest" => serde_json::Value::Null,
        "workspace/configuration" => {
            let items = params
                .and_then(|p| p.get("items"))
                .and_then(serde_json::Value::as_array)
                .map_or(0, Vec::len);
            serde_json::Value::Array(vec![serde_json::Value::Null; items])
        }
        _ => {
            return serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": METHOD_NOT_FOUND,
                    "message": format!("Method not found: {method}")
                }
            });
        }
    };
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub version: Option<i32>,
    pub diagnostics: Vec<LspDiagnostic>,
}

impl PublishDiagnosticsParams {
    pub fn document_version(&self) -> Option<DocumentVersion> {
        self.version.map(DocumentVersion::new)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: LspRange,
    pub severity: Option<u64>,
    /// `integer | string` per the LSP spec.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl LspDiagnostic {
    pub fn to_wedge_diagnostic(&self) -> WedgeDiagnostic {
        let code = match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        WedgeDiagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            code,
            self.message.clone(),
            self.range.start.line,
            self.range.start.character,
            self.source
                .clone()
                .unwrap_or_else(|| String::from("unknown")),
        )
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
