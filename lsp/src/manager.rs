//! The verifier pool the engine talks to.
//!
//! `start()` spawns every configured server; files are routed to a server by
//! extension. A server that stops is dropped from the pool, and once the pool
//! is empty [`LspManager::next_diagnostics`] reports the end of the stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use wedge_types::DocumentVersion;

use crate::diagnostics::DiagnosticsStore;
use crate::protocol;
use crate::server::RunningServer;
use crate::types::{LspConfig, LspEvent, ServerStopReason, WedgeDiagnostic};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error("no running language server handles {}", path.display())]
    NoServer { path: PathBuf },
    #[error("{0}")]
    InvalidPath(String),
    #[error("language server '{server}' failed: {detail}")]
    Server { server: String, detail: String },
}

/// A full diagnostics set published for one document.
#[derive(Debug, Clone)]
pub struct PublishedDiagnostics {
    pub path: PathBuf,
    pub version: Option<DocumentVersion>,
    pub items: Vec<WedgeDiagnostic>,
}

pub struct LspManager {
    running: HashMap<String, RunningServer>,
    routes: HashMap<String, String>,
    store: DiagnosticsStore,
    events: mpsc::Receiver<LspEvent>,
    #[cfg(test)]
    events_tx: mpsc::Sender<LspEvent>,
}

impl LspManager {
    /// Spawn every configured server. Servers that fail to start are logged
    /// and left out of the pool.
    pub async fn start(config: LspConfig, workspace_root: &Path) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_CAPACITY);
        let mut running = HashMap::new();

        for (name, server) in config.servers() {
            tracing::info!(server = %name, command = server.command(), "Starting verifier");
            match RunningServer::start(name.clone(), server, workspace_root, events_tx.clone())
                .await
            {
                Ok(handle) => {
                    running.insert(name.clone(), handle);
                }
                Err(e) => tracing::warn!(server = %name, "Verifier failed to start: {e:#}"),
            }
        }

        Self {
            running,
            routes: config.extension_routes(),
            store: DiagnosticsStore::default(),
            events,
            #[cfg(test)]
            events_tx,
        }
    }

    fn route(&self, path: &Path) -> Option<&String> {
        let ext = path.extension()?.to_str()?;
        self.routes
            .get(ext)
            .filter(|name| self.running.contains_key(*name))
    }

    /// Whether a running server handles files like `path`.
    #[must_use]
    pub fn handles(&self, path: &Path) -> bool {
        self.route(path).is_some()
    }

    /// Push the current text of `path` to its server, which re-verifies it.
    ///
    /// Returns the document version the server will tag its results with.
    pub async fn sync_document(
        &mut self,
        path: &Path,
        text: &str,
    ) -> Result<DocumentVersion, LspError> {
        let uri = protocol::path_to_file_uri(path)
            .map_err(|e| LspError::InvalidPath(e.to_string()))?;
        let name = self
            .route(path)
            .cloned()
            .ok_or_else(|| LspError::NoServer {
                path: path.to_path_buf(),
            })?;
        let Some(server) = self.running.get_mut(&name) else {
            return Err(LspError::NoServer {
                path: path.to_path_buf(),
            });
        };
        server
            .sync_document(uri.as_str(), text)
            .await
            .map_err(|e| LspError::Server {
                server: name,
                detail: format!("{e:#}"),
            })
    }

    /// Wait for the next diagnostics publication from any server.
    ///
    /// Returns `None` once no server is left running.
    pub async fn next_diagnostics(&mut self) -> Option<PublishedDiagnostics> {
        while !self.running.is_empty() {
            match self.events.recv().await? {
                LspEvent::ServerStopped { server, reason } => {
                    match reason {
                        ServerStopReason::Exited => tracing::info!(server = %server, "Verifier exited"),
                        ServerStopReason::Failed(e) => {
                            tracing::warn!(server = %server, error = %e, "Verifier failed");
                        }
                    }
                    self.running.remove(&server);
                }
                LspEvent::Diagnostics {
                    path,
                    version,
                    items,
                } => {
                    tracing::debug!(
                        path = %path.display(),
                        ?version,
                        count = items.len(),
                        "Diagnostics published"
                    );
                    self.store.replace(path.clone(), items.clone());
                    return Some(PublishedDiagnostics {
                        path,
                        version,
                        items,
                    });
                }
            }
        }
        None
    }

    /// Errors from the latest publication for `path`.
    pub fn errors_in(&self, path: &Path) -> impl Iterator<Item = &WedgeDiagnostic> {
        self.store.errors_in(path)
    }

    /// Latest diagnostics for one file, any severity.
    #[must_use]
    pub fn diagnostics_for(&self, path: &Path) -> &[WedgeDiagnostic] {
        self.store.for_path(path)
    }

    /// Ask every server to exit.
    pub async fn shutdown(&mut self) {
        for (name, server) in self.running.drain() {
            tracing::info!(server = %name, "Stopping verifier");
            server.shutdown().await;
        }
    }
}
