//! One verifier process and the LSP session spoken over its stdio.
//!
//! Three tasks run per server: a writer draining [`Outbound`] frames into
//! stdin, a reader feeding stdout frames through a [`Router`], and a stderr
//! pump that forwards the verifier's own log lines to tracing.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wedge_types::DocumentVersion;

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::{self, Outgoing, PublishDiagnosticsParams};
use crate::types::{LspEvent, ServerConfig, ServerStopReason};

/// Upper bound on a request round trip. Verifiers can take a while to load
/// their solver on `initialize`.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const EXIT_GRACE: Duration = Duration::from_secs(2);

const OUTBOUND_CAPACITY: usize = 64;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum Outbound {
    Frame(serde_json::Value),
    Close,
}

/// The three shapes a JSON-RPC frame from the server can take.
#[derive(Debug)]
enum Inbound {
    Reply {
        id: u64,
        body: serde_json::Value,
    },
    Call {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notice {
        method: String,
        params: Option<serde_json::Value>,
    },
}

impl Inbound {
    fn classify(frame: &serde_json::Value) -> Option<Self> {
        let method = frame
            .get("method")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let params = frame.get("params").cloned();
        let answered = frame.get("result").is_some() || frame.get("error").is_some();

        match (frame.get("id"), method) {
            (Some(id), Some(method)) => Some(Self::Call {
                id: id.clone(),
                method,
                params,
            }),
            (None, Some(method)) => Some(Self::Notice { method, params }),
            (Some(id), None) if answered => Some(Self::Reply {
                id: id.as_u64()?,
                body: frame.clone(),
            }),
            _ => None,
        }
    }
}

/// Lexically resolve `.` and `..` so a URI cannot climb out of the root.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for part in path.components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Routes frames read from one server: replies to their waiting request,
/// server calls to a protocol answer, diagnostics to the event channel.
struct Router {
    server: String,
    root: PathBuf,
    pending: Pending,
    events: mpsc::Sender<LspEvent>,
    outbound: mpsc::Sender<Outbound>,
}

impl Router {
    async fn route(&self, frame: &serde_json::Value) {
        let Some(inbound) = Inbound::classify(frame) else {
            tracing::trace!(server = %self.server, "Dropping unrecognised JSON-RPC frame");
            return;
        };

        match inbound {
            Inbound::Reply { id, body } => {
                let waiter = self.pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(body);
                    }
                    None => tracing::trace!(server = %self.server, id, "Reply with no waiter"),
                }
            }
            Inbound::Call { id, method, params } => {
                tracing::debug!(server = %self.server, %method, "Answering server request");
                let answer = protocol::reply_to_server_request(&id, &method, params.as_ref());
                let _ = self.outbound.send(Outbound::Frame(answer)).await;
            }
            Inbound::Notice { method, params } => match (method.as_str(), params) {
                ("textDocument/publishDiagnostics", Some(params)) => self.publish(params).await,
                (method, _) => {
                    tracing::trace!(server = %self.server, method, "Ignoring notification");
                }
            },
        }
    }

    async fn publish(&self, params: serde_json::Value) {
        let params: PublishDiagnosticsParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!(server = %self.server, "Unreadable publishDiagnostics: {e}");
                return;
            }
        };
        let Some(path) = protocol::file_uri_to_path(&params.uri) else {
            return;
        };
        if !lexical_normalize(&path).starts_with(&self.root) {
            tracing::warn!(
                server = %self.server,
                path = %path.display(),
                "Diagnostics for a file outside the workspace"
            );
            return;
        }

        let items = params
            .diagnostics
            .iter()
            .map(protocol::LspDiagnostic::to_wedge_diagnostic)
            .collect();
        let _ = self
            .events
            .send(LspEvent::Diagnostics {
                path,
                version: params.document_version(),
                items,
            })
            .await;
    }
}

fn spawn_writer<W>(stdin: W, mut rx: mpsc::Receiver<Outbound>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = FrameWriter::new(stdin);
        while let Some(Outbound::Frame(frame)) = rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                tracing::warn!("LSP write error: {e}");
                break;
            }
        }
    })
}

fn spawn_reader<R>(stdout: R, router: Router) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = FrameReader::new(stdout);
        let reason = loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => router.route(&frame).await,
                Ok(None) => {
                    tracing::info!(server = %router.server, "Verifier closed stdout");
                    break ServerStopReason::Exited;
                }
                Err(e) => {
                    tracing::warn!(server = %router.server, "LSP read error: {e:#}");
                    break ServerStopReason::Failed(e.to_string());
                }
            }
        };
        let _ = router
            .events
            .send(LspEvent::ServerStopped {
                server: router.server.clone(),
                reason,
            })
            .await;
    })
}

fn spawn_stderr_pump(stderr: ChildStderr, server: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                tracing::debug!(server = %server, "{line}");
            }
        }
    })
}

pub(crate) struct RunningServer {
    name: String,
    language_id: String,
    child: Child,
    outbound: mpsc::Sender<Outbound>,
    next_id: u64,
    pending: Pending,
    /// Last version sent per document URI; absence means not yet opened.
    versions: HashMap<String, i32>,
    tasks: [JoinHandle<()>; 3],
}

impl RunningServer {
    pub async fn start(
        name: String,
        config: &ServerConfig,
        workspace_root: &Path,
        events: mpsc::Sender<LspEvent>,
    ) -> Result<Self> {
        let program = which::which(config.command())
            .with_context(|| format!("{} not found in PATH", config.command()))?;
        let mut child = Command::new(&program)
            .args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", program.display()))?;

        let stdin = child.stdin.take().context("verifier has no stdin")?;
        let stdout = child.stdout.take().context("verifier has no stdout")?;
        let stderr = child.stderr.take().context("verifier has no stderr")?;

        let pending: Pending = Arc::default();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let router = Router {
            server: name.clone(),
            root: lexical_normalize(workspace_root),
            pending: Arc::clone(&pending),
            events,
            outbound: outbound.clone(),
        };
        let tasks = [
            spawn_writer(stdin, outbound_rx),
            spawn_reader(stdout, router),
            spawn_stderr_pump(stderr, name.clone()),
        ];

        let mut server = Self {
            name,
            language_id: config.language_id().to_string(),
            child,
            outbound,
            next_id: 1,
            pending,
            versions: HashMap::new(),
            tasks,
        };
        server.initialize(workspace_root).await?;
        Ok(server)
    }

    async fn initialize(&mut self, workspace_root: &Path) -> Result<()> {
        let root_uri = protocol::path_to_file_uri(workspace_root)?;
        let response = self
            .request("initialize", Some(protocol::initialize_params(root_uri.as_str())))
            .await?;
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown error");
            bail!("LSP initialize failed: {message}");
        }
        self.notify("initialized", Some(serde_json::json!({})))
            .await
    }

    async fn send(&self, frame: serde_json::Value) -> Result<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| anyhow!("writer for '{}' has stopped", self.name))
    }

    async fn request(
        &mut self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = match serde_json::to_value(Outgoing::request(id, method, params)) {
            Ok(frame) => self.send(frame).await,
            Err(e) => Err(e.into()),
        };
        let outcome = match sent {
            Ok(()) => match timeout(REQUEST_TIMEOUT, rx).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(_)) => Err(anyhow!("{method}: reader stopped before replying")),
                Err(_) => Err(anyhow!("{method} request timed out")),
            },
            Err(e) => Err(e),
        };
        self.pending.lock().await.remove(&id);
        outcome
    }

    async fn notify(&self, method: &'static str, params: Option<serde_json::Value>) -> Result<()> {
        let frame = serde_json::to_value(Outgoing::notification(method, params))
            .context("serializing notification")?;
        self.send(frame).await
    }

    /// Send the full document text, opening it on first use.
    ///
    /// Versions increase by one per call; the returned version is what the
    /// server will echo in its next `publishDiagnostics` for this document.
    pub async fn sync_document(&mut self, uri: &str, text: &str) -> Result<DocumentVersion> {
        let (method, params, version) = match self.versions.get_mut(uri) {
            Some(last) => {
                *last += 1;
                let version = *last;
                (
                    "textDocument/didChange",
                    protocol::did_change_params(uri, version, text),
                    version,
                )
            }
            None => {
                self.versions.insert(uri.to_string(), 1);
                (
                    "textDocument/didOpen",
                    protocol::did_open_params(uri, &self.language_id, 1, text),
                    1,
                )
            }
        };
        self.notify(method, Some(params)).await?;
        Ok(DocumentVersion::new(version))
    }

    /// Ask the server to exit, killing it if it lingers. Consumes self.
    pub async fn shutdown(mut self) {
        match self.request("shutdown", None).await {
            Ok(response) if response.get("error").is_none() => {
                let _ = self.notify("exit", None).await;
            }
            Ok(_) | Err(_) => {
                tracing::debug!(server = %self.name, "Verifier refused shutdown");
            }
        }
        let _ = self.outbound.send(Outbound::Close).await;

        if timeout(EXIT_GRACE, self.child.wait())
            .await
            .is_err()
        {
            tracing::debug!(server = %self.name, "Verifier still running, killing");
            let _ = self.child.kill().await;
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}
