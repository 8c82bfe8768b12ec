//! Buffer mutation and verification requests.
//!
//! [`Documents`] applies line edits and returns only once they are durable.
//! [`Verifier`] is the fire-and-forget trigger plus the notification stream
//! the driver suspends on.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tempfile::NamedTempFile;
use wedge_lsp::{LspError, LspManager, WedgeDiagnostic};
use wedge_types::{BufferId, DocumentVersion, ObligationSyntax, Statement};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("line {} is past the end of {buffer} ({lines} lines)", line + 1)]
    LineOutOfRange {
        buffer: BufferId,
        line: u32,
        lines: usize,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Line-addressed edits on buffers, keyed by identity.
pub trait Documents: Send {
    fn text(&mut self, buffer: &BufferId) -> Result<String, DocumentError>;

    /// Insert `statement` as a new obligation line immediately before `line`.
    fn insert(
        &mut self,
        buffer: &BufferId,
        line: u32,
        statement: &Statement,
    ) -> Result<(), DocumentError>;

    /// Make `line` inert without removing it.
    fn disable(&mut self, buffer: &BufferId, line: u32) -> Result<(), DocumentError>;
}

/// A text file held as lines, rewritten atomically after every edit.
#[derive(Debug)]
pub struct FileDocument {
    path: PathBuf,
    lines: Vec<String>,
    line_ending: &'static str,
    trailing_newline: bool,
}

impl FileDocument {
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let content = fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let line_ending = if content.contains("\r\n") { "\r\n" } else { "\n" };
        Ok(Self {
            path: path.to_path_buf(),
            lines: content.lines().map(str::to_string).collect(),
            line_ending,
            trailing_newline: content.ends_with('\n'),
        })
    }

    #[must_use]
    pub fn text(&self) -> String {
        let mut text = self.lines.join(self.line_ending);
        if self.trailing_newline {
            text.push_str(self.line_ending);
        }
        text
    }

    fn out_of_range(&self, line: u32) -> DocumentError {
        DocumentError::LineOutOfRange {
            buffer: BufferId::new(&self.path),
            line,
            lines: self.lines.len(),
        }
    }

    /// Insert above `line`, matching the indentation of the line it lands on.
    pub fn insert(
        &mut self,
        line: u32,
        statement: &Statement,
        syntax: &ObligationSyntax,
    ) -> Result<(), DocumentError> {
        let idx = line as usize;
        if idx > self.lines.len() {
            return Err(self.out_of_range(line));
        }
        let anchor = self
            .lines
            .get(idx)
            .or_else(|| self.lines.last())
            .map_or("", String::as_str);
        let indent = &anchor[..anchor.len() - anchor.trim_start().len()];
        let rendered = syntax.render(indent, statement);

        self.lines.insert(idx, rendered);
        if let Err(e) = self.persist() {
            self.lines.remove(idx);
            return Err(e);
        }
        Ok(())
    }

    pub fn disable(&mut self, line: u32, syntax: &ObligationSyntax) -> Result<(), DocumentError> {
        let idx = line as usize;
        let Some(current) = self.lines.get(idx) else {
            return Err(self.out_of_range(line));
        };
        let disabled = syntax.disable(current);
        let previous = mem::replace(&mut self.lines[idx], disabled);
        if let Err(e) = self.persist() {
            self.lines[idx] = previous;
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), DocumentError> {
        let persist_err = |source| DocumentError::Persist {
            path: self.path.clone(),
            source,
        };
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(persist_err)?;
        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), meta.permissions()).map_err(persist_err)?;
        }
        tmp.write_all(self.text().as_bytes()).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&self.path).map_err(|e| persist_err(e.error))?;
        tracing::debug!(path = %self.path.display(), lines = self.lines.len(), "Persisted buffer");
        Ok(())
    }
}

/// [`Documents`] over files on disk, loaded on first use.
#[derive(Debug)]
pub struct FileDocuments {
    syntax: ObligationSyntax,
    open: HashMap<BufferId, FileDocument>,
}

impl FileDocuments {
    #[must_use]
    pub fn new(syntax: ObligationSyntax) -> Self {
        Self {
            syntax,
            open: HashMap::new(),
        }
    }

    fn document(&mut self, buffer: &BufferId) -> Result<&mut FileDocument, DocumentError> {
        match self.open.entry(buffer.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(FileDocument::load(buffer.as_path())?)),
        }
    }
}

impl Documents for FileDocuments {
    fn text(&mut self, buffer: &BufferId) -> Result<String, DocumentError> {
        Ok(self.document(buffer)?.text())
    }

    fn insert(
        &mut self,
        buffer: &BufferId,
        line: u32,
        statement: &Statement,
    ) -> Result<(), DocumentError> {
        let syntax = self.syntax.clone();
        self.document(buffer)?.insert(line, statement, &syntax)
    }

    fn disable(&mut self, buffer: &BufferId, line: u32) -> Result<(), DocumentError> {
        let syntax = self.syntax.clone();
        self.document(buffer)?.disable(line, &syntax)
    }
}

pub type VerifierFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error(transparent)]
    Lsp(#[from] LspError),
    #[error("{0}")]
    Other(String),
}

/// One diagnostics publication for one buffer.
#[derive(Debug, Clone)]
pub struct Notification {
    pub buffer: BufferId,
    /// Document version the diagnostics were computed for, when reported.
    pub version: Option<DocumentVersion>,
    pub diagnostics: Vec<WedgeDiagnostic>,
}

pub trait Verifier: Send {
    /// Hand the current buffer text to the verifier. Returns as soon as the
    /// request is sent; results arrive later through `next_notification`.
    fn request_verification<'a>(
        &'a mut self,
        buffer: &'a BufferId,
        text: &'a str,
    ) -> VerifierFut<'a, Result<DocumentVersion, VerifierError>>;

    /// Next published diagnostics, or `None` once the verifier is gone.
    fn next_notification(&mut self) -> VerifierFut<'_, Option<Notification>>;
}

/// [`Verifier`] backed by language servers.
pub struct LspVerifier {
    manager: LspManager,
}

impl LspVerifier {
    #[must_use]
    pub fn new(manager: LspManager) -> Self {
        Self { manager }
    }

    #[must_use]
    pub fn manager(&self) -> &LspManager {
        &self.manager
    }

    pub async fn shutdown(&mut self) {
        self.manager.shutdown().await;
    }
}

impl Verifier for LspVerifier {
    fn request_verification<'a>(
        &'a mut self,
        buffer: &'a BufferId,
        text: &'a str,
    ) -> VerifierFut<'a, Result<DocumentVersion, VerifierError>> {
        Box::pin(async move {
            let version = self.manager.sync_document(buffer.as_path(), text).await?;
            Ok(version)
        })
    }

    fn next_notification(&mut self) -> VerifierFut<'_, Option<Notification>> {
        Box::pin(async move {
            let published = self.manager.next_diagnostics().await?;
            Some(Notification {
                buffer: BufferId::new(published.path),
                version: published.version,
                diagnostics: published.items,
            })
        })
    }
}
