//! Latest published diagnostics per file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::WedgeDiagnostic;

#[derive(Default)]
pub(crate) struct DiagnosticsStore {
    latest: HashMap<PathBuf, Vec<WedgeDiagnostic>>,
}

impl DiagnosticsStore {
    /// Servers publish full sets, so this replaces rather than merges and an
    /// empty set forgets the file.
    pub fn replace(&mut self, path: PathBuf, items: Vec<WedgeDiagnostic>) {
        if items.is_empty() {
            self.latest.remove(&path);
        } else {
            self.latest.insert(path, items);
        }
    }

    pub fn for_path(&self, path: &Path) -> &[WedgeDiagnostic] {
        self.latest.get(path).map_or(&[], Vec::as_slice)
    }

    pub fn errors_in(&self, path: &Path) -> impl Iterator<Item = &WedgeDiagnostic> {
        self.for_path(path)
            .iter()
            .filter(|d| d.severity().is_error())
    }
}
