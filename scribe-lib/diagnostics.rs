use std::collections::BTreeMap;

use scribe_core::{
  DocumentId,
  TextRange,
};
use serde::{
  Deserialize,
  Serialize,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
  Error,
  Warning,
  Information,
  Hint,
}

impl DiagnosticSeverity {
  pub fn from_lsp_code(code: u8) -> Option<Self> {
    match code {
      1 => Some(Self::Error),
      2 => Some(Self::Warning),
      3 => Some(Self::Information),
      4 => Some(Self::Hint),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
  pub range:    TextRange,
  pub severity: DiagnosticSeverity,
  pub message:  String,
  pub source:   String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticCounts {
  pub total:       usize,
  pub errors:      usize,
  pub warnings:    usize,
  pub information: usize,
  pub hints:       usize,
}

impl DiagnosticCounts {
  pub fn from_diagnostics(diagnostics: &[Diagnostic]) -> Self {
    let mut counts = Self::default();
    for diagnostic in diagnostics {
      counts.total = counts.total.saturating_add(1);
      match diagnostic.severity {
        DiagnosticSeverity::Error => counts.errors = counts.errors.saturating_add(1),
        DiagnosticSeverity::Warning => counts.warnings = counts.warnings.saturating_add(1),
        DiagnosticSeverity::Information => {
          counts.information = counts.information.saturating_add(1)
        },
        DiagnosticSeverity::Hint => counts.hints = counts.hints.saturating_add(1),
      }
    }
    counts
  }

  pub fn is_empty(&self) -> bool {
    self.total == 0
  }
}

/// The latest diagnostic set published for one document, tagged with the
/// document version it was computed against when the server reports one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDiagnostics {
  pub document:    DocumentId,
  pub version:     Option<u64>,
  pub diagnostics: Vec<Diagnostic>,
}

impl DocumentDiagnostics {
  pub fn counts(&self) -> DiagnosticCounts {
    DiagnosticCounts::from_diagnostics(&self.diagnostics)
  }
}

pub type DiagnosticsCallback = Box<dyn FnMut(DocumentId, &[Diagnostic]) + Send>;

/// Latest diagnostics per document. Every publish replaces the previous set
/// for that document wholesale.
#[derive(Default)]
pub struct DiagnosticsStore {
  documents: BTreeMap<DocumentId, DocumentDiagnostics>,
  callback:  Option<DiagnosticsCallback>,
}

impl std::fmt::Debug for DiagnosticsStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DiagnosticsStore")
      .field("documents", &self.documents)
      .field("callback", &self.callback.is_some())
      .finish()
  }
}

impl DiagnosticsStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Called with the full replacement set on every publish, including empty
  /// sets that clear a document.
  pub fn set_callback(&mut self, callback: impl FnMut(DocumentId, &[Diagnostic]) + Send + 'static) {
    self.callback = Some(Box::new(callback));
  }

  pub fn clear_callback(&mut self) {
    self.callback = None;
  }

  pub fn document(&self, document: DocumentId) -> Option<&DocumentDiagnostics> {
    self.documents.get(&document)
  }

  pub fn diagnostics(&self, document: DocumentId) -> &[Diagnostic] {
    self
      .documents
      .get(&document)
      .map(|entry| entry.diagnostics.as_slice())
      .unwrap_or_default()
  }

  pub fn documents(&self) -> impl Iterator<Item = &DocumentDiagnostics> {
    self.documents.values()
  }

  pub fn total_counts(&self) -> DiagnosticCounts {
    let mut total = DiagnosticCounts::default();
    for document in self.documents.values() {
      let counts = document.counts();
      total.total = total.total.saturating_add(counts.total);
      total.errors = total.errors.saturating_add(counts.errors);
      total.warnings = total.warnings.saturating_add(counts.warnings);
      total.information = total.information.saturating_add(counts.information);
      total.hints = total.hints.saturating_add(counts.hints);
    }
    total
  }

  /// Replace the set for `document.document`, unconditionally.
  pub fn apply_document(&mut self, document: DocumentDiagnostics) -> DiagnosticCounts {
    let id = document.document;
    let counts = document.counts();
    if let Some(callback) = self.callback.as_mut() {
      callback(id, &document.diagnostics);
    }

    if counts.is_empty() {
      self.documents.remove(&id);
    } else {
      self.documents.insert(id, document);
    }
    counts
  }

  /// Apply a set unless it was computed against a version older than
  /// `current_version`. Unversioned sets are always accepted. Returns whether
  /// the set was applied.
  pub fn apply_if_current(&mut self, document: DocumentDiagnostics, current_version: u64) -> bool {
    if let Some(version) = document.version
      && version < current_version
    {
      debug!(
        document = %document.document,
        version,
        current_version,
        "dropping stale diagnostics"
      );
      return false;
    }
    self.apply_document(document);
    true
  }

  pub fn remove_document(&mut self, document: DocumentId) -> bool {
    self.documents.remove(&document).is_some()
  }

  pub fn clear(&mut self) {
    self.documents.clear();
  }
}
