//! A file being edited: a [`TextBuffer`] plus its undo/redo history.
//!
//! Every successful mutation bumps [`Document::version`], marks the document
//! modified and reports one [`Change`] to the registered change callback.
//! Undo and redo run with the callback detached and then report a single
//! whole-buffer change, so an observer never sees the buffer halfway through
//! a history step.
//!
//! File I/O goes through the [`FileSystem`] collaborator passed to
//! [`Document::load_from_file`] and friends.

use std::path::{
  Path,
  PathBuf,
};

use scribe_core::{
  CoreError,
  DocumentId,
  ErrorCode,
  Position,
  TextRange,
  fs::FileSystem,
};
use thiserror::Error;
use tracing::{
  debug,
  warn,
};

use crate::{
  history::{
    Change,
    HistoryError,
    UndoRedoStack,
    UndoableAction,
  },
  text_buffer::TextBuffer,
};

#[derive(Debug, Error)]
pub enum DocumentError {
  #[error("document has no file path")]
  NoPath,
  #[error(transparent)]
  History(#[from] HistoryError),
  #[error(transparent)]
  Io(#[from] CoreError),
}

impl DocumentError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::NoPath => ErrorCode::InvalidArgument,
      Self::History(err) => err.code(),
      Self::Io(err) => err.code(),
    }
  }
}

pub type Result<T> = std::result::Result<T, DocumentError>;

pub type ChangeCallback = Box<dyn FnMut(&Change) + Send>;

pub struct Document {
  id:        DocumentId,
  path:      Option<PathBuf>,
  buffer:    TextBuffer,
  history:   UndoRedoStack,
  modified:  bool,
  /// The buffer holds U+FFFD where the file on disk had invalid UTF-8.
  lossy:     bool,
  version:   u64,
  on_change: Option<ChangeCallback>,
}

impl std::fmt::Debug for Document {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Document")
      .field("id", &self.id)
      .field("path", &self.path)
      .field("len", &self.buffer.len())
      .field("modified", &self.modified)
      .field("lossy", &self.lossy)
      .field("version", &self.version)
      .finish_non_exhaustive()
  }
}

impl Document {
  pub fn new(id: DocumentId) -> Self {
    Self {
      id,
      path: None,
      buffer: TextBuffer::default(),
      history: UndoRedoStack::default(),
      modified: false,
      lossy: false,
      version: 0,
      on_change: None,
    }
  }

  pub fn with_path(id: DocumentId, path: impl Into<PathBuf>) -> Self {
    let mut doc = Self::new(id);
    doc.path = Some(path.into());
    doc
  }

  pub fn with_text(id: DocumentId, text: impl Into<String>) -> Self {
    let mut doc = Self::new(id);
    doc.buffer = TextBuffer::new(text);
    doc
  }

  pub fn with_undo_limit(mut self, limit: usize) -> Self {
    self.history = UndoRedoStack::with_limit(limit);
    self
  }

  pub fn id(&self) -> DocumentId {
    self.id
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  pub fn text(&self) -> &str {
    self.buffer.text()
  }

  pub fn buffer(&self) -> &TextBuffer {
    &self.buffer
  }

  pub fn version(&self) -> u64 {
    self.version
  }

  pub fn is_modified(&self) -> bool {
    self.modified
  }

  /// Whether the last load had to replace invalid UTF-8. Saving such a
  /// document writes the replacement characters, not the original bytes.
  pub fn is_lossy(&self) -> bool {
    self.lossy
  }

  pub fn is_untitled(&self) -> bool {
    self.path.is_none()
  }

  pub fn can_undo(&self) -> bool {
    self.history.can_undo()
  }

  pub fn can_redo(&self) -> bool {
    self.history.can_redo()
  }

  pub fn set_change_callback(&mut self, callback: impl FnMut(&Change) + Send + 'static) {
    self.on_change = Some(Box::new(callback));
  }

  pub fn clear_change_callback(&mut self) {
    self.on_change = None;
  }

  pub fn insert_text(&mut self, pos: Position, text: &str) -> Result<TextRange> {
    let change = self.execute(UndoableAction::insert(pos, text))?;
    Ok(change.new_range)
  }

  /// Remove `range`, returning the removed text.
  pub fn remove_text(&mut self, range: TextRange) -> Result<String> {
    let change = self.execute(UndoableAction::remove(range))?;
    Ok(change.old_text)
  }

  /// Replace the whole buffer as one undoable step.
  pub fn replace_text(&mut self, text: impl Into<String>) -> Result<()> {
    self.execute(UndoableAction::replace(text))?;
    Ok(())
  }

  fn execute(&mut self, action: UndoableAction) -> Result<Change> {
    let change = self.history.execute(action, &mut self.buffer)?;
    self.mark_changed();
    self.notify(&change);
    Ok(change)
  }

  /// Returns `Ok(false)` when there is nothing to undo.
  pub fn undo(&mut self) -> Result<bool> {
    self.step_history(|history, buffer| history.undo(buffer))
  }

  pub fn redo(&mut self) -> Result<bool> {
    self.step_history(|history, buffer| history.redo(buffer))
  }

  fn step_history(
    &mut self,
    step: impl FnOnce(
      &mut UndoRedoStack,
      &mut TextBuffer,
    ) -> std::result::Result<Option<Change>, HistoryError>,
  ) -> Result<bool> {
    let before = self.buffer.clone();
    let callback = self.on_change.take();
    let stepped = step(&mut self.history, &mut self.buffer);
    self.on_change = callback;

    let Some(_) = stepped? else {
      return Ok(false);
    };
    self.mark_changed();
    let change = Change::whole_buffer(&before, &self.buffer);
    self.notify(&change);
    Ok(true)
  }

  fn mark_changed(&mut self) {
    self.modified = true;
    self.version = self.version.wrapping_add(1);
  }

  fn notify(&mut self, change: &Change) {
    if let Some(callback) = self.on_change.as_mut() {
      callback(change);
    }
  }

  /// Replace the buffer with the file contents. History is cleared: a load is
  /// not undoable. On failure the document is left untouched.
  pub fn load_from_file(&mut self, fs: &dyn FileSystem) -> Result<()> {
    let path = self.path.clone().ok_or(DocumentError::NoPath)?;
    let bytes = fs.read_file(&path)?;
    let (text, lossy) = match String::from_utf8(bytes) {
      Ok(text) => (text, false),
      Err(err) => {
        warn!(path = %path.display(), "file is not valid utf-8, replacing invalid sequences");
        (String::from_utf8_lossy(err.as_bytes()).into_owned(), true)
      },
    };

    let before = std::mem::replace(&mut self.buffer, TextBuffer::new(text));
    self.history.clear();
    // The buffer no longer matches the bytes on disk.
    self.modified = lossy;
    self.lossy = lossy;
    self.version = self.version.wrapping_add(1);
    debug!(document = %self.id, path = %path.display(), bytes = self.buffer.len(), "loaded document");
    let change = Change::whole_buffer(&before, &self.buffer);
    self.notify(&change);
    Ok(())
  }

  pub fn save_to_file(&mut self, fs: &dyn FileSystem) -> Result<()> {
    let path = self.path.clone().ok_or(DocumentError::NoPath)?;
    self.warn_if_lossy(&path);
    fs.write_file(&path, self.buffer.text().as_bytes())?;
    self.modified = false;
    self.lossy = false;
    debug!(document = %self.id, path = %path.display(), "saved document");
    Ok(())
  }

  /// Write to `path` and adopt it as the document path on success.
  pub fn save_as(&mut self, fs: &dyn FileSystem, path: impl Into<PathBuf>) -> Result<()> {
    let path = path.into();
    self.warn_if_lossy(&path);
    fs.write_file(&path, self.buffer.text().as_bytes())?;
    self.path = Some(path);
    self.modified = false;
    self.lossy = false;
    Ok(())
  }

  fn warn_if_lossy(&self, path: &Path) {
    if self.lossy {
      warn!(
        document = %self.id,
        path = %path.display(),
        "saving a document whose invalid utf-8 was replaced on load"
      );
    }
  }
}
