use std::collections::VecDeque;

use scribe_core::{
  ErrorCode,
  Position,
  TextRange,
};
use thiserror::Error;

use crate::{
  Tendril,
  text_buffer::{
    BufferError,
    TextBuffer,
  },
};

pub const DEFAULT_UNDO_LIMIT: usize = 1000;

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
  #[error(transparent)]
  Buffer(#[from] BufferError),
}

impl HistoryError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::Buffer(err) => err.code(),
    }
  }
}

/// A bidirectional delta.
///
/// Writing `new_text` over `old_range` is the forward edit; writing
/// `old_text` over `new_range` is its exact inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
  pub old_range: TextRange,
  pub old_text:  String,
  pub new_range: TextRange,
  pub new_text:  String,
}

impl Change {
  /// A change replacing the whole of `before` with the whole of `after`.
  pub fn whole_buffer(before: &TextBuffer, after: &TextBuffer) -> Self {
    Self {
      old_range: before.full_range(),
      old_text:  before.text().to_string(),
      new_range: after.full_range(),
      new_text:  after.text().to_string(),
    }
  }

  pub fn inverted(&self) -> Self {
    Self {
      old_range: self.new_range,
      old_text:  self.new_text.clone(),
      new_range: self.old_range,
      new_text:  self.old_text.clone(),
    }
  }
}

/// A reversible buffer mutation.
///
/// Actions operate on the buffer handed to them and never record themselves;
/// recording is the job of [`UndoRedoStack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoableAction {
  Insert {
    at:   Position,
    text: Tendril,
  },
  Remove {
    range:   TextRange,
    /// Filled in on first execution.
    removed: Option<Tendril>,
  },
  Replace {
    /// Filled in on first execution.
    old: Option<String>,
    new: String,
  },
}

impl UndoableAction {
  pub fn insert(at: Position, text: &str) -> Self {
    Self::Insert {
      at,
      text: text.into(),
    }
  }

  pub fn remove(range: TextRange) -> Self {
    Self::Remove {
      range,
      removed: None,
    }
  }

  pub fn replace(new: impl Into<String>) -> Self {
    Self::Replace {
      old: None,
      new: new.into(),
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Insert { .. } => "insert",
      Self::Remove { .. } => "remove",
      Self::Replace { .. } => "replace",
    }
  }

  pub fn execute(&mut self, buffer: &mut TextBuffer) -> Result<Change> {
    match self {
      Self::Insert { at, text } => {
        let new_range = buffer.insert_at_position(*at, text.as_str())?;
        Ok(Change {
          old_range: TextRange::point(*at),
          old_text: String::new(),
          new_range,
          new_text: text.to_string(),
        })
      },
      Self::Remove { range, removed } => {
        let text = buffer.remove_text(*range)?;
        *removed = Some(text.as_str().into());
        Ok(Change {
          old_range: *range,
          old_text:  text,
          new_range: TextRange::point(range.start),
          new_text:  String::new(),
        })
      },
      Self::Replace { old, new } => {
        let before = buffer.clone();
        buffer.set_text(new.as_str());
        *old = Some(before.text().to_string());
        Ok(Change::whole_buffer(&before, buffer))
      },
    }
  }

  pub fn undo(&mut self, buffer: &mut TextBuffer) -> Result<Change> {
    match self {
      Self::Insert { at, text } => {
        let range = TextRange::new(*at, at.traverse(text.as_str()));
        let removed = buffer.remove_text(range)?;
        Ok(Change {
          old_range: range,
          old_text:  removed,
          new_range: TextRange::point(*at),
          new_text:  String::new(),
        })
      },
      Self::Remove { range, removed } => {
        let text = removed.as_deref().unwrap_or_default();
        let new_range = buffer.insert_at_position(range.start, text)?;
        Ok(Change {
          old_range: TextRange::point(range.start),
          old_text: String::new(),
          new_range,
          new_text: text.to_string(),
        })
      },
      Self::Replace { old, .. } => {
        let before = buffer.clone();
        buffer.set_text(old.clone().unwrap_or_default());
        Ok(Change::whole_buffer(&before, buffer))
      },
    }
  }
}

/// Two bounded stacks of [`UndoableAction`]s.
///
/// Executing a new action clears the redo side. When the undo side grows past
/// `limit` the oldest entry is evicted.
#[derive(Debug)]
pub struct UndoRedoStack {
  undo:  VecDeque<UndoableAction>,
  redo:  Vec<UndoableAction>,
  limit: usize,
}

impl Default for UndoRedoStack {
  fn default() -> Self {
    Self::with_limit(DEFAULT_UNDO_LIMIT)
  }
}

impl UndoRedoStack {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_limit(limit: usize) -> Self {
    Self {
      undo:  VecDeque::new(),
      redo:  Vec::new(),
      limit: limit.max(1),
    }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  /// Run `action` and record it. A failed action is not recorded and leaves
  /// both stacks untouched.
  pub fn execute(&mut self, mut action: UndoableAction, buffer: &mut TextBuffer) -> Result<Change> {
    let change = action.execute(buffer)?;
    self.push_undo(action);
    self.redo.clear();
    Ok(change)
  }

  /// Revert the most recent action. `Ok(None)` when there is nothing to undo.
  pub fn undo(&mut self, buffer: &mut TextBuffer) -> Result<Option<Change>> {
    let Some(mut action) = self.undo.pop_back() else {
      return Ok(None);
    };
    match action.undo(buffer) {
      Ok(change) => {
        self.redo.push(action);
        Ok(Some(change))
      },
      Err(err) => {
        self.undo.push_back(action);
        Err(err)
      },
    }
  }

  pub fn redo(&mut self, buffer: &mut TextBuffer) -> Result<Option<Change>> {
    let Some(mut action) = self.redo.pop() else {
      return Ok(None);
    };
    match action.execute(buffer) {
      Ok(change) => {
        self.push_undo(action);
        Ok(Some(change))
      },
      Err(err) => {
        self.redo.push(action);
        Err(err)
      },
    }
  }

  fn push_undo(&mut self, action: UndoableAction) {
    self.undo.push_back(action);
    while self.undo.len() > self.limit {
      self.undo.pop_front();
    }
  }

  pub fn clear(&mut self) {
    self.undo.clear();
    self.redo.clear();
  }

  pub fn can_undo(&self) -> bool {
    !self.undo.is_empty()
  }

  pub fn can_redo(&self) -> bool {
    !self.redo.is_empty()
  }

  pub fn undo_len(&self) -> usize {
    self.undo.len()
  }

  pub fn redo_len(&self) -> usize {
    self.redo.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_undo_redo() {
    let mut buffer = TextBuffer::new("");
    let mut stack = UndoRedoStack::new();

    stack
      .execute(UndoableAction::insert(Position::new(0, 0), "A"), &mut buffer)
      .unwrap();
    stack
      .execute(UndoableAction::insert(Position::new(0, 1), "Be"), &mut buffer)
      .unwrap();
    assert_eq!(buffer.text(), "ABe");

    stack.undo(&mut buffer).unwrap();
    assert_eq!(buffer.text(), "A");
    stack.undo(&mut buffer).unwrap();
    assert_eq!(buffer.text(), "");
    assert_eq!(stack.undo(&mut buffer), Ok(None));

    stack.redo(&mut buffer).unwrap();
    assert_eq!(buffer.text(), "A");
    stack.redo(&mut buffer).unwrap();
    assert_eq!(buffer.text(), "ABe");
    assert_eq!(stack.redo(&mut buffer), Ok(None));
  }

  #[test]
  fn new_action_discards_redo() {
    let mut buffer = TextBuffer::new("hello");
    let mut stack = UndoRedoStack::new();
    stack
      .execute(
        UndoableAction::remove(TextRange::new(Position::new(0, 0), Position::new(0, 2))),
        &mut buffer,
      )
      .unwrap();
    assert_eq!(buffer.text(), "llo");
    stack.undo(&mut buffer).unwrap();
    assert!(stack.can_redo());

    stack
      .execute(UndoableAction::insert(Position::new(0, 5), "!"), &mut buffer)
      .unwrap();
    assert!(!stack.can_redo());
    assert_eq!(buffer.text(), "hello!");
  }

  #[test]
  fn remove_captures_text_for_undo() {
    let mut buffer = TextBuffer::new("one\ntwo\nthree");
    let mut stack = UndoRedoStack::new();
    let range = TextRange::new(Position::new(0, 2), Position::new(2, 1));
    let change = stack
      .execute(UndoableAction::remove(range), &mut buffer)
      .unwrap();
    assert_eq!(change.old_text, "e\ntwo\nt");
    assert_eq!(buffer.text(), "onhree");

    let change = stack.undo(&mut buffer).unwrap().unwrap();
    assert_eq!(change.new_range, range);
    assert_eq!(buffer.text(), "one\ntwo\nthree");
  }

  #[test]
  fn replace_is_reversible() {
    let mut buffer = TextBuffer::new("old\ntext");
    let mut stack = UndoRedoStack::new();
    let change = stack
      .execute(UndoableAction::replace("new"), &mut buffer)
      .unwrap();
    assert_eq!(change.old_range.end, Position::new(1, 4));
    assert_eq!(change.new_range.end, Position::new(0, 3));

    stack.undo(&mut buffer).unwrap();
    assert_eq!(buffer.text(), "old\ntext");
    stack.redo(&mut buffer).unwrap();
    assert_eq!(buffer.text(), "new");
  }

  #[test]
  fn oldest_entries_are_evicted() {
    let mut buffer = TextBuffer::new("");
    let mut stack = UndoRedoStack::with_limit(3);
    for idx in 0..5u32 {
      stack
        .execute(UndoableAction::insert(Position::new(0, idx), "x"), &mut buffer)
        .unwrap();
    }
    assert_eq!(stack.undo_len(), 3);
    while stack.undo(&mut buffer).unwrap().is_some() {}
    assert_eq!(buffer.text(), "xx");
    assert_eq!(stack.redo_len(), 3);
  }

  #[test]
  fn failed_action_is_not_recorded() {
    let mut buffer = TextBuffer::new("abc");
    let mut stack = UndoRedoStack::new();
    let err = stack
      .execute(UndoableAction::insert(Position::new(3, 0), "x"), &mut buffer)
      .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OutOfRange);
    assert!(!stack.can_undo());
    assert_eq!(buffer.text(), "abc");
  }

  #[test]
  fn default_limit() {
    assert_eq!(UndoRedoStack::new().limit(), DEFAULT_UNDO_LIMIT);
  }
}
