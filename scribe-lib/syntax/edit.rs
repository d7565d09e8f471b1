//! Byte-range edits queued between two parses.
//!
//! Edits arriving between parses are folded into a single [`PendingEdit`]
//! expressed against the text the tree was last built from. Replaying them
//! one by one would be wrong: each later edit is expressed in offsets that
//! already include the earlier ones.

use scribe_core::Position;
use tree_sitter::{
  InputEdit,
  Point,
};

use crate::{
  history::Change,
  text_buffer::{
    BufferError,
    TextBuffer,
  },
};

/// `start..old_end` in the synced text was replaced by `start..new_end` in the
/// current text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEdit {
  pub start:   usize,
  pub old_end: usize,
  pub new_end: usize,
}

impl PendingEdit {
  pub fn new(start: usize, old_end: usize, new_end: usize) -> Self {
    Self {
      start,
      old_end,
      new_end,
    }
  }

  /// Fold `next`, expressed against the text produced by `self`, into one
  /// edit expressed against the text `self` started from.
  pub fn merge(self, next: PendingEdit) -> PendingEdit {
    let start = self.start.min(next.start);
    let end = self.new_end.max(next.old_end);
    PendingEdit {
      start,
      old_end: end - self.new_end + self.old_end,
      new_end: end - next.old_end + next.new_end,
    }
  }

  pub fn to_input_edit(&self, old_text: &TextBuffer, new_text: &TextBuffer) -> InputEdit {
    InputEdit {
      start_byte:       self.start,
      old_end_byte:     self.old_end,
      new_end_byte:     self.new_end,
      start_position:   point(old_text.position_from_offset(self.start)),
      old_end_position: point(old_text.position_from_offset(self.old_end)),
      new_end_position: point(new_text.position_from_offset(self.new_end)),
    }
  }
}

fn point(pos: Position) -> Point {
  Point::new(pos.line as usize, pos.character as usize)
}

/// Apply `change` to `text` and return the byte edit it performed.
pub fn apply_change(text: &mut TextBuffer, change: &Change) -> Result<PendingEdit, BufferError> {
  let start = text.checked_offset(change.old_range.start)?;
  let old_end = text.checked_offset(change.old_range.end)?;
  if old_end < start {
    return Err(BufferError::PositionOutOfRange(change.old_range.end));
  }
  text.remove_range(start, old_end)?;
  text.insert_at(start, &change.new_text)?;
  Ok(PendingEdit::new(start, old_end, start + change.new_text.len()))
}
