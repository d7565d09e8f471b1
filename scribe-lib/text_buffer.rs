//! Contiguous text storage with byte offset <-> (line, character) mapping.
//!
//! Line boundaries are cached as the byte offset of every line terminator,
//! plus a synthetic final boundary at `len()` when the text does not end in a
//! newline, so `line_count() == line_ends.len()`. The cache is dropped by
//! every mutation and rebuilt on the next read that needs it.
//!
//! Reads clamp: a character past the end of its line resolves to the end of
//! that line and a line past the end yields an empty view. Mutations are
//! strict and report [`BufferError`] instead.

use std::sync::OnceLock;

use scribe_core::{
  ErrorCode,
  Position,
  TextRange,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
  #[error("offset {offset} is out of range (len {len})")]
  OffsetOutOfRange { offset: usize, len: usize },
  #[error("invalid range {start}..{end} (len {len})")]
  InvalidRange { start: usize, end: usize, len: usize },
  #[error("position {}:{} is out of range", .0.line, .0.character)]
  PositionOutOfRange(Position),
  #[error("offset {0} is not on a character boundary")]
  NotCharBoundary(usize),
}

impl BufferError {
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::NotCharBoundary(_) => ErrorCode::InvalidArgument,
      _ => ErrorCode::OutOfRange,
    }
  }
}

pub type Result<T> = std::result::Result<T, BufferError>;

#[derive(Debug, Default)]
pub struct TextBuffer {
  text:      String,
  line_ends: OnceLock<Vec<usize>>,
}

impl Clone for TextBuffer {
  fn clone(&self) -> Self {
    Self::new(self.text.clone())
  }
}

impl PartialEq for TextBuffer {
  fn eq(&self, other: &Self) -> bool {
    self.text == other.text
  }
}

impl Eq for TextBuffer {}

impl From<&str> for TextBuffer {
  fn from(text: &str) -> Self {
    Self::new(text)
  }
}

impl From<String> for TextBuffer {
  fn from(text: String) -> Self {
    Self::new(text)
  }
}

impl TextBuffer {
  pub fn new(text: impl Into<String>) -> Self {
    Self {
      text:      text.into(),
      line_ends: OnceLock::new(),
    }
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn len(&self) -> usize {
    self.text.len()
  }

  pub fn is_empty(&self) -> bool {
    self.text.is_empty()
  }

  fn line_ends(&self) -> &[usize] {
    self.line_ends.get_or_init(|| compute_line_ends(&self.text))
  }

  fn invalidate(&mut self) {
    self.line_ends = OnceLock::new();
  }

  pub fn line_count(&self) -> u32 {
    self.line_ends().len() as u32
  }

  /// Content of line `line` without its terminator. Empty past the end.
  pub fn line(&self, line: u32) -> &str {
    let ends = self.line_ends();
    let Some(&end) = ends.get(line as usize) else {
      return "";
    };
    let start = self.line_start_offset(line);
    &self.text[start..end]
  }

  pub fn line_start_offset(&self, line: u32) -> usize {
    if line == 0 {
      return 0;
    }
    let ends = self.line_ends();
    match ends.get(line as usize - 1) {
      Some(&prev_end) => (prev_end + 1).min(self.text.len()),
      None => self.text.len(),
    }
  }

  /// Offset of the terminator of `line` (or `len()` for the last line).
  pub fn line_end_offset(&self, line: u32) -> usize {
    self
      .line_ends()
      .get(line as usize)
      .copied()
      .unwrap_or(self.text.len())
  }

  /// Map a byte offset to a position. Offsets past the end are clamped.
  ///
  /// An offset that sits right after a terminator belongs to the following
  /// line; the terminator itself is the last character of its line.
  pub fn position_from_offset(&self, offset: usize) -> Position {
    let offset = offset.min(self.text.len());
    let ends = self.line_ends();
    let line = ends.partition_point(|&end| end < offset);
    let start = if line == 0 { 0 } else { ends[line - 1] + 1 };
    Position::new(line as u32, (offset - start) as u32)
  }

  /// Map a position to a byte offset, clamping the line to the buffer and the
  /// character to the end of its line.
  pub fn offset_from_position(&self, pos: Position) -> usize {
    let line = pos.line.min(self.line_count());
    let start = self.line_start_offset(line);
    let len = self.line(line).len();
    (start + (pos.character as usize).min(len)).min(self.text.len())
  }

  /// Strict variant of [`Self::offset_from_position`] for mutations.
  pub fn checked_offset(&self, pos: Position) -> Result<usize> {
    let lines = self.line_count();
    let addressable = pos.line < lines || (pos.line == lines && self.ends_open());
    if !addressable || pos.character as usize > self.line(pos.line).len() {
      return Err(BufferError::PositionOutOfRange(pos));
    }
    let offset = self.line_start_offset(pos.line) + pos.character as usize;
    if !self.text.is_char_boundary(offset) {
      return Err(BufferError::NotCharBoundary(offset));
    }
    Ok(offset)
  }

  /// Whether an empty line follows the last cached boundary.
  fn ends_open(&self) -> bool {
    self.text.is_empty() || self.text.ends_with('\n')
  }

  pub fn end_position(&self) -> Position {
    self.position_from_offset(self.text.len())
  }

  pub fn full_range(&self) -> TextRange {
    TextRange::new(Position::zero(), self.end_position())
  }

  /// Text covered by `range`, clamped like every other read.
  pub fn slice(&self, range: TextRange) -> &str {
    let start = self.offset_from_position(range.start);
    let end = self.offset_from_position(range.end).max(start);
    self.text.get(start..end).unwrap_or("")
  }

  pub fn insert_at(&mut self, offset: usize, text: &str) -> Result<()> {
    if offset > self.text.len() {
      return Err(BufferError::OffsetOutOfRange {
        offset,
        len: self.text.len(),
      });
    }
    if !self.text.is_char_boundary(offset) {
      return Err(BufferError::NotCharBoundary(offset));
    }
    if text.is_empty() {
      return Ok(());
    }
    self.text.insert_str(offset, text);
    self.invalidate();
    Ok(())
  }

  /// Remove `start..end`, returning the removed text.
  pub fn remove_range(&mut self, start: usize, end: usize) -> Result<String> {
    let len = self.text.len();
    if start > end || end > len {
      return Err(BufferError::InvalidRange { start, end, len });
    }
    for offset in [start, end] {
      if !self.text.is_char_boundary(offset) {
        return Err(BufferError::NotCharBoundary(offset));
      }
    }
    if start == end {
      return Ok(String::new());
    }
    let removed: String = self.text.drain(start..end).collect();
    self.invalidate();
    Ok(removed)
  }

  pub fn set_text(&mut self, text: impl Into<String>) {
    self.text = text.into();
    self.invalidate();
  }

  /// Insert at a position and return the range now covered by `text`.
  pub fn insert_at_position(&mut self, pos: Position, text: &str) -> Result<TextRange> {
    let offset = self.checked_offset(pos)?;
    self.insert_at(offset, text)?;
    Ok(TextRange::new(pos, pos.traverse(text)))
  }

  pub fn remove_text(&mut self, range: TextRange) -> Result<String> {
    if !range.valid() {
      return Err(BufferError::PositionOutOfRange(range.end));
    }
    let start = self.checked_offset(range.start)?;
    let end = self.checked_offset(range.end)?;
    self.remove_range(start, end)
  }
}

fn compute_line_ends(text: &str) -> Vec<usize> {
  let mut ends: Vec<usize> = text
    .bytes()
    .enumerate()
    .filter_map(|(idx, byte)| (byte == b'\n').then_some(idx))
    .collect();
  if !text.is_empty() && !text.ends_with('\n') {
    ends.push(text.len());
  }
  ends
}

#[cfg(test)]
mod tests {
  use quickcheck::quickcheck;

  use super::*;

  #[test]
  fn three_line_scenario() {
    let buffer = TextBuffer::new("line1\nline2\nline3");
    assert_eq!(buffer.line_count(), 3);
    assert_eq!(buffer.line(1), "line2");
    assert_eq!(buffer.position_from_offset(7), Position::new(1, 1));
    assert_eq!(buffer.offset_from_position(Position::new(1, 1)), 7);
  }

  #[test]
  fn line_count_edges() {
    assert_eq!(TextBuffer::new("").line_count(), 0);
    assert_eq!(TextBuffer::new("a").line_count(), 1);
    assert_eq!(TextBuffer::new("a\n").line_count(), 1);
    assert_eq!(TextBuffer::new("a\nb").line_count(), 2);
    assert_eq!(TextBuffer::new("\n\n").line_count(), 2);
  }

  #[test]
  fn boundary_offsets_belong_to_the_following_line() {
    let buffer = TextBuffer::new("ab\ncd\n");
    assert_eq!(buffer.position_from_offset(2), Position::new(0, 2));
    assert_eq!(buffer.position_from_offset(3), Position::new(1, 0));
    assert_eq!(buffer.position_from_offset(6), Position::new(2, 0));
    assert_eq!(buffer.line_start_offset(1), 3);
    assert_eq!(buffer.line_end_offset(1), 5);
  }

  #[test]
  fn reads_clamp() {
    let buffer = TextBuffer::new("short\nlonger line");
    assert_eq!(buffer.offset_from_position(Position::new(0, 99)), 5);
    assert_eq!(buffer.offset_from_position(Position::new(42, 3)), buffer.len());
    assert_eq!(buffer.line(42), "");
    assert_eq!(buffer.position_from_offset(1000), buffer.end_position());
    assert_eq!(
      buffer.slice(TextRange::new(Position::new(1, 0), Position::new(9, 0))),
      "longer line"
    );
  }

  #[test]
  fn mutations_fail_out_of_range() {
    let mut buffer = TextBuffer::new("abc");
    assert_eq!(
      buffer.insert_at(4, "x"),
      Err(BufferError::OffsetOutOfRange { offset: 4, len: 3 })
    );
    assert!(matches!(
      buffer.remove_range(2, 1),
      Err(BufferError::InvalidRange { .. })
    ));
    let err = buffer
      .insert_at_position(Position::new(0, 4), "x")
      .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OutOfRange);
    assert!(buffer.insert_at_position(Position::new(1, 0), "x").is_err());
    assert_eq!(buffer.text(), "abc");
  }

  #[test]
  fn mutation_inside_a_code_point_is_rejected() {
    let mut buffer = TextBuffer::new("é");
    let err = buffer.insert_at(1, "x").unwrap_err();
    assert_eq!(err, BufferError::NotCharBoundary(1));
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
  }

  #[test]
  fn cache_is_rebuilt_after_mutation() {
    let mut buffer = TextBuffer::new("a\nb");
    assert_eq!(buffer.line_count(), 2);
    buffer.insert_at(1, "\nz").unwrap();
    assert_eq!(buffer.line_count(), 3);
    assert_eq!(buffer.line(1), "z");
    buffer.remove_range(0, 4).unwrap();
    assert_eq!(buffer.text(), "b");
    assert_eq!(buffer.line_count(), 1);
    buffer.set_text("x\ny\n");
    assert_eq!(buffer.line(1), "y");
  }

  #[test]
  fn insert_at_open_last_line() {
    let mut buffer = TextBuffer::new("a\n");
    let range = buffer
      .insert_at_position(Position::new(1, 0), "b\nc")
      .unwrap();
    assert_eq!(range, TextRange::new(Position::new(1, 0), Position::new(2, 1)));
    assert_eq!(buffer.text(), "a\nb\nc");
    assert_eq!(buffer.remove_text(range).unwrap(), "b\nc");
    assert_eq!(buffer.text(), "a\n");
  }

  fn char_boundary_at_or_before(text: &str, mut offset: usize) -> usize {
    offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
      offset -= 1;
    }
    offset
  }

  quickcheck! {
    fn offset_position_roundtrip(text: String, offset: usize) -> bool {
      let buffer = TextBuffer::new(text);
      let offset = offset % (buffer.len() + 1);
      buffer.offset_from_position(buffer.position_from_offset(offset)) == offset
    }

    fn insert_then_remove_restores(text: String, insert: String, offset: usize) -> bool {
      let mut buffer = TextBuffer::new(text.clone());
      let offset = char_boundary_at_or_before(&text, offset % (text.len() + 1));
      let pos = buffer.position_from_offset(offset);
      let Ok(range) = buffer.insert_at_position(pos, &insert) else {
        return false;
      };
      if buffer.offset_from_position(range.end) != offset + insert.len() {
        return false;
      }
      buffer.remove_text(range).as_deref() == Ok(insert.as_str()) && buffer.text() == text
    }
  }
}
