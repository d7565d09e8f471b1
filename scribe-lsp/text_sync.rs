//! Document synchronization payloads and coordinate conversion.
//!
//! Buffers count columns in bytes; the protocol counts them in UTF-16 code
//! units. Conversions clamp to the line, so a position from a server that is
//! a little behind never lands in the middle of a character.

use scribe_core::{
  Position,
  TextRange,
};
use scribe_lib::text_buffer::TextBuffer;
use serde_json::{
  Value,
  json,
};

pub fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
  json!({
    "textDocument": {
      "uri": uri,
      "languageId": language_id,
      "version": version,
      "text": text,
    }
  })
}

/// Full-document sync: the whole text is sent on every change.
pub fn did_change_params(uri: &str, version: i32, text: &str) -> Value {
  json!({
    "textDocument": {
      "uri": uri,
      "version": version,
    },
    "contentChanges": [{ "text": text }],
  })
}

pub fn did_save_params(uri: &str, text: Option<&str>) -> Value {
  match text {
    Some(text) => {
      json!({
        "textDocument": { "uri": uri },
        "text": text,
      })
    },
    None => {
      json!({
        "textDocument": { "uri": uri },
      })
    },
  }
}

pub fn did_close_params(uri: &str) -> Value {
  json!({
    "textDocument": {
      "uri": uri,
    }
  })
}

/// Byte column to UTF-16 column.
pub fn position_to_lsp(text: &TextBuffer, pos: Position) -> Position {
  if pos.line >= text.line_count() {
    return pos;
  }
  let line = text.line(pos.line);
  let mut byte_col = (pos.character as usize).min(line.len());
  while !line.is_char_boundary(byte_col) {
    byte_col -= 1;
  }
  let utf16 = line[..byte_col]
    .chars()
    .map(|ch| ch.len_utf16() as u32)
    .sum();
  Position::new(pos.line, utf16)
}

/// UTF-16 column to byte column.
pub fn position_from_lsp(text: &TextBuffer, pos: Position) -> Position {
  if pos.line >= text.line_count() {
    return text.end_position();
  }
  let line = text.line(pos.line);
  let mut utf16_count = 0u32;
  let mut byte_col = 0usize;
  for ch in line.chars() {
    if ch == '\n' || ch == '\r' {
      break;
    }
    let next = utf16_count.saturating_add(ch.len_utf16() as u32);
    if next > pos.character {
      break;
    }
    utf16_count = next;
    byte_col += ch.len_utf8();
  }
  Position::new(pos.line, byte_col as u32)
}

pub fn range_from_lsp(text: &TextBuffer, range: TextRange) -> TextRange {
  TextRange::new(
    position_from_lsp(text, range.start),
    position_from_lsp(text, range.end),
  )
}
