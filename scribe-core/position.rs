use serde::{
  Deserialize,
  Serialize,
};

/// A point in a text buffer: 0-based line and a 0-based byte offset within
/// that line.
///
/// Ordering is lexicographic over `(line, character)`, which the derive
/// provides because of the field order.
#[derive(
  Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
  pub line:      u32,
  pub character: u32,
}

impl Position {
  pub const fn new(line: u32, character: u32) -> Self {
    Self { line, character }
  }

  pub const fn zero() -> Self {
    Self {
      line:      0,
      character: 0,
    }
  }

  /// Walk `text` starting from `self`, returning the position just past it.
  pub fn traverse(self, text: &str) -> Self {
    let Self {
      mut line,
      mut character,
    } = self;

    for (idx, segment) in text.split('\n').enumerate() {
      if idx == 0 {
        character = character.saturating_add(segment.len() as u32);
      } else {
        line = line.saturating_add(1);
        character = segment.len() as u32;
      }
    }

    Self { line, character }
  }
}

impl From<(u32, u32)> for Position {
  fn from(value: (u32, u32)) -> Self {
    Position::new(value.0, value.1)
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
  pub start: Position,
  pub end:   Position,
}

impl TextRange {
  pub const fn new(start: Position, end: Position) -> Self {
    Self { start, end }
  }

  pub const fn point(pos: Position) -> Self {
    Self {
      start: pos,
      end:   pos,
    }
  }

  pub fn valid(&self) -> bool {
    self.start <= self.end
  }

  pub fn empty(&self) -> bool {
    self.start == self.end
  }

  /// Half-open containment: `end` itself is outside a non-empty range.
  pub fn contains(&self, pos: Position) -> bool {
    self.start <= pos && pos < self.end
  }
}
