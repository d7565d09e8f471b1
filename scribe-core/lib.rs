//! Shared primitives for the scribe editor core: text coordinates, the error
//! taxonomy every layer reports into, the file I/O collaborator and document
//! identities.

pub mod error;
pub mod fs;
pub mod position;
pub mod uri;

use std::{
  num::NonZeroUsize,
  sync::atomic::{
    AtomicUsize,
    Ordering,
  },
};

pub use error::{
  CoreError,
  ErrorCode,
};
pub use position::{
  Position,
  TextRange,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(NonZeroUsize);

impl DocumentId {
  pub const fn new(id: NonZeroUsize) -> Self {
    Self(id)
  }

  pub const fn get(self) -> NonZeroUsize {
    self.0
  }
}

impl From<NonZeroUsize> for DocumentId {
  fn from(value: NonZeroUsize) -> Self {
    Self::new(value)
  }
}

impl std::fmt::Display for DocumentId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "doc#{}", self.0)
  }
}

/// Hands out document ids starting at 1. Ids are never reused.
#[derive(Debug)]
pub struct DocumentIdAllocator {
  next: AtomicUsize,
}

impl Default for DocumentIdAllocator {
  fn default() -> Self {
    Self {
      next: AtomicUsize::new(1),
    }
  }
}

impl DocumentIdAllocator {
  pub fn next(&self) -> DocumentId {
    let raw = self.next.fetch_add(1, Ordering::Relaxed).max(1);
    // `raw` is at least 1 so the fallback is never taken.
    DocumentId(NonZeroUsize::new(raw).unwrap_or(NonZeroUsize::MIN))
  }
}
