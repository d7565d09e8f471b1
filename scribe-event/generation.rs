//! Tokens for recognising stale delayed work.
//!
//! A background task captures a [`GenerationToken`] when it is scheduled and
//! presents it back when it completes. The owner remembers the token it
//! expects and drops any completion carrying another one. Tokens come from a
//! single monotonic counter, so a token is never handed out twice, even after
//! the work it guarded was cancelled.

use std::sync::{
  Arc,
  atomic::{
    AtomicU64,
    Ordering,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationToken(u64);

impl GenerationToken {
  pub fn get(self) -> u64 {
    self.0
  }
}

/// Shared token counter. Clones hand out tokens from the same sequence.
#[derive(Debug, Clone, Default)]
pub struct Generation {
  current: Arc<AtomicU64>,
}

impl Generation {
  pub fn new() -> Self {
    Self::default()
  }

  /// Bump the generation and return the new token.
  pub fn advance(&self) -> GenerationToken {
    GenerationToken(self.current.fetch_add(1, Ordering::AcqRel) + 1)
  }
}
