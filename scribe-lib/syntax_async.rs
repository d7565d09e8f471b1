//! Debounced parse scheduling.
//!
//! Edits call [`ParseScheduler::schedule`]; each call restarts the document's
//! quiet-period timer. When a timer fires, a [`ParseTick`] is sent over a
//! channel that the owning thread drains with [`ParseScheduler::drain`].
//! Parsing itself always happens on the owning thread, so the parse engine
//! and document never cross threads.
//!
//! Every tick carries the token handed out when it was scheduled. Tokens come
//! from one scheduler-wide generation, so no two schedules ever share one,
//! even across a cancel. `drain` only honors a tick whose token is the one
//! its document is still waiting for: a timer that fired just before a newer
//! edit (or after the document was cancelled) never triggers a parse.

use std::{
  collections::HashMap,
  time::Duration,
};

use scribe_core::DocumentId;
use scribe_event::{
  DelayedTask,
  Generation,
  GenerationToken,
};
use tokio::{
  runtime::Handle,
  sync::mpsc::{
    UnboundedReceiver,
    UnboundedSender,
    error::TryRecvError,
    unbounded_channel,
  },
};
use tracing::trace;

/// Quiet period after the last edit before a reparse.
pub const DEFAULT_PARSE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseTick {
  pub document:   DocumentId,
  pub generation: GenerationToken,
}

struct PendingParse {
  expected: GenerationToken,
  task:     Option<DelayedTask>,
}

pub struct ParseScheduler {
  runtime:    Handle,
  delay:      Duration,
  generation: Generation,
  tx:         UnboundedSender<ParseTick>,
  rx:         UnboundedReceiver<ParseTick>,
  pending:    HashMap<DocumentId, PendingParse>,
}

impl ParseScheduler {
  pub fn new(runtime: Handle) -> Self {
    Self::with_delay(runtime, DEFAULT_PARSE_DELAY)
  }

  pub fn with_delay(runtime: Handle, delay: Duration) -> Self {
    let (tx, rx) = unbounded_channel();
    Self {
      runtime,
      delay,
      generation: Generation::new(),
      tx,
      rx,
      pending: HashMap::new(),
    }
  }

  pub fn delay(&self) -> Duration {
    self.delay
  }

  /// (Re)start the quiet-period timer for `document`.
  pub fn schedule(&mut self, document: DocumentId) -> GenerationToken {
    let generation = self.generation.advance();
    if let Some(mut task) = self.pending.remove(&document).and_then(|pending| pending.task) {
      task.cancel();
    }
    let tx = self.tx.clone();
    let task = DelayedTask::spawn(&self.runtime, self.delay, move || {
      async move {
        // The receiver only goes away together with the scheduler.
        let _ = tx.send(ParseTick {
          document,
          generation,
        });
      }
    });
    self.pending.insert(document, PendingParse {
      expected: generation,
      task:     Some(task),
    });
    trace!(%document, generation = generation.get(), "parse scheduled");
    generation
  }

  /// Drop any scheduled parse for `document`. Ticks already in flight are
  /// discarded by the next [`drain`](Self::drain).
  pub fn cancel(&mut self, document: DocumentId) {
    if let Some(mut pending) = self.pending.remove(&document) {
      if let Some(mut task) = pending.task.take() {
        task.cancel();
      }
      trace!(%document, "parse cancelled");
    }
  }

  pub fn is_scheduled(&self, document: DocumentId) -> bool {
    self
      .pending
      .get(&document)
      .and_then(|pending| pending.task.as_ref())
      .is_some_and(|task| !task.is_finished())
  }

  pub fn is_current(&self, tick: &ParseTick) -> bool {
    self
      .pending
      .get(&tick.document)
      .is_some_and(|pending| pending.expected == tick.generation)
  }

  /// Collect the ticks that are due, oldest first, with stale ones dropped
  /// and at most one tick per document.
  pub fn drain(&mut self) -> Vec<DocumentId> {
    let mut due = Vec::new();
    loop {
      match self.rx.try_recv() {
        Ok(tick) => {
          if !self.is_current(&tick) {
            trace!(document = %tick.document, "dropping stale parse tick");
            continue;
          }
          if let Some(pending) = self.pending.get_mut(&tick.document) {
            pending.task = None;
          }
          if !due.contains(&tick.document) {
            due.push(tick.document);
          }
        },
        Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
      }
    }
    due
  }

  /// Wait for the next current tick. Used by callers that have nothing else
  /// to do until a parse is due.
  pub async fn next_due(&mut self) -> Option<DocumentId> {
    while let Some(tick) = self.rx.recv().await {
      if self.is_current(&tick) {
        if let Some(pending) = self.pending.get_mut(&tick.document) {
          pending.task = None;
        }
        return Some(tick.document);
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use std::num::NonZeroUsize;

  use super::*;

  fn doc(id: usize) -> DocumentId {
    DocumentId::new(NonZeroUsize::new(id).unwrap())
  }

  async fn settle() {
    for _ in 0..4 {
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test(start_paused = true)]
  async fn rapid_edits_produce_one_tick() {
    let mut scheduler = ParseScheduler::new(Handle::current());
    for _ in 0..10 {
      scheduler.schedule(doc(1));
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(scheduler.drain().is_empty());
    assert!(scheduler.is_scheduled(doc(1)));

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    assert_eq!(scheduler.drain(), vec![doc(1)]);
    assert!(!scheduler.is_scheduled(doc(1)));
    assert!(scheduler.drain().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn documents_are_independent() {
    let mut scheduler = ParseScheduler::with_delay(Handle::current(), Duration::from_millis(20));
    scheduler.schedule(doc(1));
    scheduler.schedule(doc(2));
    tokio::time::sleep(Duration::from_millis(30)).await;
    settle().await;
    let mut due = scheduler.drain();
    due.sort();
    assert_eq!(due, vec![doc(1), doc(2)]);
  }

  #[tokio::test(start_paused = true)]
  async fn cancelled_document_never_fires() {
    let mut scheduler = ParseScheduler::new(Handle::current());
    scheduler.schedule(doc(1));
    scheduler.cancel(doc(1));
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    assert!(scheduler.drain().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn tick_delivered_before_reschedule_is_stale() {
    let mut scheduler = ParseScheduler::new(Handle::current());
    let first = scheduler.schedule(doc(1));
    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    // The tick for `first` is sitting in the channel now.
    let second = scheduler.schedule(doc(1));
    assert_ne!(first, second);
    assert!(!scheduler.is_current(&ParseTick {
      document:   doc(1),
      generation: first,
    }));
    assert!(scheduler.drain().is_empty());

    let due = tokio::time::timeout(Duration::from_secs(1), scheduler.next_due())
      .await
      .unwrap();
    assert_eq!(due, Some(doc(1)));
  }

  #[tokio::test(start_paused = true)]
  async fn tick_queued_before_cancel_stays_stale_after_reschedule() {
    let mut scheduler = ParseScheduler::new(Handle::current());
    let first = scheduler.schedule(doc(1));
    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    scheduler.cancel(doc(1));
    let second = scheduler.schedule(doc(1));
    assert_ne!(first, second);
    assert!(scheduler.drain().is_empty());
    assert!(scheduler.is_scheduled(doc(1)));

    tokio::time::sleep(Duration::from_millis(60)).await;
    settle().await;
    assert_eq!(scheduler.drain(), vec![doc(1)]);
  }
}
