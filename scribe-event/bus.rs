//! Bounded, per-type event queue with scoped subscriptions.
//!
//! Producers on any thread [`post`](EventBus::post) events; the owning thread
//! drains them with [`poll`](EventBus::poll), which runs every live handler in
//! post order. Dropping a [`Subscription`] removes its handler.
//!
//! Handlers run with no bus lock held, so a handler may subscribe, post or
//! drop subscriptions (its own included). A handler removed mid-poll sees no
//! further events; one added mid-poll starts with the next poll.

use std::{
  collections::VecDeque,
  sync::{
    Arc,
    Weak,
    atomic::{
      AtomicU64,
      Ordering,
    },
  },
};

use parking_lot::Mutex;
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 1024;

type Handler<E> = Box<dyn FnMut(&E) + Send>;

struct Inner<E> {
  capacity: usize,
  queue:    Mutex<VecDeque<E>>,
  handlers: Mutex<Vec<(u64, Handler<E>)>>,
  /// Ids unsubscribed while their handler was checked out by `poll`.
  removed:  Mutex<Vec<u64>>,
  next_id:  AtomicU64,
  dropped:  AtomicU64,
}

pub struct EventBus<E> {
  inner: Arc<Inner<E>>,
}

impl<E> Clone for EventBus<E> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<E: Send + 'static> Default for EventBus<E> {
  fn default() -> Self {
    Self::with_capacity(DEFAULT_CAPACITY)
  }
}

impl<E: Send + 'static> EventBus<E> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      inner: Arc::new(Inner {
        capacity: capacity.max(1),
        queue:    Mutex::new(VecDeque::new()),
        handlers: Mutex::new(Vec::new()),
        removed:  Mutex::new(Vec::new()),
        next_id:  AtomicU64::new(1),
        dropped:  AtomicU64::new(0),
      }),
    }
  }

  #[must_use = "the handler is removed as soon as the subscription is dropped"]
  pub fn subscribe(&self, handler: impl FnMut(&E) + Send + 'static) -> Subscription {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self.inner.handlers.lock().push((id, Box::new(handler)));
    let weak: Weak<Inner<E>> = Arc::downgrade(&self.inner);
    Subscription {
      unsubscribe: Some(Box::new(move || {
        if let Some(inner) = weak.upgrade() {
          let mut handlers = inner.handlers.lock();
          let before = handlers.len();
          handlers.retain(|(handler_id, _)| *handler_id != id);
          if handlers.len() == before {
            inner.removed.lock().push(id);
          }
        }
      })),
    }
  }

  /// Queue an event. When the queue is full the oldest event is discarded.
  pub fn post(&self, event: E) {
    let mut queue = self.inner.queue.lock();
    if queue.len() >= self.inner.capacity {
      queue.pop_front();
      let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
      trace!(dropped, "event bus full, discarded oldest event");
    }
    queue.push_back(event);
  }

  /// Deliver every queued event to the current subscribers. Returns the
  /// number of events drained.
  pub fn poll(&self) -> usize {
    let events: Vec<E> = self.inner.queue.lock().drain(..).collect();
    if events.is_empty() {
      return 0;
    }
    let mut active = std::mem::take(&mut *self.inner.handlers.lock());
    for event in &events {
      for (id, handler) in active.iter_mut() {
        if self.inner.removed.lock().contains(id) {
          continue;
        }
        handler(event);
      }
    }

    let removed = std::mem::take(&mut *self.inner.removed.lock());
    let mut handlers = self.inner.handlers.lock();
    active.retain(|(id, _)| !removed.contains(id));
    active.append(&mut handlers);
    *handlers = active;
    events.len()
  }

  pub fn pending(&self) -> usize {
    self.inner.queue.lock().len()
  }

  pub fn subscriber_count(&self) -> usize {
    self.inner.handlers.lock().len()
  }

  /// Events discarded because the queue was full.
  pub fn dropped(&self) -> u64 {
    self.inner.dropped.load(Ordering::Relaxed)
  }
}

/// Keeps an [`EventBus`] handler registered for as long as it lives.
pub struct Subscription {
  unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
  pub fn unsubscribe(mut self) {
    if let Some(unsubscribe) = self.unsubscribe.take() {
      unsubscribe();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(unsubscribe) = self.unsubscribe.take() {
      unsubscribe();
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.unsubscribe.is_some())
      .finish()
  }
}
