//! Cancellable delayed work on a tokio runtime.

use std::{
  future::Future,
  time::Duration,
};

use tokio::{
  runtime::Handle,
  task::JoinHandle,
};

/// A one-shot callback that fires after a delay unless cancelled first.
///
/// Dropping the task cancels it.
#[derive(Debug)]
pub struct DelayedTask {
  handle: Option<JoinHandle<()>>,
}

impl DelayedTask {
  pub fn spawn<F, Fut>(runtime: &Handle, delay: Duration, callback: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let handle = runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      callback().await;
    });
    Self {
      handle: Some(handle),
    }
  }

  pub fn cancel(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
  }

  pub fn is_finished(&self) -> bool {
    self
      .handle
      .as_ref()
      .is_none_or(|handle| handle.is_finished())
  }
}

impl Drop for DelayedTask {
  fn drop(&mut self) {
    self.cancel();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{
      AtomicUsize,
      Ordering,
    },
  };

  use super::*;

  #[tokio::test(start_paused = true)]
  async fn delayed_task_can_be_cancelled() {
    let hits = Arc::new(AtomicUsize::new(0));
    let handle = Handle::current();

    let counter = hits.clone();
    let mut cancelled = DelayedTask::spawn(&handle, Duration::from_millis(10), move || {
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
      }
    });
    cancelled.cancel();

    let counter = hits.clone();
    let _kept = DelayedTask::spawn(&handle, Duration::from_millis(10), move || {
      async move {
        counter.fetch_add(10, Ordering::SeqCst);
      }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 10);
  }
}
