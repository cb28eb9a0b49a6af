use tokio::{runtime::Handle, time::Instant};

use super::{Duration, Scheduler, TaskHandle};

/// Schedules actions as tasks on a tokio runtime.
///
/// Cancelled actions are skipped when their task wakes up.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
  handle: Handle,
}

impl TokioScheduler {
  pub fn new(handle: Handle) -> Self { Self { handle } }

  /// Binds to the runtime of the calling context.
  ///
  /// # Panics
  ///
  /// Panics when called outside of a tokio runtime.
  pub fn current() -> Self { Self::new(Handle::current()) }
}

impl Scheduler for TokioScheduler {
  type Time = Instant;

  fn now(&self) -> Instant { Instant::now() }

  fn minimum_tolerance(&self) -> Duration { Duration::from_millis(1) }

  fn schedule<F>(&self, action: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.handle.spawn(async move { action() });
  }

  fn schedule_after<F>(&self, date: Instant, _tolerance: Duration, action: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static,
  {
    let task = TaskHandle::new();
    let guard = task.clone();
    self.handle.spawn(async move {
      tokio::time::sleep_until(date).await;
      if !guard.is_cancelled() {
        action()
      }
    });
    task
  }

  fn schedule_repeating<F>(
    &self, date: Instant, interval: Duration, _tolerance: Duration, mut action: F,
  ) -> TaskHandle
  where
    F: FnMut() + Send + 'static,
  {
    let task = TaskHandle::new();
    let guard = task.clone();
    self.handle.spawn(async move {
      let mut next = date;
      loop {
        tokio::time::sleep_until(next).await;
        if guard.is_cancelled() {
          break;
        }
        action();
        next += interval;
      }
    });
    task
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::subscription::Cancellable;
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  #[recombine_macro::test(local)]
  async fn delayed_action_fires_after_date() {
    tokio::time::pause();
    let scheduler = TokioScheduler::current();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    scheduler.schedule_after(scheduler.now() + Duration::from_millis(50), Duration::ZERO, move || {
      h.fetch_add(1, Ordering::SeqCst);
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[recombine_macro::test(local)]
  async fn cancelled_repeating_action_stops() {
    tokio::time::pause();
    let scheduler = TokioScheduler::current();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let handle = scheduler.schedule_repeating(
      scheduler.now() + Duration::from_millis(10),
      Duration::from_millis(10),
      Duration::ZERO,
      move || {
        h.fetch_add(1, Ordering::SeqCst);
      },
    );
    tokio::time::sleep(Duration::from_millis(35)).await;
    handle.cancel();
    let seen = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.load(Ordering::SeqCst), seen);
    assert!(seen >= 3);
  }
}
