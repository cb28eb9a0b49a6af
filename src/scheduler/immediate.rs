use std::time::Instant;

use super::{Duration, Scheduler, TaskHandle};

/// Runs every action inline on the calling thread.
///
/// Delays are ignored and repeating actions run exactly once.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
  type Time = Instant;

  fn now(&self) -> Instant { Instant::now() }

  fn minimum_tolerance(&self) -> Duration { Duration::ZERO }

  fn schedule<F>(&self, action: F)
  where
    F: FnOnce() + Send + 'static,
  {
    action()
  }

  fn schedule_after<F>(&self, _date: Instant, _tolerance: Duration, action: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static,
  {
    action();
    TaskHandle::finished()
  }

  fn schedule_repeating<F>(
    &self, _date: Instant, _interval: Duration, _tolerance: Duration, mut action: F,
  ) -> TaskHandle
  where
    F: FnMut() + Send + 'static,
  {
    action();
    TaskHandle::finished()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  #[recombine_macro::test]
  fn runs_inline() {
    let hits = Arc::new(AtomicUsize::new(0));
    let scheduler = ImmediateScheduler;
    let h = hits.clone();
    scheduler.schedule(move || {
      h.fetch_add(1, Ordering::SeqCst);
    });
    let h = hits.clone();
    let handle = scheduler.schedule_after(
      scheduler.now() + Duration::from_secs(3600),
      scheduler.minimum_tolerance(),
      move || {
        h.fetch_add(1, Ordering::SeqCst);
      },
    );
    let h = hits.clone();
    scheduler.schedule_repeating(scheduler.now(), Duration::from_secs(1), Duration::ZERO, move || {
      h.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(handle.is_cancelled());
  }
}
