//! Scheduler abstraction used by the time based operators.
//!
//! A [`Scheduler`] runs actions now or at a later point of its own clock and
//! hands back a [`TaskHandle`] for every deferred action. Cancelling the
//! handle guarantees the action never runs, even if the scheduler already
//! dequeued it.
//!
//! # Available Schedulers
//!
//! | Scheduler | Clock | Use |
//! |-----------|-------|-----|
//! | [`ImmediateScheduler`] | wall clock | runs every action inline, ignoring delays |
//! | [`VirtualTimeScheduler`] | virtual `Duration` | deterministic tests |
//! | `TokioScheduler` | `tokio::time::Instant` | production, behind `tokio-scheduler` |

use std::{
  fmt::Debug,
  ops::Add,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

pub use std::time::Duration;

use crate::subscription::Cancellable;

mod immediate;
#[cfg(feature = "tokio-scheduler")]
mod tokio_scheduler;
mod virtual_time;

pub use immediate::ImmediateScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use tokio_scheduler::TokioScheduler;
pub use virtual_time::{ScheduleEvent, VirtualTimeScheduler};

pub trait Scheduler: Clone + Send + Sync + 'static {
  type Time: Copy + Ord + Add<Duration, Output = Self::Time> + Debug + Send + Sync + 'static;

  fn now(&self) -> Self::Time;

  /// The smallest tolerance the scheduler honors.
  fn minimum_tolerance(&self) -> Duration;

  /// Runs `action` as soon as possible.
  ///
  /// Never runs the action before returning to the caller unless the
  /// scheduler is documented to run inline.
  fn schedule<F>(&self, action: F)
  where
    F: FnOnce() + Send + 'static;

  /// Runs `action` once at `date`.
  fn schedule_after<F>(&self, date: Self::Time, tolerance: Duration, action: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static;

  /// Runs `action` at `date` and then every `interval` until the returned
  /// handle is cancelled.
  fn schedule_repeating<F>(
    &self, date: Self::Time, interval: Duration, tolerance: Duration, action: F,
  ) -> TaskHandle
  where
    F: FnMut() + Send + 'static;
}

// ==================== TaskHandle ====================

/// Cancellation token of a deferred action.
///
/// Clones share the same flag.
#[derive(Clone, Default)]
pub struct TaskHandle(Arc<AtomicBool>);

impl TaskHandle {
  pub fn new() -> Self { Self::default() }

  /// A handle for an action that already ran to completion.
  pub fn finished() -> Self { TaskHandle(Arc::new(AtomicBool::new(true))) }

  #[inline]
  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Acquire) }
}

impl Cancellable for TaskHandle {
  #[inline]
  fn cancel(&self) { self.0.store(true, Ordering::Release) }
}

impl Debug for TaskHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskHandle")
      .field("is_cancelled", &self.is_cancelled())
      .finish()
  }
}
