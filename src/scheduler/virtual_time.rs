//! Virtual time scheduler for deterministic testing of time based operators.
//!
//! Time only moves when told to. Actions due at the same instant run in the
//! order they were scheduled.
//!
//! ```rust
//! use recombine::scheduler::{Duration, Scheduler, VirtualTimeScheduler};
//!
//! let scheduler = VirtualTimeScheduler::new();
//! scheduler.schedule_after(
//!   scheduler.now() + Duration::from_millis(100),
//!   Duration::ZERO,
//!   || println!("fired"),
//! );
//! scheduler.advance(Duration::from_millis(100));
//! assert_eq!(scheduler.now(), Duration::from_millis(100));
//! ```
//!
//! Each instance owns its own clock and queue; clones share them.

use std::{
  cmp::{Ordering, Reverse},
  collections::BinaryHeap,
  sync::Arc,
};

use parking_lot::Mutex;

use super::{Duration, Scheduler, TaskHandle};

/// A scheduling call observed by a [`VirtualTimeScheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleEvent {
  Now { at: Duration },
  After { at: Duration, date: Duration },
  Repeating { at: Duration, date: Duration, interval: Duration },
}

// ==================== Internal State ====================

enum Action {
  Once(Box<dyn FnOnce() + Send>),
  Repeating { action: Box<dyn FnMut() + Send>, interval: Duration },
}

struct ScheduledTask {
  scheduled_time: Duration,
  task_id: usize,
  action: Action,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool {
    self.scheduled_time == other.scheduled_time && self.task_id == other.task_id
  }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .scheduled_time
      .cmp(&other.scheduled_time)
      .then_with(|| self.task_id.cmp(&other.task_id))
  }
}

#[derive(Default)]
struct VirtualTimeState {
  virtual_time: Duration,
  task_queue: BinaryHeap<Reverse<ScheduledTask>>,
  next_task_id: usize,
  history: Vec<ScheduleEvent>,
}

impl VirtualTimeState {
  fn push(&mut self, scheduled_time: Duration, action: Action, handle: TaskHandle) {
    let task_id = self.next_task_id;
    self.next_task_id += 1;
    // Nothing runs in the past.
    let scheduled_time = scheduled_time.max(self.virtual_time);
    self
      .task_queue
      .push(Reverse(ScheduledTask { scheduled_time, task_id, action, handle }));
  }
}

// ==================== VirtualTimeScheduler ====================

#[derive(Clone, Default)]
pub struct VirtualTimeScheduler {
  state: Arc<Mutex<VirtualTimeState>>,
}

impl VirtualTimeScheduler {
  pub fn new() -> Self { Self::default() }

  /// Number of actions still queued, cancelled ones included.
  pub fn pending_count(&self) -> usize { self.state.lock().task_queue.len() }

  pub fn is_empty(&self) -> bool { self.state.lock().task_queue.is_empty() }

  /// Every scheduling call made against this scheduler so far.
  pub fn history(&self) -> Vec<ScheduleEvent> { self.state.lock().history.clone() }

  /// Advances the clock by `duration`, running every action due on the way.
  pub fn advance(&self, duration: Duration) {
    let target_time = self.state.lock().virtual_time + duration;
    self.run_until(target_time);
  }

  /// Runs every action due at or before `target_time`, then parks the clock
  /// there.
  pub fn run_until(&self, target_time: Duration) {
    self.execute_tasks_until(Some(target_time));
    let mut state = self.state.lock();
    state.virtual_time = state.virtual_time.max(target_time);
  }

  /// Runs until no action is left. Repeating actions must be cancelled by
  /// someone for this to return.
  pub fn flush(&self) { self.execute_tasks_until(None) }

  fn execute_tasks_until(&self, target_time: Option<Duration>) {
    loop {
      let task = {
        let mut state = self.state.lock();
        let should_stop = state
          .task_queue
          .peek()
          .map_or(true, |Reverse(peek)| target_time.is_some_and(|limit| peek.scheduled_time > limit));
        if should_stop {
          return;
        }
        let Some(Reverse(task)) = state.task_queue.pop() else { return };
        state.virtual_time = state.virtual_time.max(task.scheduled_time);
        task
      };

      if task.handle.is_cancelled() {
        continue;
      }

      match task.action {
        Action::Once(action) => action(),
        Action::Repeating { mut action, interval } => {
          action();
          if !task.handle.is_cancelled() {
            let next = task.scheduled_time + interval;
            self
              .state
              .lock()
              .push(next, Action::Repeating { action, interval }, task.handle);
          }
        }
      }
    }
  }
}

impl Scheduler for VirtualTimeScheduler {
  type Time = Duration;

  fn now(&self) -> Duration { self.state.lock().virtual_time }

  fn minimum_tolerance(&self) -> Duration { Duration::ZERO }

  fn schedule<F>(&self, action: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let mut state = self.state.lock();
    let at = state.virtual_time;
    state.history.push(ScheduleEvent::Now { at });
    state.push(at, Action::Once(Box::new(action)), TaskHandle::new());
  }

  fn schedule_after<F>(&self, date: Duration, _tolerance: Duration, action: F) -> TaskHandle
  where
    F: FnOnce() + Send + 'static,
  {
    let handle = TaskHandle::new();
    let mut state = self.state.lock();
    let at = state.virtual_time;
    state.history.push(ScheduleEvent::After { at, date });
    state.push(date, Action::Once(Box::new(action)), handle.clone());
    handle
  }

  fn schedule_repeating<F>(
    &self, date: Duration, interval: Duration, _tolerance: Duration, action: F,
  ) -> TaskHandle
  where
    F: FnMut() + Send + 'static,
  {
    let handle = TaskHandle::new();
    let mut state = self.state.lock();
    let at = state.virtual_time;
    state.history.push(ScheduleEvent::Repeating { at, date, interval });
    state.push(date, Action::Repeating { action: Box::new(action), interval }, handle.clone());
    handle
  }
}

impl std::fmt::Debug for VirtualTimeScheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.state.lock();
    f.debug_struct("VirtualTimeScheduler")
      .field("now", &state.virtual_time)
      .field("pending", &state.task_queue.len())
      .finish()
  }
}
