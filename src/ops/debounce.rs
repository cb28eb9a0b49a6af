//! Publishes a value only once `due_time` passed without a newer one.
//!
//! Every upstream value bumps a generation counter and schedules an emission
//! for that generation; an emission whose generation is no longer current is
//! dropped. A value pending when the upstream finishes is flushed first, and
//! the completion follows in a second scheduler hop.

use std::{
  marker::PhantomData,
  sync::{Arc, Weak},
  time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
  demand::Demand,
  publisher::Publisher,
  scheduler::{Scheduler, TaskHandle},
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, Subscription, SubscriptionRef, SubscriptionStatus},
};

#[derive(Clone)]
pub struct Debounce<P, Sch> {
  source: P,
  due_time: Duration,
  scheduler: Sch,
}

impl<P, Sch> Debounce<P, Sch> {
  pub fn new(source: P, due_time: Duration, scheduler: Sch) -> Self {
    Debounce { source, due_time, scheduler }
  }
}

impl<P, Sch> Publisher for Debounce<P, Sch>
where
  P: Publisher,
  Sch: Scheduler,
{
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure> + 'static,
  {
    let inner = Arc::new_cyclic(|me| DebounceInner {
      me: me.clone(),
      due_time: self.due_time,
      scheduler: self.scheduler.clone(),
      state: Mutex::new(DebounceState {
        upstream: SubscriptionStatus::AwaitingSubscription,
        downstream: Some(Arc::new(subscriber)),
        demand: Demand::NONE,
        value: None,
        generation: 0,
        pending: None,
      }),
      _failure: PhantomData,
    });
    self.source.subscribe(inner)
  }
}

// ==================== Inner ====================

struct DebounceState<O, D> {
  upstream: SubscriptionStatus,
  downstream: Option<Arc<D>>,
  demand: Demand,
  value: Option<O>,
  generation: u64,
  pending: Option<TaskHandle>,
}

struct DebounceInner<O, F, D, Sch> {
  me: Weak<Self>,
  due_time: Duration,
  scheduler: Sch,
  state: Mutex<DebounceState<O, D>>,
  _failure: PhantomData<fn(F)>,
}

impl<O, F, D, Sch> DebounceInner<O, F, D, Sch>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  Sch: Scheduler,
{
  fn due(&self, generation: u64) {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() || state.generation != generation {
      return;
    }
    state.pending = None;
    let Some(value) = state.value.take() else { return };
    self.deliver(state, value);
  }

  /// Hands `value` downstream if it has demand, consuming the lock.
  fn deliver(&self, mut state: parking_lot::MutexGuard<'_, DebounceState<O, D>>, value: O) {
    let Some(downstream) = state.downstream.clone() else { return };
    if state.demand.is_none() {
      trace!(target: "recombine::debounce", "no demand, dropping value");
      return;
    }
    state.demand -= 1;
    drop(state);
    let more = downstream.receive(value);
    if !more.is_none() {
      self.state.lock().demand += more;
    }
  }

  fn flush(&self, value: Option<O>, completion: Completion<F>) {
    if let Some(value) = value {
      self.deliver(self.state.lock(), value);
    }
    let me = self.me.clone();
    self.scheduler.schedule(move || {
      if let Some(me) = me.upgrade() {
        me.finish(completion);
      }
    });
  }

  fn finish(&self, completion: Completion<F>) {
    let downstream = self.state.lock().downstream.take();
    if let Some(downstream) = downstream {
      downstream.receive_completion(completion);
    }
  }
}

impl<O, F, D, Sch> Subscriber<O, F> for DebounceInner<O, F, D, Sch>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  Sch: Scheduler,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if !state.upstream.is_awaiting() {
      drop(state);
      debug!(target: "recombine::debounce", "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription.clone());
    let downstream = state.downstream.clone();
    drop(state);
    if let (Some(downstream), Some(me)) = (downstream, self.me.upgrade()) {
      downstream.receive_subscription(me);
    }
    subscription.request(Demand::Unlimited);
  }

  fn receive(&self, input: O) -> Demand {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() {
      return Demand::NONE;
    }
    state.generation += 1;
    let generation = state.generation;
    state.value = Some(input);
    let previous = state.pending.take();
    drop(state);
    if let Some(previous) = previous {
      trace!(target: "recombine::debounce", generation, "rescheduling");
      previous.cancel();
    }

    let me = self.me.clone();
    let handle = self.scheduler.schedule_after(
      self.scheduler.now() + self.due_time,
      self.scheduler.minimum_tolerance(),
      move || {
        if let Some(me) = me.upgrade() {
          me.due(generation);
        }
      },
    );

    let mut state = self.state.lock();
    if state.generation == generation && state.value.is_some() {
      state.pending = Some(handle);
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() {
      return;
    }
    let upstream = state.upstream.terminate();
    let pending = state.pending.take();
    let value = state.value.take();
    drop(state);
    drop(upstream);
    if let Some(pending) = pending {
      pending.cancel();
    }
    let me = self.me.clone();
    self.scheduler.schedule(move || {
      let Some(me) = me.upgrade() else { return };
      match completion {
        Completion::Finished => me.flush(value, Completion::Finished),
        failure => me.finish(failure),
      }
    });
  }
}

impl<O, F, D, Sch> Subscription for DebounceInner<O, F, D, Sch>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    let mut state = self.state.lock();
    if state.downstream.is_some() {
      state.demand += demand;
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    let upstream = state.upstream.terminate();
    let pending = state.pending.take();
    state.value = None;
    // Also drops a completion still waiting for its scheduler hop.
    let downstream = state.downstream.take();
    drop(state);
    drop(downstream);
    if let Some(pending) = pending {
      pending.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  fn description(&self) -> &'static str { "Debounce" }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    scheduler::{ScheduleEvent, VirtualTimeScheduler},
    testing::{Event, SubscriptionEvent, TestPublisher, TestingError, TrackingSubscriber},
  };

  type Source = TestPublisher<i32, TestingError>;

  fn debounced(
    tracking: &TrackingSubscriber<i32, TestingError>, due_time: Duration,
  ) -> (Source, VirtualTimeScheduler) {
    let source = Source::default();
    let scheduler = VirtualTimeScheduler::new();
    source.clone().debounce(due_time, scheduler.clone()).subscribe(tracking.clone());
    (source, scheduler)
  }

  #[recombine_macro::test]
  fn only_the_last_value_before_a_quiet_period_is_published() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = debounced(&tracking, Duration::from_nanos(13));
    source.send(1);
    scheduler.run_until(Duration::from_nanos(4));
    source.send(2);
    scheduler.run_until(Duration::from_nanos(9));
    source.send(3);
    scheduler.run_until(Duration::from_nanos(200));

    assert_eq!(tracking.history(), vec![Event::Subscription("Debounce"), Event::Value(3)]);
    assert_eq!(source.subscription().history(), vec![SubscriptionEvent::Requested(Demand::Unlimited)]);
  }

  #[recombine_macro::test]
  fn spaced_values_all_pass() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = debounced(&tracking, Duration::from_millis(10));
    source.send(1);
    scheduler.advance(Duration::from_millis(20));
    source.send(2);
    scheduler.advance(Duration::from_millis(20));
    assert_eq!(tracking.values(), vec![1, 2]);
  }

  #[recombine_macro::test]
  fn finishing_flushes_the_pending_value_then_completes() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = debounced(&tracking, Duration::from_millis(10));
    source.send(1);
    scheduler.advance(Duration::from_millis(1));
    source.send_completion(Completion::Finished);
    assert!(tracking.values().is_empty());
    assert!(tracking.completions().is_empty());

    scheduler.advance(Duration::ZERO);
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Debounce"),
        Event::Value(1),
        Event::Completion(Completion::Finished),
      ]
    );
    let hops = scheduler
      .history()
      .into_iter()
      .filter(|event| matches!(event, ScheduleEvent::Now { .. }))
      .count();
    assert_eq!(hops, 2);
  }

  #[recombine_macro::test]
  fn failure_drops_the_pending_value() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = debounced(&tracking, Duration::from_millis(10));
    source.send(1);
    source.send_completion(Completion::Failure(TestingError::Oops));
    scheduler.flush();
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Debounce"),
        Event::Completion(Completion::Failure(TestingError::Oops)),
      ]
    );
  }

  #[recombine_macro::test]
  fn value_due_without_demand_is_dropped() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let (source, scheduler) = debounced(&tracking, Duration::from_millis(10));
    source.send(1);
    scheduler.advance(Duration::from_millis(20));
    assert!(tracking.values().is_empty());

    tracking.request(Demand::max(1));
    source.send(2);
    source.send(3);
    scheduler.advance(Duration::from_millis(20));
    assert_eq!(tracking.values(), vec![3]);
  }

  #[recombine_macro::test]
  fn cancel_stops_the_pending_emission() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = debounced(&tracking, Duration::from_millis(10));
    source.send(1);
    tracking.cancel();
    tracking.cancel();
    scheduler.flush();
    assert!(tracking.values().is_empty());
    assert_eq!(source.subscription().cancel_count(), 1);
  }

  #[recombine_macro::test]
  fn queued_completion_hop_does_not_keep_the_operator_alive() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = debounced(&tracking, Duration::from_millis(10));
    source.send(1);
    source.send_completion(Completion::Finished);
    assert!(!scheduler.is_empty());

    let inner = Arc::downgrade(&tracking.release_subscription().expect("subscribed"));
    source.release();
    assert!(inner.upgrade().is_none());
    scheduler.flush();
    assert!(tracking.values().is_empty());
    assert!(tracking.completions().is_empty());
  }
}
