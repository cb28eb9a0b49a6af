//! Publishes at most one value per interval.
//!
//! The first value is emitted on the next scheduler hop. A value arriving
//! within `interval` of the last emission is held and emitted once the
//! interval elapsed; while it is held, later values either replace it
//! (`latest`) or are dropped. Values arriving without downstream demand are
//! dropped. A completion waits behind a held value.

use std::{
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
pub struct Throttle<P, Sch> {
  source: P,
  interval: Duration,
  scheduler: Sch,
  latest: bool,
}

impl<P, Sch> Throttle<P, Sch> {
  pub fn new(source: P, interval: Duration, scheduler: Sch, latest: bool) -> Self {
    Throttle { source, interval, scheduler, latest }
  }
}

impl<P, Sch> Publisher for Throttle<P, Sch>
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
    let inner = ThrottleInner::<P::Output, P::Failure, S, Sch>::new(
      subscriber,
      self.interval,
      self.scheduler.clone(),
      self.latest,
    );
    self.source.subscribe(inner)
  }
}

// ==================== Inner ====================

struct ThrottleState<O, F, D, T> {
  upstream: SubscriptionStatus,
  downstream: Option<Arc<D>>,
  demand: Demand,
  last_emission: Option<T>,
  pending_input: Option<O>,
  pending_completion: Option<Completion<F>>,
  timer: Option<TaskHandle>,
}

impl<O, F, D, T> ThrottleState<O, F, D, T> {
  fn has_scheduled_output(&self) -> bool {
    self.pending_input.is_some() || self.pending_completion.is_some()
  }
}

struct ThrottleInner<O, F, D, Sch: Scheduler> {
  me: Weak<Self>,
  interval: Duration,
  scheduler: Sch,
  latest: bool,
  state: Mutex<ThrottleState<O, F, D, Sch::Time>>,
}

impl<O, F, D, Sch> ThrottleInner<O, F, D, Sch>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  Sch: Scheduler,
{
  fn new(subscriber: D, interval: Duration, scheduler: Sch, latest: bool) -> Arc<Self> {
    Arc::new_cyclic(|me| ThrottleInner {
      me: me.clone(),
      interval,
      scheduler,
      latest,
      state: Mutex::new(ThrottleState {
        upstream: SubscriptionStatus::AwaitingSubscription,
        downstream: Some(Arc::new(subscriber)),
        demand: Demand::NONE,
        last_emission: None,
        pending_input: None,
        pending_completion: None,
        timer: None,
      }),
    })
  }

  fn emission_action(&self) -> impl FnOnce() + Send + 'static {
    let me = self.me.clone();
    move || {
      if let Some(me) = me.upgrade() {
        me.scheduled_emission();
      }
    }
  }

  fn scheduled_emission(&self) {
    let mut state = self.state.lock();
    if state.upstream.is_awaiting() {
      return;
    }
    let Some(downstream) = state.downstream.clone() else { return };
    if state.pending_input.is_some() && state.pending_completion.is_none() {
      state.last_emission = Some(self.scheduler.now());
    }
    state.timer = None;
    let input = state.pending_input.take();
    let completion = state.pending_completion.take();
    let upstream = if completion.is_some() {
      state.downstream = None;
      state.upstream.terminate()
    } else {
      None
    };
    drop(state);
    drop(upstream);

    let more = input.map_or(Demand::NONE, |input| downstream.receive(input));
    if let Some(completion) = completion {
      downstream.receive_completion(completion);
      return;
    }
    if !more.is_none() {
      self.state.lock().demand += more;
    }
  }
}

impl<O, F, D, Sch> Subscriber<O, F> for ThrottleInner<O, F, D, Sch>
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
      debug!(target: "recombine::throttle", "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription.clone());
    let downstream = state.downstream.clone();
    drop(state);
    subscription.request(Demand::Unlimited);
    if let (Some(downstream), Some(me)) = (downstream, self.me.upgrade()) {
      downstream.receive_subscription(me);
    }
  }

  fn receive(&self, input: O) -> Demand {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() {
      return Demand::NONE;
    }
    if state.demand.is_none() {
      trace!(target: "recombine::throttle", "no demand, dropping value");
      return Demand::NONE;
    }
    if state.has_scheduled_output() {
      if self.latest {
        state.pending_input = Some(input);
      } else {
        trace!(target: "recombine::throttle", "suppressing value within interval");
      }
      return Demand::NONE;
    }

    let now = self.scheduler.now();
    let emission_time = state
      .last_emission
      .map_or(now, |last| (last + self.interval).max(now));
    state.demand -= 1;
    state.pending_input = Some(input);
    drop(state);

    let action = self.emission_action();
    if emission_time == now {
      self.scheduler.schedule(action);
    } else {
      let timer =
        self
          .scheduler
          .schedule_after(emission_time, self.scheduler.minimum_tolerance(), action);
      let mut state = self.state.lock();
      if state.pending_input.is_some() {
        state.timer = Some(timer);
      }
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let mut state = self.state.lock();
    if !state.upstream.begin_terminal() {
      return;
    }
    let schedule = !state.has_scheduled_output();
    state.pending_completion = Some(completion);
    drop(state);
    if schedule {
      self.scheduler.schedule(self.emission_action());
    }
  }
}

impl<O, F, D, Sch> Subscription for ThrottleInner<O, F, D, Sch>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    if demand.is_none() {
      return;
    }
    let mut state = self.state.lock();
    // Still accepted while a completion waits behind a held value.
    if state.downstream.is_some() {
      state.demand += demand;
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    let upstream = state.upstream.terminate();
    let downstream = state.downstream.take();
    let timer = state.timer.take();
    state.pending_input = None;
    state.pending_completion = None;
    drop(state);
    drop(downstream);
    if let Some(timer) = timer {
      timer.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  fn description(&self) -> &'static str { "Throttle" }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    scheduler::VirtualTimeScheduler,
    testing::{Event, SubscriptionEvent, TestPublisher, TestSubscription, TestingError, TrackingSubscriber},
  };

  type Source = TestPublisher<i32, TestingError>;

  const INTERVAL: Duration = Duration::from_secs(60);

  fn throttled(tracking: &TrackingSubscriber<i32, TestingError>, latest: bool) -> (Source, VirtualTimeScheduler) {
    let source = Source::default();
    let scheduler = VirtualTimeScheduler::new();
    source
      .clone()
      .throttle(INTERVAL, scheduler.clone(), latest)
      .subscribe(tracking.clone());
    (source, scheduler)
  }

  #[recombine_macro::test]
  fn first_value_wins_within_the_interval() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = throttled(&tracking, false);
    source.send(1);
    assert!(tracking.values().is_empty());
    scheduler.advance(Duration::ZERO);
    assert_eq!(tracking.values(), vec![1]);

    scheduler.run_until(Duration::from_secs(45));
    source.send(2);
    scheduler.run_until(Duration::from_secs(50));
    source.send(3);
    scheduler.run_until(Duration::from_secs(59));
    assert_eq!(tracking.values(), vec![1]);

    scheduler.run_until(Duration::from_secs(61));
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Throttle"), Event::Value(1), Event::Value(2)]
    );
    assert_eq!(source.subscription().history(), vec![SubscriptionEvent::Requested(Demand::Unlimited)]);
  }

  #[recombine_macro::test]
  fn latest_value_wins_within_the_interval() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = throttled(&tracking, true);
    source.send(1);
    scheduler.run_until(Duration::from_secs(45));
    source.send(2);
    source.send(3);
    scheduler.run_until(Duration::from_secs(60));
    assert_eq!(tracking.values(), vec![1, 3]);
  }

  #[recombine_macro::test]
  fn completion_waits_for_the_held_value() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = throttled(&tracking, false);
    source.send(1);
    scheduler.run_until(Duration::from_secs(10));
    source.send(2);
    scheduler.run_until(Duration::from_secs(20));
    source.send_completion(Completion::Finished);
    scheduler.run_until(Duration::from_secs(30));
    assert!(tracking.completions().is_empty());

    scheduler.run_until(Duration::from_secs(60));
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Throttle"),
        Event::Value(1),
        Event::Value(2),
        Event::Completion(Completion::Finished),
      ]
    );
  }

  #[recombine_macro::test]
  fn completion_without_held_value_takes_one_hop() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = throttled(&tracking, false);
    source.send_completion(Completion::Failure(TestingError::Oops));
    assert!(tracking.completions().is_empty());
    scheduler.advance(Duration::ZERO);
    assert_eq!(tracking.completions(), vec![Completion::Failure(TestingError::Oops)]);
  }

  #[recombine_macro::test]
  fn values_without_demand_are_dropped() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let (source, scheduler) = throttled(&tracking, true);
    source.send(1);
    scheduler.flush();
    assert!(tracking.values().is_empty());

    tracking.request(Demand::max(1));
    source.send(2);
    scheduler.flush();
    source.send(3);
    scheduler.flush();
    assert_eq!(tracking.values(), vec![2]);
  }

  #[recombine_macro::test]
  fn cancel_drops_the_held_value() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (source, scheduler) = throttled(&tracking, false);
    source.send(1);
    scheduler.advance(Duration::ZERO);
    source.send(2);
    tracking.cancel();
    tracking.cancel();
    scheduler.flush();
    assert_eq!(tracking.values(), vec![1]);
    assert_eq!(source.subscription().cancel_count(), 1);
    assert!(scheduler.is_empty());
  }

  #[recombine_macro::test]
  fn demand_is_accepted_while_a_completion_waits() {
    let tracking = TrackingSubscriber::<i32, TestingError>::new(Demand::max(1));
    let scheduler = VirtualTimeScheduler::new();
    let inner =
      ThrottleInner::<i32, TestingError, _, _>::new(tracking.clone(), INTERVAL, scheduler.clone(), false);
    inner.receive_subscription(Arc::new(TestSubscription::new()));
    inner.receive(1);
    inner.receive_completion(Completion::Finished);
    assert_eq!(inner.state.lock().demand, Demand::NONE);

    tracking.request(Demand::max(2));
    assert_eq!(inner.state.lock().demand, Demand::max(2));
    scheduler.advance(Duration::ZERO);
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Throttle"),
        Event::Value(1),
        Event::Completion(Completion::Finished),
      ]
    );
  }
}
