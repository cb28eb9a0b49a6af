//! Terminates the stream when the upstream stays silent for too long.
//!
//! The deadline starts at subscription, restarts on the first downstream
//! request and on every value. When it passes, the upstream is cancelled and
//! the downstream receives either the custom error or `Finished`. Values and
//! completions are relayed on the scheduler.

use std::{
  marker::PhantomData,
  sync::{Arc, Weak},
  time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
  demand::Demand,
  publisher::Publisher,
  scheduler::{Scheduler, TaskHandle},
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, Subscription, SubscriptionRef, SubscriptionStatus},
};

pub type ErrorFactory<F> = Arc<dyn Fn() -> F + Send + Sync>;

pub struct Timeout<P: Publisher, Sch> {
  source: P,
  interval: Duration,
  scheduler: Sch,
  custom_error: Option<ErrorFactory<P::Failure>>,
}

impl<P: Publisher + Clone, Sch: Clone> Clone for Timeout<P, Sch> {
  fn clone(&self) -> Self {
    Timeout {
      source: self.source.clone(),
      interval: self.interval,
      scheduler: self.scheduler.clone(),
      custom_error: self.custom_error.clone(),
    }
  }
}

impl<P: Publisher, Sch> Timeout<P, Sch> {
  /// Without `custom_error` the stream simply finishes on timeout.
  pub fn new(
    source: P, interval: Duration, scheduler: Sch, custom_error: Option<ErrorFactory<P::Failure>>,
  ) -> Self {
    Timeout { source, interval, scheduler, custom_error }
  }
}

impl<P, Sch> Publisher for Timeout<P, Sch>
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
    let inner = Arc::new_cyclic(|me| TimeoutInner {
      me: me.clone(),
      interval: self.interval,
      scheduler: self.scheduler.clone(),
      custom_error: self.custom_error.clone(),
      state: Mutex::new(TimeoutState {
        upstream: SubscriptionStatus::AwaitingSubscription,
        downstream: Some(Arc::new(subscriber)),
        timer: None,
        initial_demand: false,
      }),
      _output: PhantomData,
    });
    self.source.subscribe(inner)
  }
}

// ==================== Inner ====================

struct TimeoutState<D> {
  upstream: SubscriptionStatus,
  downstream: Option<Arc<D>>,
  timer: Option<TaskHandle>,
  initial_demand: bool,
}

struct TimeoutInner<O, F, D, Sch> {
  me: Weak<Self>,
  interval: Duration,
  scheduler: Sch,
  custom_error: Option<ErrorFactory<F>>,
  state: Mutex<TimeoutState<D>>,
  _output: PhantomData<fn(O)>,
}

impl<O, F, D, Sch> TimeoutInner<O, F, D, Sch>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  Sch: Scheduler,
{
  /// Replaces the running deadline with a fresh one.
  fn restart_timer(&self) {
    let previous = self.state.lock().timer.take();
    if let Some(previous) = previous {
      previous.cancel();
    }
    let me = self.me.clone();
    let timer = self.scheduler.schedule_repeating(
      self.scheduler.now() + self.interval,
      self.interval,
      self.scheduler.minimum_tolerance(),
      move || {
        if let Some(me) = me.upgrade() {
          me.timed_out();
        }
      },
    );
    let mut state = self.state.lock();
    if state.upstream.is_subscribed() {
      if let Some(stale) = state.timer.replace(timer) {
        drop(state);
        stale.cancel();
      }
    } else {
      drop(state);
      timer.cancel();
    }
  }

  fn timed_out(&self) {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() {
      return;
    }
    let upstream = state.upstream.terminate();
    let timer = state.timer.take();
    let downstream = state.downstream.take();
    drop(state);
    debug!(target: "recombine::timeout", interval = ?self.interval, "timed out");
    if let Some(timer) = timer {
      timer.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
    if let Some(downstream) = downstream {
      let completion = match &self.custom_error {
        Some(custom_error) => Completion::Failure(custom_error()),
        None => Completion::Finished,
      };
      downstream.receive_completion(completion);
    }
  }

  fn scheduled_receive(&self, input: O) {
    let state = self.state.lock();
    let Some(upstream) = state.upstream.subscription().cloned() else { return };
    let Some(downstream) = state.downstream.clone() else { return };
    drop(state);
    let more = downstream.receive(input);
    if !more.is_none() {
      upstream.request(more);
    }
  }

  fn scheduled_completion(&self, completion: Completion<F>) {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() {
      return;
    }
    let upstream = state.upstream.terminate();
    let downstream = state.downstream.take();
    drop(state);
    drop(upstream);
    if let Some(downstream) = downstream {
      downstream.receive_completion(completion);
    }
  }
}

impl<O, F, D, Sch> Subscriber<O, F> for TimeoutInner<O, F, D, Sch>
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
      debug!(target: "recombine::timeout", "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription);
    let downstream = state.downstream.clone();
    drop(state);
    self.restart_timer();
    if let (Some(downstream), Some(me)) = (downstream, self.me.upgrade()) {
      downstream.receive_subscription(me);
    }
  }

  fn receive(&self, input: O) -> Demand {
    if !self.state.lock().upstream.is_subscribed() {
      return Demand::NONE;
    }
    self.restart_timer();
    let me = self.me.clone();
    self.scheduler.schedule(move || {
      if let Some(me) = me.upgrade() {
        me.scheduled_receive(input);
      }
    });
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() {
      return;
    }
    let timer = state.timer.take();
    drop(state);
    if let Some(timer) = timer {
      timer.cancel();
    }
    let me = self.me.clone();
    self.scheduler.schedule(move || {
      if let Some(me) = me.upgrade() {
        me.scheduled_completion(completion);
      }
    });
  }
}

impl<O, F, D, Sch> Subscription for TimeoutInner<O, F, D, Sch>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  Sch: Scheduler,
{
  fn request(&self, demand: Demand) {
    let mut state = self.state.lock();
    let Some(upstream) = state.upstream.subscription().cloned() else { return };
    let first = !std::mem::replace(&mut state.initial_demand, true);
    drop(state);
    if first {
      self.restart_timer();
    }
    upstream.request(demand);
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    let upstream = state.upstream.terminate();
    let timer = state.timer.take();
    let downstream = state.downstream.take();
    drop(state);
    drop(downstream);
    if let Some(timer) = timer {
      timer.cancel();
    }
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  fn description(&self) -> &'static str { "Timeout" }
}
