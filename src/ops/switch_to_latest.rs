//! Flattens a publisher of publishers by following only the most recent one.
//!
//! Upstream is asked for unlimited inner publishers. Each new inner publisher
//! cancels the previous one; downstream demand is a running total handed to
//! whichever inner publisher is current when its subscription arrives.

use std::{
  marker::PhantomData,
  sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Subscription, SubscriptionRef, SubscriptionStatus},
};

pub struct SwitchToLatest<P> {
  source: P,
}

impl<P> SwitchToLatest<P> {
  pub fn new(source: P) -> Self { SwitchToLatest { source } }
}

impl<P: Clone> Clone for SwitchToLatest<P> {
  fn clone(&self) -> Self { SwitchToLatest { source: self.source.clone() } }
}

impl<P> Publisher for SwitchToLatest<P>
where
  P: Publisher,
  P::Output: Publisher<Failure = P::Failure>,
{
  type Output = <P::Output as Publisher>::Output;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Output, P::Failure> + 'static,
  {
    let downstream = Arc::new(subscriber);
    let outer: Arc<SwitchInner<P::Output, S>> = Arc::new_cyclic(|me| SwitchInner {
      me: me.clone(),
      state: Mutex::new(SwitchState {
        outer: SubscriptionStatus::AwaitingSubscription,
        downstream: Some(downstream.clone()),
        demand: Demand::NONE,
        current: None,
        index: 0,
        awaiting_inner: false,
        outer_finished: false,
        cancelled: false,
        completion_sent: false,
      }),
      _child: PhantomData,
    });
    downstream.receive_subscription(outer.clone());
    self.source.receive_subscriber(outer)
  }
}

// ==================== Outer ====================

struct SwitchState<D> {
  outer: SubscriptionStatus,
  downstream: Option<Arc<D>>,
  demand: Demand,
  current: Option<SubscriptionRef>,
  // Index of the most recent inner publisher.
  index: u64,
  awaiting_inner: bool,
  outer_finished: bool,
  cancelled: bool,
  completion_sent: bool,
}

impl<D> SwitchState<D> {
  fn is_done(&self) -> bool { self.cancelled || self.completion_sent }
}

struct SwitchInner<C, D> {
  me: Weak<Self>,
  state: Mutex<SwitchState<D>>,
  _child: PhantomData<fn(C)>,
}

impl<C, D> SwitchInner<C, D>
where
  C: Publisher,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn inner_subscription(&self, index: u64, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if state.is_done() || state.index != index || state.current.is_some() {
      drop(state);
      debug!(target: "recombine::switch_to_latest", index, "cancelling stale inner subscription");
      subscription.cancel();
      return;
    }
    state.current = Some(subscription.clone());
    state.awaiting_inner = false;
    let demand = state.demand;
    drop(state);
    if !demand.is_none() {
      subscription.request(demand);
    }
  }

  fn inner_value(&self, index: u64, value: C::Output) -> Demand {
    let mut state = self.state.lock();
    if state.is_done() {
      return Demand::NONE;
    }
    let current = state.index;
    let demand = state.demand;
    if current != index || demand.is_none() {
      drop(state);
      if current != index {
        panic!("received a value from superseded inner publisher {index}, current is {current}");
      }
      panic!("received a value without outstanding demand");
    }
    state.demand -= 1;
    let downstream = state.downstream.clone();
    drop(state);

    let Some(downstream) = downstream else { return Demand::NONE };
    let more = downstream.receive(value);
    if !more.is_none() {
      self.state.lock().demand += more;
    }
    more
  }

  fn inner_completion(&self, index: u64, completion: Completion<C::Failure>) {
    let mut state = self.state.lock();
    if state.is_done() || state.index != index {
      return;
    }
    state.current = None;
    state.awaiting_inner = false;
    match completion {
      Completion::Finished => {
        if !state.outer_finished {
          trace!(target: "recombine::switch_to_latest", index, "inner finished");
          return;
        }
        state.completion_sent = true;
        let downstream = state.downstream.take();
        drop(state);
        if let Some(downstream) = downstream {
          downstream.receive_completion(Completion::Finished);
        }
      }
      Completion::Failure(error) => {
        state.completion_sent = true;
        let outer = state.outer.terminate();
        let downstream = state.downstream.take();
        drop(state);
        debug!(target: "recombine::switch_to_latest", index, "inner failed");
        if let Some(outer) = outer {
          outer.cancel();
        }
        if let Some(downstream) = downstream {
          downstream.receive_completion(Completion::Failure(error));
        }
      }
    }
  }
}

impl<C, D> Subscriber<C, C::Failure> for SwitchInner<C, D>
where
  C: Publisher + 'static,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if !state.outer.is_awaiting() || state.cancelled {
      drop(state);
      debug!(target: "recombine::switch_to_latest", "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    state.outer = SubscriptionStatus::Subscribed(subscription.clone());
    drop(state);
    subscription.request(Demand::Unlimited);
  }

  fn receive(&self, input: C) -> Demand {
    let mut state = self.state.lock();
    if state.is_done() || state.outer_finished {
      return Demand::NONE;
    }
    let previous = state.current.take();
    state.index += 1;
    state.awaiting_inner = true;
    let index = state.index;
    drop(state);

    if let Some(previous) = previous {
      trace!(target: "recombine::switch_to_latest", index, "switching inner publisher");
      previous.cancel();
    }
    let Some(parent) = self.me.upgrade() else { return Demand::NONE };
    input.subscribe(SwitchSide { parent, index });
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<C::Failure>) {
    let mut state = self.state.lock();
    if state.is_done() || state.outer_finished {
      return;
    }
    state.outer_finished = true;
    let outer = state.outer.terminate();
    match completion {
      Completion::Finished => {
        if state.awaiting_inner || state.current.is_some() {
          drop(state);
          drop(outer);
          return;
        }
        state.completion_sent = true;
        let downstream = state.downstream.take();
        drop(state);
        drop(outer);
        if let Some(downstream) = downstream {
          downstream.receive_completion(Completion::Finished);
        }
      }
      Completion::Failure(error) => {
        state.completion_sent = true;
        let current = state.current.take();
        let downstream = state.downstream.take();
        drop(state);
        drop(outer);
        debug!(target: "recombine::switch_to_latest", "upstream failed");
        if let Some(current) = current {
          current.cancel();
        }
        if let Some(downstream) = downstream {
          downstream.receive_completion(Completion::Failure(error));
        }
      }
    }
  }
}

impl<C, D> Subscription for SwitchInner<C, D>
where
  C: Publisher,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let mut state = self.state.lock();
    if state.is_done() {
      return;
    }
    state.demand += demand;
    let current = state.current.clone();
    drop(state);
    if let Some(current) = current {
      current.request(demand);
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    if state.cancelled {
      return;
    }
    state.cancelled = true;
    let current = state.current.take();
    let outer = state.outer.terminate();
    let downstream = state.downstream.take();
    drop(state);
    drop(downstream);
    if let Some(current) = current {
      current.cancel();
    }
    if let Some(outer) = outer {
      outer.cancel();
    }
  }

  fn description(&self) -> &'static str { "SwitchToLatest" }
}

// ==================== Side ====================

struct SwitchSide<C, D> {
  parent: Arc<SwitchInner<C, D>>,
  index: u64,
}

impl<C, D> Subscriber<C::Output, C::Failure> for SwitchSide<C, D>
where
  C: Publisher,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    self.parent.inner_subscription(self.index, subscription)
  }

  fn receive(&self, input: C::Output) -> Demand { self.parent.inner_value(self.index, input) }

  fn receive_completion(&self, completion: Completion<C::Failure>) {
    self.parent.inner_completion(self.index, completion)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{
    Event, SubscriptionEvent, TestPublisher, TestingError, TrackingSubscriber,
  };

  type Child = TestPublisher<i32, TestingError>;

  /// Runs its hook when the last reference to it goes away.
  struct DropHook<H: Fn() + Send + Sync>(H);

  impl<H: Fn() + Send + Sync> Drop for DropHook<H> {
    fn drop(&mut self) { (self.0)() }
  }

  impl<H: Fn() + Send + Sync> Subscription for DropHook<H> {
    fn request(&self, _: Demand) {}

    fn cancel(&self) {}
  }

  /// Finishes right after subscribing, keeping no reference to the
  /// subscription it handed out.
  struct FinishesAtOnce<H>(H);

  impl<H: Fn() + Clone + Send + Sync + 'static> Publisher for FinishesAtOnce<H> {
    type Output = Child;
    type Failure = TestingError;

    fn receive_subscriber<S>(&self, subscriber: S)
    where
      S: Subscriber<Child, TestingError> + 'static,
    {
      subscriber.receive_subscription(Arc::new(DropHook(self.0.clone())));
      subscriber.receive_completion(Completion::Finished);
    }
  }

  fn setup(
    tracking: &TrackingSubscriber<i32, TestingError>,
  ) -> (TestPublisher<Child, TestingError>, Child, Child) {
    let outer = TestPublisher::default();
    outer.clone().switch_to_latest().subscribe(tracking.clone());
    (outer, Child::default(), Child::default())
  }

  #[recombine_macro::test]
  fn outer_subscription_is_released_outside_the_lock() {
    let tracking = TrackingSubscriber::<i32, TestingError>::new(Demand::max(1));
    let released = Arc::new(Mutex::new(false));
    let (t, r) = (tracking.clone(), released.clone());
    FinishesAtOnce(move || {
      // Reenters the operator while its completion is being handled.
      t.request(Demand::max(1));
      *r.lock() = true;
    })
    .switch_to_latest()
    .subscribe(tracking.clone());
    assert!(*released.lock());
    assert_eq!(tracking.completions(), vec![Completion::Finished]);
  }

  #[recombine_macro::test]
  fn follows_the_latest_inner() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (outer, a, b) = setup(&tracking);
    assert_eq!(outer.subscription().history(), vec![SubscriptionEvent::Requested(Demand::Unlimited)]);

    outer.send(a.clone());
    assert_eq!(a.subscription().history(), vec![SubscriptionEvent::Requested(Demand::Unlimited)]);
    a.send(1);
    outer.send(b.clone());
    assert_eq!(a.subscription().cancel_count(), 1);
    b.send(2);
    b.send_completion(Completion::Finished);
    assert!(tracking.completions().is_empty());
    outer.send_completion(Completion::Finished);

    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("SwitchToLatest"),
        Event::Value(1),
        Event::Value(2),
        Event::Completion(Completion::Finished),
      ]
    );
  }

  #[recombine_macro::test]
  fn remaining_demand_moves_to_the_next_inner() {
    let tracking = TrackingSubscriber::new(Demand::max(2));
    let (outer, a, b) = setup(&tracking);
    outer.send(a.clone());
    a.send(1);
    outer.send(b.clone());
    assert_eq!(b.subscription().history(), vec![SubscriptionEvent::Requested(Demand::max(1))]);
    tracking.request(Demand::max(3));
    assert_eq!(
      b.subscription().history(),
      vec![SubscriptionEvent::Requested(Demand::max(1)), SubscriptionEvent::Requested(Demand::max(3))]
    );
  }

  #[recombine_macro::test]
  fn outer_finishing_without_inner_finishes() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let (outer, _, _) = setup(&tracking);
    outer.send_completion(Completion::Finished);
    assert_eq!(tracking.completions(), vec![Completion::Finished]);
  }

  #[recombine_macro::test]
  fn inner_failure_cancels_outer() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (outer, a, _) = setup(&tracking);
    outer.send(a.clone());
    a.send_completion(Completion::Failure(TestingError::Oops));
    outer.send_completion(Completion::Finished);
    assert_eq!(outer.subscription().cancel_count(), 1);
    assert_eq!(tracking.completions(), vec![Completion::Failure(TestingError::Oops)]);
  }

  #[recombine_macro::test]
  fn outer_failure_cancels_inner() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (outer, a, _) = setup(&tracking);
    outer.send(a.clone());
    outer.send_completion(Completion::Failure(TestingError::Other));
    assert_eq!(a.subscription().cancel_count(), 1);
    assert_eq!(tracking.completions(), vec![Completion::Failure(TestingError::Other)]);
  }

  #[recombine_macro::test]
  fn cancel_reaches_outer_and_current_inner() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (outer, a, _) = setup(&tracking);
    outer.send(a.clone());
    tracking.cancel();
    tracking.cancel();
    assert_eq!(outer.subscription().cancel_count(), 1);
    assert_eq!(a.subscription().cancel_count(), 1);
    assert_eq!(a.send(1), Demand::NONE);
    assert!(tracking.values().is_empty());
  }

  #[recombine_macro::test]
  #[should_panic(expected = "superseded inner publisher")]
  fn value_from_superseded_inner_panics() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let (outer, a, b) = setup(&tracking);
    outer.send(a.clone());
    outer.send(b);
    a.send(1);
  }

  #[recombine_macro::test]
  #[should_panic(expected = "without outstanding demand")]
  fn value_without_demand_panics() {
    let tracking = TrackingSubscriber::new(Demand::max(1));
    let (outer, a, _) = setup(&tracking);
    outer.send(a.clone());
    a.send(1);
    a.send(2);
  }

  #[recombine_macro::test]
  #[should_panic(expected = "demand must not be zero")]
  fn zero_request_panics() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let _publishers = setup(&tracking);
    tracking.request(Demand::NONE);
  }
}
