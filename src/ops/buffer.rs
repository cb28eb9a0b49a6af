//! Bounded queue between a publisher and a slower subscriber.
//!
//! | Strategy | Effect |
//! |----------|--------|
//! | [`PrefetchStrategy::KeepFull`] | requests `size` up front and one more per value handed downstream |
//! | [`PrefetchStrategy::ByRequest`] | requests unlimited up front |
//! | [`BufferingStrategy::DropNewest`] | a value arriving at capacity is discarded |
//! | [`BufferingStrategy::DropOldest`] | the oldest queued value makes room |
//! | [`BufferingStrategy::CustomError`] | fails right away, discarding the queue and cancelling upstream |
//!
//! Completion waits until the queue is empty. An upstream failure skips the
//! queue once the downstream has no demand left.

use std::{
  collections::VecDeque,
  sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
  demand::Demand,
  error::OverflowError,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Subscription, SubscriptionRef, SubscriptionStatus},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchStrategy {
  KeepFull,
  ByRequest,
}

type ErrorFactory<F> = Arc<dyn Fn() -> F + Send + Sync>;

pub enum BufferingStrategy<F> {
  DropNewest,
  DropOldest,
  CustomError(ErrorFactory<F>),
}

impl<F> BufferingStrategy<F> {
  pub fn custom_error(factory: impl Fn() -> F + Send + Sync + 'static) -> Self {
    BufferingStrategy::CustomError(Arc::new(factory))
  }

  /// Fails with an [`OverflowError`] for a buffer of `capacity`.
  pub fn overflow(capacity: usize) -> Self
  where
    F: From<OverflowError>,
  {
    Self::custom_error(move || OverflowError { capacity }.into())
  }
}

impl<F> Clone for BufferingStrategy<F> {
  fn clone(&self) -> Self {
    match self {
      BufferingStrategy::DropNewest => BufferingStrategy::DropNewest,
      BufferingStrategy::DropOldest => BufferingStrategy::DropOldest,
      BufferingStrategy::CustomError(factory) => BufferingStrategy::CustomError(factory.clone()),
    }
  }
}

impl<F> std::fmt::Debug for BufferingStrategy<F> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      BufferingStrategy::DropNewest => f.write_str("DropNewest"),
      BufferingStrategy::DropOldest => f.write_str("DropOldest"),
      BufferingStrategy::CustomError(_) => f.write_str("CustomError"),
    }
  }
}

pub struct Buffer<P: Publisher> {
  source: P,
  size: usize,
  prefetch: PrefetchStrategy,
  when_full: BufferingStrategy<P::Failure>,
}

impl<P: Publisher> Buffer<P> {
  pub fn new(
    source: P, size: usize, prefetch: PrefetchStrategy, when_full: BufferingStrategy<P::Failure>,
  ) -> Self {
    Buffer { source, size, prefetch, when_full }
  }
}

impl<P: Publisher> Publisher for Buffer<P> {
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure> + 'static,
  {
    let inner = Arc::new_cyclic(|me| BufferInner {
      me: me.clone(),
      size: self.size,
      prefetch: self.prefetch,
      when_full: self.when_full.clone(),
      state: Mutex::new(BufferState {
        upstream: SubscriptionStatus::AwaitingSubscription,
        downstream: Some(Arc::new(subscriber)),
        demand: Demand::NONE,
        values: VecDeque::new(),
        terminal: None,
        recursion: false,
      }),
    });
    self.source.receive_subscriber(inner)
  }
}

// ==================== Inner ====================

struct BufferState<O, F, D> {
  upstream: SubscriptionStatus,
  downstream: Option<Arc<D>>,
  demand: Demand,
  values: VecDeque<O>,
  terminal: Option<Completion<F>>,
  // Set while a value is handed downstream; a request made from inside that
  // call only adds demand and the running drain picks it up.
  recursion: bool,
}

struct BufferInner<O, F, D> {
  me: Weak<Self>,
  size: usize,
  prefetch: PrefetchStrategy,
  when_full: BufferingStrategy<F>,
  state: Mutex<BufferState<O, F, D>>,
}

impl<O, F, D> BufferInner<O, F, D>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
{
  /// Hands queued values downstream while there is demand and delivers a
  /// pending terminal signal once allowed. Returns the demand to request
  /// from upstream to keep the queue full.
  fn drain(&self) -> Demand {
    let mut upstream_demand = Demand::NONE;
    let mut state = self.state.lock();
    loop {
      if !state.upstream.is_subscribed() {
        return upstream_demand;
      }
      let Some(downstream) = state.downstream.clone() else { return upstream_demand };

      let failed = matches!(state.terminal, Some(Completion::Failure(_)));
      if state.values.is_empty() || (failed && state.demand.is_none()) {
        if let Some(completion) = state.terminal.take() {
          let upstream = state.upstream.terminate();
          state.downstream = None;
          let discarded = std::mem::take(&mut state.values);
          drop(state);
          drop((upstream, discarded));
          downstream.receive_completion(completion);
        }
        return upstream_demand;
      }
      if state.demand.is_none() {
        return upstream_demand;
      }

      let Some(value) = state.values.pop_front() else { return upstream_demand };
      state.demand -= 1;
      state.recursion = true;
      drop(state);

      let more = downstream.receive(value);
      if self.prefetch == PrefetchStrategy::KeepFull {
        upstream_demand += 1;
      }

      state = self.state.lock();
      state.recursion = false;
      state.demand += more;
    }
  }
}

impl<O, F, D> Subscriber<O, F> for BufferInner<O, F, D>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if !state.upstream.is_awaiting() {
      drop(state);
      debug!(target: "recombine::buffer", "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription.clone());
    let downstream = state.downstream.clone();
    drop(state);

    subscription.request(match self.prefetch {
      PrefetchStrategy::KeepFull => Demand::max(self.size),
      PrefetchStrategy::ByRequest => Demand::Unlimited,
    });
    if let (Some(downstream), Some(me)) = (downstream, self.me.upgrade()) {
      downstream.receive_subscription(me);
    }
  }

  fn receive(&self, input: O) -> Demand {
    let mut state = self.state.lock();
    let Some(upstream) = state.upstream.subscription().cloned() else { return Demand::NONE };
    if matches!(state.terminal, Some(Completion::Failure(_))) {
      return Demand::NONE;
    }

    if state.values.len() >= self.size {
      match &self.when_full {
        BufferingStrategy::DropNewest => {
          drop(state);
          trace!(target: "recombine::buffer", "full, dropping newest value");
          return self.drain();
        }
        BufferingStrategy::DropOldest => {
          state.values.pop_front();
          trace!(target: "recombine::buffer", "full, dropped oldest value");
        }
        BufferingStrategy::CustomError(factory) => {
          let factory = factory.clone();
          let terminated = state.upstream.terminate();
          let downstream = state.downstream.take();
          let discarded = std::mem::take(&mut state.values);
          drop(state);
          drop((terminated, discarded));
          upstream.cancel();
          let error = factory();
          debug!(target: "recombine::buffer", capacity = self.size, "overflow, failing");
          if let Some(downstream) = downstream {
            downstream.receive_completion(Completion::Failure(error));
          }
          return Demand::NONE;
        }
      }
    }

    state.values.push_back(input);
    drop(state);
    self.drain()
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() || state.terminal.is_some() {
      return;
    }
    state.terminal = Some(completion);
    drop(state);
    self.drain();
  }
}

impl<O, F, D> Subscription for BufferInner<O, F, D>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
{
  fn request(&self, demand: Demand) {
    let mut state = self.state.lock();
    let Some(upstream) = state.upstream.subscription().cloned() else { return };
    state.demand += demand;
    if state.recursion {
      return;
    }
    drop(state);

    let more = self.drain();
    if !more.is_none() {
      upstream.request(more);
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    let Some(upstream) = state.upstream.terminate() else { return };
    let discarded = (std::mem::take(&mut state.values), state.downstream.take());
    drop(state);
    drop(discarded);
    upstream.cancel();
  }

  fn description(&self) -> &'static str { "Buffer" }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{
    Event, SubscriptionEvent, TestPublisher, TestSubscription, TestingError, TrackingSubscriber,
  };

  fn buffered(
    size: usize, prefetch: PrefetchStrategy, when_full: BufferingStrategy<TestingError>,
    tracking: &TrackingSubscriber<i32, TestingError>,
  ) -> TestPublisher<i32, TestingError> {
    let publisher = TestPublisher::default();
    publisher.clone().buffer(size, prefetch, when_full).subscribe(tracking.clone());
    publisher
  }

  #[recombine_macro::test]
  fn keep_full_refills_what_was_drained() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let publisher = buffered(3, PrefetchStrategy::KeepFull, BufferingStrategy::DropNewest, &tracking);
    assert_eq!(tracking.history(), vec![Event::Subscription("Buffer")]);

    assert_eq!(publisher.send(1), Demand::NONE);
    assert_eq!(publisher.send(2), Demand::NONE);
    tracking.request(Demand::max(1));
    assert_eq!(tracking.values(), vec![1]);
    assert_eq!(
      publisher.subscription().history(),
      vec![SubscriptionEvent::Requested(Demand::max(3)), SubscriptionEvent::Requested(Demand::max(1))]
    );

    // With demand outstanding a value passes through and is refilled at once.
    tracking.request(Demand::max(2));
    assert_eq!(publisher.send(3), Demand::max(1));
    assert_eq!(tracking.values(), vec![1, 2, 3]);
  }

  #[recombine_macro::test]
  fn drop_oldest_keeps_the_most_recent() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let publisher = buffered(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropOldest, &tracking);
    for v in 1..=5 {
      publisher.send(v);
    }
    tracking.request(Demand::Unlimited);
    assert_eq!(tracking.values(), vec![4, 5]);
    assert_eq!(
      publisher.subscription().history(),
      vec![SubscriptionEvent::Requested(Demand::Unlimited)]
    );
  }

  #[recombine_macro::test]
  fn drop_newest_keeps_the_first() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let publisher = buffered(2, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest, &tracking);
    for v in 1..=5 {
      publisher.send(v);
    }
    tracking.request(Demand::Unlimited);
    assert_eq!(tracking.values(), vec![1, 2]);
  }

  #[recombine_macro::test]
  fn custom_error_fails_immediately() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let publisher = buffered(
      1,
      PrefetchStrategy::ByRequest,
      BufferingStrategy::custom_error(|| TestingError::Oops),
      &tracking,
    );
    publisher.send(1);
    assert_eq!(publisher.send(2), Demand::NONE);
    assert_eq!(publisher.send(3), Demand::NONE);
    tracking.request(Demand::max(5));
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Buffer"),
        Event::Completion(Completion::Failure(TestingError::Oops)),
      ]
    );
    assert_eq!(publisher.subscription().cancel_count(), 1);
  }

  #[recombine_macro::test]
  fn reentrant_overflow_from_factory_does_not_deadlock() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let publisher = TestPublisher::<i32, TestingError>::default();
    let p = publisher.clone();
    publisher
      .clone()
      .buffer(
        1,
        PrefetchStrategy::ByRequest,
        BufferingStrategy::custom_error(move || {
          p.send(42);
          TestingError::Other
        }),
      )
      .subscribe(tracking.clone());
    publisher.send(1);
    publisher.send(2);
    assert_eq!(tracking.completions(), vec![Completion::Failure(TestingError::Other)]);
    assert!(tracking.values().is_empty());
  }

  #[recombine_macro::test]
  fn overflow_shortcut() {
    #[derive(Debug, Clone, PartialEq)]
    struct Failed(OverflowError);
    impl From<OverflowError> for Failed {
      fn from(e: OverflowError) -> Self { Failed(e) }
    }

    let tracking = TrackingSubscriber::<i32, Failed>::new(Demand::NONE);
    let publisher = TestPublisher::<i32, Failed>::default();
    publisher
      .clone()
      .buffer(1, PrefetchStrategy::ByRequest, BufferingStrategy::overflow(1))
      .subscribe(tracking.clone());
    publisher.send(1);
    publisher.send(2);
    assert_eq!(
      tracking.completions(),
      vec![Completion::Failure(Failed(OverflowError { capacity: 1 }))]
    );
  }

  #[recombine_macro::test]
  fn completion_waits_for_the_queue() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let publisher = buffered(4, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest, &tracking);
    publisher.send(1);
    publisher.send(2);
    publisher.send_completion(Completion::Finished);
    assert!(tracking.completions().is_empty());

    tracking.request(Demand::max(1));
    assert!(tracking.completions().is_empty());
    tracking.request(Demand::max(1));
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Buffer"),
        Event::Value(1),
        Event::Value(2),
        Event::Completion(Completion::Finished),
      ]
    );
  }

  #[recombine_macro::test]
  fn failure_skips_queue_without_demand() {
    let tracking = TrackingSubscriber::new(Demand::NONE);
    let publisher = buffered(4, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest, &tracking);
    publisher.send(1);
    publisher.send_completion(Completion::Failure(TestingError::Oops));
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Buffer"),
        Event::Completion(Completion::Failure(TestingError::Oops)),
      ]
    );
  }

  #[recombine_macro::test]
  fn request_from_inside_receive_keeps_draining() {
    let tracking = TrackingSubscriber::new(Demand::NONE).on_value(|me, _| {
      me.request(Demand::max(1));
      Demand::NONE
    });
    let publisher = buffered(5, PrefetchStrategy::ByRequest, BufferingStrategy::DropNewest, &tracking);
    publisher.send(1);
    publisher.send(2);
    publisher.send(3);
    tracking.request(Demand::max(1));
    assert_eq!(tracking.values(), vec![1, 2, 3]);
  }

  #[recombine_macro::test]
  fn rejects_second_subscription_and_cancels_once() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    let publisher = buffered(2, PrefetchStrategy::KeepFull, BufferingStrategy::DropNewest, &tracking);
    let extra = Arc::new(TestSubscription::new());
    publisher.send_subscription(extra.clone());
    assert_eq!(extra.history(), vec![SubscriptionEvent::Cancelled]);

    tracking.cancel();
    tracking.cancel();
    assert_eq!(publisher.subscription().cancel_count(), 1);
    assert_eq!(publisher.send(1), Demand::NONE);
    assert!(tracking.values().is_empty());
  }
}
