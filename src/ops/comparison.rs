//! `min`/`max` and their comparator based variants.
//!
//! Both operators request everything from upstream, keep the running extreme
//! and publish it, followed by `Finished`, once the upstream finished and the
//! downstream asked for at least one value. Among equal values the first one
//! wins. An upstream that finishes without values finishes right away.

use std::{
  marker::PhantomData,
  sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Subscription, SubscriptionRef, SubscriptionStatus},
};

/// The ordering of [`Ord`] as an `are_in_increasing_order` predicate.
pub fn natural_order<T: Ord>(a: &T, b: &T) -> bool { a < b }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extremum {
  Min,
  Max,
}

impl Extremum {
  /// Whether `candidate` takes the place of `current`.
  fn replaces<T, E>(
    self, current: &T, candidate: &T, are_in_increasing_order: impl FnOnce(&T, &T) -> Result<bool, E>,
  ) -> Result<bool, E> {
    match self {
      Extremum::Max => are_in_increasing_order(current, candidate),
      Extremum::Min => are_in_increasing_order(candidate, current),
    }
  }
}

// ==================== Publishers ====================

pub struct Comparison<P, C> {
  source: P,
  are_in_increasing_order: Arc<C>,
  extremum: Extremum,
}

impl<P: Clone, C> Clone for Comparison<P, C> {
  fn clone(&self) -> Self {
    Comparison {
      source: self.source.clone(),
      are_in_increasing_order: self.are_in_increasing_order.clone(),
      extremum: self.extremum,
    }
  }
}

impl<P, C> Comparison<P, C> {
  pub fn new(source: P, are_in_increasing_order: C, extremum: Extremum) -> Self {
    Comparison { source, are_in_increasing_order: Arc::new(are_in_increasing_order), extremum }
  }
}

impl<P, C> Publisher for Comparison<P, C>
where
  P: Publisher,
  C: Fn(&P::Output, &P::Output) -> bool + Send + Sync + 'static,
{
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure> + 'static,
  {
    let fold = Ordered(self.are_in_increasing_order.clone(), self.extremum);
    self
      .source
      .subscribe(ReduceInner::<P::Output, P::Failure, S, _>::new(fold, subscriber))
  }
}

/// Like [`Comparison`], with a comparator that may fail the stream.
pub struct TryComparison<P, C> {
  source: P,
  are_in_increasing_order: Arc<C>,
  extremum: Extremum,
}

impl<P: Clone, C> Clone for TryComparison<P, C> {
  fn clone(&self) -> Self {
    TryComparison {
      source: self.source.clone(),
      are_in_increasing_order: self.are_in_increasing_order.clone(),
      extremum: self.extremum,
    }
  }
}

impl<P, C> TryComparison<P, C> {
  pub fn new(source: P, are_in_increasing_order: C, extremum: Extremum) -> Self {
    TryComparison { source, are_in_increasing_order: Arc::new(are_in_increasing_order), extremum }
  }
}

impl<P, C> Publisher for TryComparison<P, C>
where
  P: Publisher,
  C: Fn(&P::Output, &P::Output) -> Result<bool, P::Failure> + Send + Sync + 'static,
{
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure> + 'static,
  {
    let fold = TryOrdered(self.are_in_increasing_order.clone(), self.extremum);
    self
      .source
      .subscribe(ReduceInner::<P::Output, P::Failure, S, _>::new(fold, subscriber))
  }
}

// ==================== Folds ====================

trait Fold<O, F>: Send + Sync + 'static {
  const DESCRIPTION: &'static str;

  fn replaces(&self, current: &O, candidate: &O) -> Result<bool, F>;
}

struct Ordered<C>(Arc<C>, Extremum);

impl<O, F, C> Fold<O, F> for Ordered<C>
where
  C: Fn(&O, &O) -> bool + Send + Sync + 'static,
{
  const DESCRIPTION: &'static str = "Comparison";

  fn replaces(&self, current: &O, candidate: &O) -> Result<bool, F> {
    self.1.replaces(current, candidate, |a, b| Ok((self.0)(a, b)))
  }
}

struct TryOrdered<C>(Arc<C>, Extremum);

impl<O, F, C> Fold<O, F> for TryOrdered<C>
where
  C: Fn(&O, &O) -> Result<bool, F> + Send + Sync + 'static,
{
  const DESCRIPTION: &'static str = "TryComparison";

  fn replaces(&self, current: &O, candidate: &O) -> Result<bool, F> {
    self.1.replaces(current, candidate, |a, b| (self.0)(a, b))
  }
}

// ==================== Inner ====================

struct ReduceState<O, D> {
  upstream: SubscriptionStatus,
  downstream: Option<Arc<D>>,
  result: Option<O>,
  downstream_requested: bool,
  upstream_finished: bool,
}

struct ReduceInner<O, F, D, R> {
  me: Weak<Self>,
  fold: R,
  state: Mutex<ReduceState<O, D>>,
  _failure: PhantomData<fn(F)>,
}

impl<O, F, D, R> ReduceInner<O, F, D, R>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  R: Fold<O, F>,
{
  fn new(fold: R, downstream: D) -> Arc<Self> {
    Arc::new_cyclic(|me| ReduceInner {
      me: me.clone(),
      fold,
      state: Mutex::new(ReduceState {
        upstream: SubscriptionStatus::AwaitingSubscription,
        downstream: Some(Arc::new(downstream)),
        result: None,
        downstream_requested: false,
        upstream_finished: false,
      }),
      _failure: PhantomData,
    })
  }

  fn fail(&self, error: F) {
    let mut state = self.state.lock();
    let upstream = state.upstream.terminate();
    state.result = None;
    let downstream = state.downstream.take();
    drop(state);
    debug!(target: "recombine::comparison", "comparator failed");
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
    if let Some(downstream) = downstream {
      downstream.receive_completion(Completion::Failure(error));
    }
  }
}

fn publish_and_finish<O, F, D: Subscriber<O, F>>(downstream: Arc<D>, result: Option<O>) {
  if let Some(result) = result {
    downstream.receive(result);
  }
  downstream.receive_completion(Completion::Finished);
}

impl<O, F, D, R> Subscriber<O, F> for ReduceInner<O, F, D, R>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  R: Fold<O, F>,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if !state.upstream.is_awaiting() {
      drop(state);
      debug!(target: "recombine::comparison", "cancelling redundant subscription");
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
    // The comparator runs unlocked.
    let current = state.result.take();
    drop(state);

    let next = match current {
      None => input,
      Some(current) => match self.fold.replaces(&current, &input) {
        Ok(true) => input,
        Ok(false) => current,
        Err(error) => {
          self.fail(error);
          return Demand::NONE;
        }
      },
    };

    let mut state = self.state.lock();
    if state.upstream.is_subscribed() {
      state.result = Some(next);
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let mut state = self.state.lock();
    if !state.upstream.is_subscribed() {
      return;
    }
    let upstream = state.upstream.terminate();
    match completion {
      Completion::Finished => {
        state.upstream_finished = true;
        if !state.downstream_requested && state.result.is_some() {
          drop(state);
          drop(upstream);
          return;
        }
        let result = state.result.take();
        let downstream = state.downstream.take();
        drop(state);
        drop(upstream);
        if let Some(downstream) = downstream {
          publish_and_finish(downstream, result);
        }
      }
      failure => {
        state.result = None;
        let downstream = state.downstream.take();
        drop(state);
        drop(upstream);
        if let Some(downstream) = downstream {
          downstream.receive_completion(failure);
        }
      }
    }
  }
}

impl<O, F, D, R> Subscription for ReduceInner<O, F, D, R>
where
  O: Send + 'static,
  F: Send + 'static,
  D: Subscriber<O, F> + 'static,
  R: Fold<O, F>,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let mut state = self.state.lock();
    if state.downstream_requested || state.downstream.is_none() {
      return;
    }
    state.downstream_requested = true;
    if !state.upstream_finished {
      return;
    }
    let result = state.result.take();
    let downstream = state.downstream.take();
    drop(state);
    if let Some(downstream) = downstream {
      publish_and_finish(downstream, result);
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    let upstream = state.upstream.terminate();
    state.result = None;
    let downstream = state.downstream.take();
    drop(state);
    drop(downstream);
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  fn description(&self) -> &'static str { R::DESCRIPTION }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    publishers::Sequence,
    testing::{Event, SubscriptionEvent, TestPublisher, TestingError, TrackingSubscriber},
  };

  type Source = TestPublisher<i32, TestingError>;

  #[recombine_macro::test]
  fn max_of_a_sequence() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    Sequence::<_, TestingError>::new(vec![3, 7, 2, 7, 5]).max().subscribe(tracking.clone());
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Comparison"), Event::Value(7), Event::Completion(Completion::Finished)]
    );
  }

  #[recombine_macro::test]
  fn min_requests_everything_and_waits_for_completion() {
    let source = Source::default();
    let tracking = TrackingSubscriber::new(Demand::max(1));
    source.clone().min().subscribe(tracking.clone());
    assert_eq!(source.subscription().history(), vec![SubscriptionEvent::Requested(Demand::Unlimited)]);
    source.send(4);
    source.send(-2);
    source.send(9);
    assert!(tracking.values().is_empty());
    source.send_completion(Completion::Finished);
    assert_eq!(tracking.values(), vec![-2]);
    assert_eq!(tracking.completions(), vec![Completion::Finished]);
  }

  #[recombine_macro::test]
  fn result_waits_for_downstream_demand() {
    let source = Source::default();
    let tracking = TrackingSubscriber::new(Demand::NONE);
    source.clone().max().subscribe(tracking.clone());
    source.send(1);
    source.send_completion(Completion::Finished);
    assert_eq!(tracking.history(), vec![Event::Subscription("Comparison")]);

    tracking.request(Demand::max(1));
    tracking.request(Demand::max(1));
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Comparison"), Event::Value(1), Event::Completion(Completion::Finished)]
    );
  }

  #[recombine_macro::test]
  fn empty_upstream_finishes_without_demand() {
    let source = Source::default();
    let tracking = TrackingSubscriber::new(Demand::NONE);
    source.clone().min().subscribe(tracking.clone());
    source.send_completion(Completion::Finished);
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Comparison"), Event::Completion(Completion::Finished)]
    );
  }

  #[recombine_macro::test]
  fn first_of_equal_values_wins() {
    let source = TestPublisher::<(i32, char), TestingError>::default();
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    source.clone().max_by(|a, b| a.0 < b.0).subscribe(tracking.clone());
    source.send((1, 'a'));
    source.send((2, 'b'));
    source.send((2, 'c'));
    source.send_completion(Completion::Finished);
    assert_eq!(tracking.values(), vec![(2, 'b')]);

    let source = TestPublisher::<&str, TestingError>::default();
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    source.clone().min_by(|a, b| a.len() < b.len()).subscribe(tracking.clone());
    for word in ["ccc", "a", "bb", "z"] {
      source.send(word);
    }
    source.send_completion(Completion::Finished);
    assert_eq!(tracking.values(), vec!["a"]);
  }

  #[recombine_macro::test]
  fn comparator_error_fails_and_cancels_upstream() {
    let source = Source::default();
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    source
      .clone()
      .try_max_by(|a, b| if *b == 13 { Err(TestingError::Oops) } else { Ok(a < b) })
      .subscribe(tracking.clone());
    source.send(1);
    source.send(13);
    source.send(20);
    source.send_completion(Completion::Finished);
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("TryComparison"),
        Event::Completion(Completion::Failure(TestingError::Oops)),
      ]
    );
    assert_eq!(source.subscription().cancel_count(), 1);
  }

  #[recombine_macro::test]
  fn upstream_failure_is_forwarded() {
    let source = Source::default();
    let tracking = TrackingSubscriber::new(Demand::NONE);
    source.clone().try_min_by(|a, b| Ok(a < b)).subscribe(tracking.clone());
    source.send(1);
    source.send_completion(Completion::Failure(TestingError::Other));
    assert_eq!(tracking.completions(), vec![Completion::Failure(TestingError::Other)]);
    assert!(tracking.values().is_empty());
  }

  #[recombine_macro::test]
  fn cancel_suppresses_the_result() {
    let source = Source::default();
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    source.clone().max().subscribe(tracking.clone());
    source.send(1);
    tracking.cancel();
    tracking.cancel();
    source.send_completion(Completion::Finished);
    assert_eq!(tracking.history(), vec![Event::Subscription("Comparison")]);
    assert_eq!(source.subscription().cancel_count(), 1);
  }

  #[recombine_macro::test]
  #[should_panic(expected = "demand must not be zero")]
  fn zero_request_panics() {
    let source = Source::default();
    let tracking = TrackingSubscriber::new(Demand::NONE);
    source.clone().max().subscribe(tracking.clone());
    tracking.request(Demand::NONE);
  }
}
