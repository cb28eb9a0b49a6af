//! Simple source publishers: [`Just`], [`Empty`], [`Fail`] and [`Sequence`].

use std::{iter::Peekable, marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{empty, Subscription},
};

// ==================== Just ====================

/// Publishes one value, then finishes.
pub struct Just<O, F> {
  value: O,
  _failure: PhantomData<fn() -> F>,
}

impl<O, F> Just<O, F> {
  pub fn new(value: O) -> Self { Just { value, _failure: PhantomData } }
}

impl<O: Clone, F> Clone for Just<O, F> {
  fn clone(&self) -> Self { Just::new(self.value.clone()) }
}

impl<O, F> Publisher for Just<O, F>
where
  O: Clone + Send + 'static,
  F: Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F> + 'static,
  {
    let subscriber = Arc::new(subscriber);
    let inner = Arc::new(JustInner {
      pending: Mutex::new(Some((self.value.clone(), subscriber.clone()))),
      _failure: PhantomData::<fn() -> F>,
    });
    subscriber.receive_subscription(inner);
  }
}

struct JustInner<O, D, F> {
  pending: Mutex<Option<(O, Arc<D>)>>,
  _failure: PhantomData<fn() -> F>,
}

impl<O, D, F> Subscription for JustInner<O, D, F>
where
  O: Send,
  D: Subscriber<O, F>,
{
  fn request(&self, demand: Demand) {
    if demand.is_none() {
      return;
    }
    let pending = self.pending.lock().take();
    if let Some((value, downstream)) = pending {
      downstream.receive(value);
      downstream.receive_completion(Completion::Finished);
    }
  }

  fn cancel(&self) { self.pending.lock().take(); }

  fn description(&self) -> &'static str { "Just" }
}

// ==================== Empty / Fail ====================

/// Finishes right after subscription.
pub struct Empty<O, F>(PhantomData<fn() -> (O, F)>);

impl<O, F> Empty<O, F> {
  pub fn new() -> Self { Empty(PhantomData) }
}

impl<O, F> Default for Empty<O, F> {
  fn default() -> Self { Self::new() }
}

impl<O, F> Clone for Empty<O, F> {
  fn clone(&self) -> Self { Self::new() }
}

impl<O, F> Publisher for Empty<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F> + 'static,
  {
    subscriber.receive_subscription(empty());
    subscriber.receive_completion(Completion::Finished);
  }
}

/// Fails with a copy of its error right after subscription.
pub struct Fail<O, F> {
  error: F,
  _output: PhantomData<fn() -> O>,
}

impl<O, F> Fail<O, F> {
  pub fn new(error: F) -> Self { Fail { error, _output: PhantomData } }
}

impl<O, F: Clone> Clone for Fail<O, F> {
  fn clone(&self) -> Self { Fail::new(self.error.clone()) }
}

impl<O, F> Publisher for Fail<O, F>
where
  O: Send + 'static,
  F: Clone + Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F> + 'static,
  {
    subscriber.receive_subscription(empty());
    subscriber.receive_completion(Completion::Failure(self.error.clone()));
  }
}

// ==================== Sequence ====================

/// Publishes the items of a collection as demand arrives, then finishes.
///
/// The collection is cloned for every subscriber.
pub struct Sequence<I, F> {
  items: I,
  _failure: PhantomData<fn() -> F>,
}

impl<I, F> Sequence<I, F> {
  pub fn new(items: I) -> Self { Sequence { items, _failure: PhantomData } }
}

impl<I: Clone, F> Clone for Sequence<I, F> {
  fn clone(&self) -> Self { Sequence::new(self.items.clone()) }
}

impl<I, F> Publisher for Sequence<I, F>
where
  I: IntoIterator + Clone,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
  F: Send + 'static,
{
  type Output = I::Item;
  type Failure = F;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<I::Item, F> + 'static,
  {
    let mut iter = self.items.clone().into_iter().peekable();
    if iter.peek().is_none() {
      subscriber.receive_subscription(empty());
      subscriber.receive_completion(Completion::Finished);
      return;
    }
    let subscriber = Arc::new(subscriber);
    let inner = Arc::new(SequenceInner {
      state: Mutex::new(SequenceState {
        iter,
        downstream: Some(subscriber.clone()),
        pending: Demand::NONE,
        emitting: false,
      }),
      _failure: PhantomData::<fn() -> F>,
    });
    subscriber.receive_subscription(inner);
  }
}

struct SequenceState<It: Iterator, D> {
  iter: Peekable<It>,
  downstream: Option<Arc<D>>,
  pending: Demand,
  emitting: bool,
}

struct SequenceInner<It: Iterator, D, F> {
  state: Mutex<SequenceState<It, D>>,
  _failure: PhantomData<fn() -> F>,
}

impl<It, D, F> Subscription for SequenceInner<It, D, F>
where
  It: Iterator + Send,
  It::Item: Send,
  D: Subscriber<It::Item, F>,
{
  fn request(&self, demand: Demand) {
    let mut state = self.state.lock();
    if state.downstream.is_none() {
      return;
    }
    state.pending += demand;
    // A request from inside `receive` only raises the pending demand; the
    // outer loop delivers.
    if state.emitting {
      return;
    }
    state.emitting = true;
    loop {
      if state.pending.is_none() {
        state.emitting = false;
        return;
      }
      let Some(downstream) = state.downstream.clone() else { return };
      let Some(value) = state.iter.next() else { return };
      state.pending -= 1;
      let exhausted = state.iter.peek().is_none();
      if exhausted {
        state.downstream = None;
      }
      drop(state);

      let more = downstream.receive(value);
      if exhausted {
        downstream.receive_completion(Completion::Finished);
        return;
      }

      state = self.state.lock();
      state.pending += more;
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    state.downstream = None;
    state.emitting = false;
  }

  fn description(&self) -> &'static str { "Sequence" }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{Event, TestingError, TrackingSubscriber};

  #[recombine_macro::test]
  fn just_waits_for_demand() {
    let tracking = TrackingSubscriber::<i32, TestingError>::new(Demand::NONE);
    Just::new(42).subscribe(tracking.clone());
    assert_eq!(tracking.history(), vec![Event::Subscription("Just")]);
    tracking.request(Demand::max(1));
    tracking.request(Demand::max(1));
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Just"), Event::Value(42), Event::Completion(Completion::Finished)]
    );
  }

  #[recombine_macro::test]
  fn fail_delivers_error() {
    let tracking = TrackingSubscriber::<i32, TestingError>::new(Demand::Unlimited);
    Fail::new(TestingError::Oops).subscribe(tracking.clone());
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("Empty"),
        Event::Completion(Completion::Failure(TestingError::Oops))
      ]
    );
  }

  #[recombine_macro::test]
  fn sequence_round_trip() {
    for demand in [Demand::max(3), Demand::max(10), Demand::Unlimited] {
      let tracking = TrackingSubscriber::<i32, TestingError>::new(demand);
      Sequence::new(vec![1, 2, 3]).subscribe(tracking.clone());
      assert_eq!(
        tracking.history(),
        vec![
          Event::Subscription("Sequence"),
          Event::Value(1),
          Event::Value(2),
          Event::Value(3),
          Event::Completion(Completion::Finished),
        ]
      );
    }
  }

  #[recombine_macro::test]
  fn sequence_respects_demand() {
    let tracking = TrackingSubscriber::<i32, TestingError>::new(Demand::max(2));
    Sequence::new(1..=5).subscribe(tracking.clone());
    assert_eq!(tracking.values(), vec![1, 2]);
    tracking.request(Demand::max(2));
    assert_eq!(tracking.values(), vec![1, 2, 3, 4]);
    tracking.cancel();
    tracking.request(Demand::max(2));
    assert_eq!(tracking.values(), vec![1, 2, 3, 4]);
    assert!(tracking.completions().is_empty());
  }

  #[recombine_macro::test]
  fn sequence_is_reentrancy_safe() {
    let tracking = TrackingSubscriber::<i32, TestingError>::new(Demand::max(1)).on_value(|me, _| {
      me.request(Demand::max(1));
      Demand::NONE
    });
    Sequence::new(vec![1, 2, 3]).subscribe(tracking.clone());
    assert_eq!(tracking.values(), vec![1, 2, 3]);
    assert_eq!(tracking.completions(), vec![Completion::Finished]);
  }

  #[recombine_macro::test]
  fn empty_sequence_finishes_immediately() {
    let tracking = TrackingSubscriber::<i32, TestingError>::new(Demand::NONE);
    Sequence::new(Vec::<i32>::new()).subscribe(tracking.clone());
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Empty"), Event::Completion(Completion::Finished)]
    );
  }
}
