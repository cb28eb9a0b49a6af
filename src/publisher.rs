//! The `Publisher` trait and its operator combinators.
//!
//! A publisher describes how to produce values. Nothing happens until a
//! subscriber is attached with [`Publisher::subscribe`]; each attachment
//! builds a fresh chain of operator state.
//!
//! ```rust
//! use recombine::prelude::*;
//!
//! let values = std::sync::Arc::new(parking_lot::Mutex::new(vec![]));
//! let sink = values.clone();
//! let _cancellable = Sequence::<_, std::convert::Infallible>::new(1..=4)
//!   .buffer(2, PrefetchStrategy::KeepFull, BufferingStrategy::DropOldest)
//!   .max()
//!   .sink(move |v| sink.lock().push(v));
//! assert_eq!(*values.lock(), vec![4]);
//! ```

use std::{sync::Arc, time::Duration};

use crate::{
  demand::Demand,
  error::TimeoutError,
  ops::{
    autoconnect::Autoconnect,
    buffer::{Buffer, BufferingStrategy, PrefetchStrategy},
    combine_latest::{CombineLatest, CombineLatest3, CombineLatest4},
    comparison::{natural_order, Comparison, Extremum, TryComparison},
    debounce::Debounce,
    flat_map::FlatMap,
    into_stream::IntoStream,
    map::Map,
    multicast::Multicast,
    share::Share,
    switch_to_latest::SwitchToLatest,
    throttle::Throttle,
    timeout::Timeout,
    zip::{Zip, Zip3, Zip4},
  },
  scheduler::Scheduler,
  subject::{PassthroughSubject, Subject, SubjectSubscriber},
  subscriber::{AnySubscriber, Completion, Subscriber},
  subscribers::Sink,
  subscription::AnyCancellable,
};

pub trait Publisher {
  type Output: Send + 'static;
  type Failure: Send + 'static;

  /// Attaches `subscriber`. Implementations must call
  /// `receive_subscription` on it exactly once before any other signal.
  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Output, Self::Failure> + 'static;

  #[inline]
  fn subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Output, Self::Failure> + 'static,
  {
    self.receive_subscriber(subscriber)
  }

  /// Feeds this publisher into `subject`. Cancelling the returned value
  /// detaches the subject from this publisher.
  fn subscribe_subject<Sub>(&self, subject: Sub) -> AnyCancellable
  where
    Sub: Subject<Output = Self::Output, Failure = Self::Failure>,
  {
    let subscriber = SubjectSubscriber::new(subject);
    self.receive_subscriber(subscriber.clone());
    AnyCancellable::from_cancellable(subscriber)
  }

  // ==================== Transform ====================

  fn map<T, F>(self, transform: F) -> Map<Self, F>
  where
    Self: Sized,
    F: Fn(Self::Output) -> T + Send + Sync + 'static,
    T: Send + 'static,
  {
    Map::new(self, transform)
  }

  /// Queues values between this publisher and a slower subscriber.
  ///
  /// `size` is the capacity; `when_full` decides what happens when a value
  /// arrives while the queue is at capacity.
  fn buffer(
    self, size: usize, prefetch: PrefetchStrategy, when_full: BufferingStrategy<Self::Failure>,
  ) -> Buffer<Self>
  where
    Self: Sized,
  {
    Buffer::new(self, size, prefetch, when_full)
  }

  // ==================== Merge ====================

  /// Maps every value to a publisher and merges the outputs of at most
  /// `max_publishers` of them at a time.
  ///
  /// # Panics
  ///
  /// Panics if `max_publishers` is zero.
  fn flat_map<P, F>(self, max_publishers: Demand, transform: F) -> FlatMap<Self, F>
  where
    Self: Sized,
    F: Fn(Self::Output) -> P + Send + Sync + 'static,
    P: Publisher<Failure = Self::Failure>,
  {
    FlatMap::new(self, max_publishers, transform)
  }

  /// Republishes the values of the most recent inner publisher only.
  fn switch_to_latest(self) -> SwitchToLatest<Self>
  where
    Self: Sized,
    Self::Output: Publisher<Failure = Self::Failure>,
  {
    SwitchToLatest::new(self)
  }

  // ==================== Join ====================

  fn combine_latest<B>(self, other: B) -> CombineLatest<Self, B>
  where
    Self: Sized,
    B: Publisher<Failure = Self::Failure>,
  {
    CombineLatest::new(self, other)
  }

  fn combine_latest3<B, C>(self, b: B, c: C) -> CombineLatest3<Self, B, C>
  where
    Self: Sized,
    B: Publisher<Failure = Self::Failure>,
    C: Publisher<Failure = Self::Failure>,
  {
    CombineLatest3::new(self, b, c)
  }

  fn combine_latest4<B, C, D>(self, b: B, c: C, d: D) -> CombineLatest4<Self, B, C, D>
  where
    Self: Sized,
    B: Publisher<Failure = Self::Failure>,
    C: Publisher<Failure = Self::Failure>,
    D: Publisher<Failure = Self::Failure>,
  {
    CombineLatest4::new(self, b, c, d)
  }

  fn combine_latest_with<B, T, F>(self, other: B, transform: F) -> Map<CombineLatest<Self, B>, F>
  where
    Self: Sized,
    Self::Output: Clone,
    B: Publisher<Failure = Self::Failure>,
    B::Output: Clone,
    F: Fn((Self::Output, B::Output)) -> T + Send + Sync + 'static,
    T: Send + 'static,
  {
    Map::new(CombineLatest::new(self, other), transform)
  }

  fn zip<B>(self, other: B) -> Zip<Self, B>
  where
    Self: Sized,
    B: Publisher<Failure = Self::Failure>,
  {
    Zip::new(self, other)
  }

  fn zip3<B, C>(self, b: B, c: C) -> Zip3<Self, B, C>
  where
    Self: Sized,
    B: Publisher<Failure = Self::Failure>,
    C: Publisher<Failure = Self::Failure>,
  {
    Zip3::new(self, b, c)
  }

  fn zip4<B, C, D>(self, b: B, c: C, d: D) -> Zip4<Self, B, C, D>
  where
    Self: Sized,
    B: Publisher<Failure = Self::Failure>,
    C: Publisher<Failure = Self::Failure>,
    D: Publisher<Failure = Self::Failure>,
  {
    Zip4::new(self, b, c, d)
  }

  fn zip_with<B, T, F>(self, other: B, transform: F) -> Map<Zip<Self, B>, F>
  where
    Self: Sized,
    B: Publisher<Failure = Self::Failure>,
    F: Fn((Self::Output, B::Output)) -> T + Send + Sync + 'static,
    T: Send + 'static,
  {
    Map::new(Zip::new(self, other), transform)
  }

  // ==================== Multicast ====================

  /// Shares one subscription to this publisher through a subject created
  /// lazily by `create_subject`. Nothing flows before `connect()`.
  fn multicast<Sub, F>(self, create_subject: F) -> Multicast<Self, Sub>
  where
    Self: Sized + Send + Sync + 'static,
    Sub: Subject<Output = Self::Output, Failure = Self::Failure>,
    F: Fn() -> Sub + Send + Sync + 'static,
  {
    Multicast::new(self, create_subject)
  }

  fn multicast_subject<Sub>(self, subject: Sub) -> Multicast<Self, Sub>
  where
    Self: Sized + Send + Sync + 'static,
    Sub: Subject<Output = Self::Output, Failure = Self::Failure>,
  {
    Multicast::new(self, move || subject.clone())
  }

  /// Shares one connection among all current subscribers, connecting on the
  /// first one and disconnecting when the last one cancels.
  fn share(self) -> Share<Self>
  where
    Self: Sized + Send + Sync + 'static,
    Self::Output: Clone,
    Self::Failure: Clone,
  {
    Share::new(self)
  }

  // ==================== Time ====================

  /// Publishes a value only after `due_time` passed without another one.
  fn debounce<Sch: Scheduler>(self, due_time: Duration, scheduler: Sch) -> Debounce<Self, Sch>
  where
    Self: Sized,
  {
    Debounce::new(self, due_time, scheduler)
  }

  /// Publishes at most one value per `interval`. With `latest` the newest
  /// value seen in the interval wins, otherwise the first one.
  fn throttle<Sch: Scheduler>(
    self, interval: Duration, scheduler: Sch, latest: bool,
  ) -> Throttle<Self, Sch>
  where
    Self: Sized,
  {
    Throttle::new(self, interval, scheduler, latest)
  }

  /// Finishes when `interval` passes without a value from this publisher.
  fn timeout<Sch: Scheduler>(self, interval: Duration, scheduler: Sch) -> Timeout<Self, Sch>
  where
    Self: Sized,
  {
    Timeout::new(self, interval, scheduler, None)
  }

  /// Fails with `custom_error()` when `interval` passes without a value from
  /// this publisher.
  fn timeout_with<Sch, F>(self, interval: Duration, scheduler: Sch, custom_error: F) -> Timeout<Self, Sch>
  where
    Self: Sized,
    Sch: Scheduler,
    F: Fn() -> Self::Failure + Send + Sync + 'static,
  {
    Timeout::new(self, interval, scheduler, Some(Arc::new(custom_error)))
  }

  /// Fails with a [`TimeoutError`] when `interval` passes without a value.
  fn timeout_with_error<Sch: Scheduler>(self, interval: Duration, scheduler: Sch) -> Timeout<Self, Sch>
  where
    Self: Sized,
    Self::Failure: From<TimeoutError>,
  {
    let error = move || Self::Failure::from(TimeoutError { after: interval });
    Timeout::new(self, interval, scheduler, Some(Arc::new(error)))
  }

  // ==================== Comparison ====================

  fn min(self) -> Comparison<Self, fn(&Self::Output, &Self::Output) -> bool>
  where
    Self: Sized,
    Self::Output: Ord,
  {
    Comparison::new(self, natural_order as fn(&_, &_) -> bool, Extremum::Min)
  }

  fn max(self) -> Comparison<Self, fn(&Self::Output, &Self::Output) -> bool>
  where
    Self: Sized,
    Self::Output: Ord,
  {
    Comparison::new(self, natural_order as fn(&_, &_) -> bool, Extremum::Max)
  }

  /// Publishes the minimum once this publisher finishes.
  /// `are_in_increasing_order(a, b)` must return whether `a < b`.
  fn min_by<C>(self, are_in_increasing_order: C) -> Comparison<Self, C>
  where
    Self: Sized,
    C: Fn(&Self::Output, &Self::Output) -> bool + Send + Sync + 'static,
  {
    Comparison::new(self, are_in_increasing_order, Extremum::Min)
  }

  fn max_by<C>(self, are_in_increasing_order: C) -> Comparison<Self, C>
  where
    Self: Sized,
    C: Fn(&Self::Output, &Self::Output) -> bool + Send + Sync + 'static,
  {
    Comparison::new(self, are_in_increasing_order, Extremum::Max)
  }

  /// Like [`Publisher::min_by`] with a comparator that may fail.
  fn try_min_by<C>(self, are_in_increasing_order: C) -> TryComparison<Self, C>
  where
    Self: Sized,
    C: Fn(&Self::Output, &Self::Output) -> Result<bool, Self::Failure> + Send + Sync + 'static,
  {
    TryComparison::new(self, are_in_increasing_order, Extremum::Min)
  }

  fn try_max_by<C>(self, are_in_increasing_order: C) -> TryComparison<Self, C>
  where
    Self: Sized,
    C: Fn(&Self::Output, &Self::Output) -> Result<bool, Self::Failure> + Send + Sync + 'static,
  {
    TryComparison::new(self, are_in_increasing_order, Extremum::Max)
  }

  // ==================== Subscribe ====================

  /// Subscribes with unlimited demand, calling `on_value` for each value.
  fn sink<F>(&self, on_value: F) -> AnyCancellable
  where
    F: Fn(Self::Output) + Send + Sync + 'static,
  {
    self.sink_completion(|_| {}, on_value)
  }

  fn sink_completion<C, F>(&self, on_completion: C, on_value: F) -> AnyCancellable
  where
    C: Fn(Completion<Self::Failure>) + Send + Sync + 'static,
    F: Fn(Self::Output) + Send + Sync + 'static,
  {
    let sink = Sink::new(on_completion, on_value);
    self.receive_subscriber(sink.clone());
    AnyCancellable::from_cancellable(sink)
  }

  fn erase(self) -> AnyPublisher<Self::Output, Self::Failure>
  where
    Self: Sized + Send + Sync + 'static,
  {
    AnyPublisher::new(self)
  }

  /// Bridges into a `futures::Stream`, requesting one value per poll.
  fn into_stream(self) -> IntoStream<Self::Output, Self::Failure>
  where
    Self: Sized,
  {
    IntoStream::new(&self)
  }
}

// ==================== ConnectablePublisher ====================

/// A publisher that only subscribes upstream once `connect()` is called.
pub trait ConnectablePublisher: Publisher {
  fn connect(&self) -> AnyCancellable;

  /// Connects on the first subscriber and disconnects when the last one
  /// cancels.
  fn autoconnect(self) -> Autoconnect<Self>
  where
    Self: Sized + Send + Sync + 'static,
  {
    Autoconnect::new(self)
  }
}

// ==================== AnyPublisher ====================

trait DynPublisher<Output, Failure>: Send + Sync {
  fn receive_boxed(&self, subscriber: AnySubscriber<Output, Failure>);
}

impl<P> DynPublisher<P::Output, P::Failure> for P
where
  P: Publisher + Send + Sync,
{
  fn receive_boxed(&self, subscriber: AnySubscriber<P::Output, P::Failure>) {
    self.receive_subscriber(subscriber)
  }
}

/// A publisher with its concrete type erased.
pub struct AnyPublisher<Output, Failure>(Arc<dyn DynPublisher<Output, Failure>>);

impl<Output, Failure> AnyPublisher<Output, Failure>
where
  Output: Send + 'static,
  Failure: Send + 'static,
{
  pub fn new<P>(publisher: P) -> Self
  where
    P: Publisher<Output = Output, Failure = Failure> + Send + Sync + 'static,
  {
    AnyPublisher(Arc::new(publisher))
  }
}

impl<Output, Failure> Clone for AnyPublisher<Output, Failure> {
  fn clone(&self) -> Self { AnyPublisher(self.0.clone()) }
}

impl<Output, Failure> Publisher for AnyPublisher<Output, Failure>
where
  Output: Send + 'static,
  Failure: Send + 'static,
{
  type Output = Output;
  type Failure = Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<Output, Failure> + 'static,
  {
    self.0.receive_boxed(Box::new(subscriber))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    publishers::{Empty, Just, Sequence},
    testing::{Event, TestingError, TrackingSubscriber},
  };
  use parking_lot::Mutex;

  #[recombine_macro::test]
  fn erased_publisher_forwards() {
    let publisher: AnyPublisher<i32, TestingError> = Just::new(3).erase();
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    publisher.clone().subscribe(tracking.clone());
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Just"), Event::Value(3), Event::Completion(Completion::Finished)]
    );
  }

  #[recombine_macro::test]
  fn sink_collects_everything() {
    let values = Arc::new(Mutex::new(vec![]));
    let completions = Arc::new(Mutex::new(vec![]));
    let v = values.clone();
    let c = completions.clone();
    let _cancellable = Sequence::<_, TestingError>::new(vec![1, 2, 3]).sink_completion(
      move |completion| c.lock().push(completion),
      move |value| v.lock().push(value),
    );
    assert_eq!(*values.lock(), vec![1, 2, 3]);
    assert_eq!(*completions.lock(), vec![Completion::Finished]);
  }

  #[recombine_macro::test]
  fn subscribe_subject_relays_into_subject() {
    let subject = PassthroughSubject::<i32, TestingError>::new();
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    subject.subscribe(tracking.clone());
    let _connection = Sequence::new(vec![5, 6]).subscribe_subject(subject.clone());
    assert_eq!(
      tracking.history(),
      vec![
        Event::Subscription("PassthroughSubject"),
        Event::Value(5),
        Event::Value(6),
        Event::Completion(Completion::Finished),
      ]
    );
  }

  #[recombine_macro::test]
  fn empty_publisher_through_combinator_chain() {
    let tracking = TrackingSubscriber::new(Demand::Unlimited);
    Empty::<i32, TestingError>::new().map(|v| v * 2).subscribe(tracking.clone());
    assert_eq!(
      tracking.history(),
      vec![Event::Subscription("Empty"), Event::Completion(Completion::Finished)]
    );
  }
}
