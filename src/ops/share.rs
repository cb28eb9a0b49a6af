//! `share()`: a multicast through one `PassthroughSubject`, connected
//! automatically.
//!
//! Clones of a `Share` are the same shared publisher. Once the upstream
//! completed, later subscribers only receive that completion.

use crate::{
  ops::{autoconnect::Autoconnect, multicast::Multicast},
  publisher::{ConnectablePublisher, Publisher},
  subject::PassthroughSubject,
  subscriber::Subscriber,
};

type Shared<P> =
  Autoconnect<Multicast<P, PassthroughSubject<<P as Publisher>::Output, <P as Publisher>::Failure>>>;

pub struct Share<P: Publisher>(Shared<P>);

impl<P: Publisher> Clone for Share<P> {
  fn clone(&self) -> Self { Share(self.0.clone()) }
}

impl<P> Share<P>
where
  P: Publisher + Send + Sync + 'static,
  P::Output: Clone,
  P::Failure: Clone,
{
  pub fn new(source: P) -> Self { Share(source.multicast_subject(PassthroughSubject::new()).autoconnect()) }

  /// Whether the upstream is currently subscribed.
  pub fn is_connected(&self) -> bool { self.0.is_connected() }
}

impl<P> Publisher for Share<P>
where
  P: Publisher + Send + Sync + 'static,
  P::Output: Clone,
  P::Failure: Clone,
{
  type Output = P::Output;
  type Failure = P::Failure;

  #[inline]
  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure> + 'static,
  {
    self.0.receive_subscriber(subscriber)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    demand::Demand,
    subscriber::Completion,
    testing::{Event, TestPublisher, TestingError, TrackingSubscriber},
  };

  type Source = TestPublisher<i32, TestingError>;

  #[recombine_macro::test]
  fn subscribers_share_one_upstream_subscription() {
    let source = Source::default();
    let shared = source.clone().share();
    let first = TrackingSubscriber::new(Demand::Unlimited);
    let second = TrackingSubscriber::new(Demand::Unlimited);
    shared.subscribe(first.clone());
    source.send(1);
    shared.clone().subscribe(second.clone());
    source.send(2);

    assert_eq!(first.values(), vec![1, 2]);
    assert_eq!(second.values(), vec![2]);
    assert_eq!(source.subscription().total_requested(), Demand::Unlimited);
    assert_eq!(source.subscription().history().len(), 1);
  }

  #[recombine_macro::test]
  fn last_cancel_tears_down_and_next_subscriber_reconnects() {
    let source = Source::default();
    let shared = source.clone().share();
    let first = TrackingSubscriber::new(Demand::Unlimited);
    let second = TrackingSubscriber::new(Demand::Unlimited);
    shared.subscribe(first.clone());
    shared.subscribe(second.clone());
    first.cancel();
    assert!(shared.is_connected());
    second.cancel();
    assert!(!shared.is_connected());
    assert_eq!(source.subscription().cancel_count(), 1);

    let third = TrackingSubscriber::new(Demand::Unlimited);
    shared.subscribe(third.clone());
    source.send(3);
    assert_eq!(third.values(), vec![3]);
    assert!(first.values().is_empty());
  }

  #[recombine_macro::test]
  fn completion_reaches_everyone_and_late_subscribers() {
    let source = Source::default();
    let shared = source.clone().share();
    let early = TrackingSubscriber::new(Demand::Unlimited);
    shared.subscribe(early.clone());
    source.send_completion(Completion::Failure(TestingError::Oops));
    assert_eq!(early.completions(), vec![Completion::Failure(TestingError::Oops)]);

    let late = TrackingSubscriber::<i32, TestingError>::new(Demand::Unlimited);
    shared.subscribe(late.clone());
    assert_eq!(
      late.history(),
      vec![Event::Subscription("Multicast"), Event::Completion(Completion::Failure(TestingError::Oops))]
    );
  }
}
