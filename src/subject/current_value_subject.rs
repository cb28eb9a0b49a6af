use std::sync::Arc;

use super::{subject_core::SubjectCore, Subject};
use crate::{
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SubscriptionRef,
};

/// Holds the latest value and replays it to every new subscriber on its first
/// request.
pub struct CurrentValueSubject<O, F>(Arc<SubjectCore<O, F>>);

impl<O, F> CurrentValueSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  pub fn new(value: O) -> Self { CurrentValueSubject(SubjectCore::current_value(value)) }

  /// The value most recently sent, or the initial one.
  pub fn value(&self) -> O {
    match self.0.current() {
      Some(value) => value,
      None => unreachable!("a current value subject always holds a value"),
    }
  }
}

impl<O, F> Clone for CurrentValueSubject<O, F> {
  fn clone(&self) -> Self { CurrentValueSubject(self.0.clone()) }
}

impl<O, F> Publisher for CurrentValueSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F> + 'static,
  {
    self.0.attach(Arc::new(subscriber))
  }
}

impl<O, F> Subject for CurrentValueSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  fn send(&self, value: O) { self.0.send(value) }

  fn send_completion(&self, completion: Completion<F>) { self.0.send_completion(completion) }

  fn send_subscription(&self, subscription: SubscriptionRef) {
    self.0.send_subscription(subscription)
  }
}
