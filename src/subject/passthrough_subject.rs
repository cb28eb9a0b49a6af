use std::sync::Arc;

use super::{subject_core::SubjectCore, Subject};
use crate::{
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SubscriptionRef,
};

/// Broadcasts values to its current subscribers without keeping any of them.
pub struct PassthroughSubject<O, F>(Arc<SubjectCore<O, F>>);

impl<O, F> PassthroughSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  pub fn new() -> Self { PassthroughSubject(SubjectCore::passthrough()) }
}

impl<O, F> Default for PassthroughSubject<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  fn default() -> Self { Self::new() }
}

impl<O, F> Clone for PassthroughSubject<O, F> {
  fn clone(&self) -> Self { PassthroughSubject(self.0.clone()) }
}

impl<O, F> Publisher for PassthroughSubject<O, F>
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

impl<O, F> Subject for PassthroughSubject<O, F>
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
