//! Terminal subscribers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, SubscriptionRef, SubscriptionStatus},
};

type ValueCallback<I> = Box<dyn Fn(I) + Send + Sync>;
type CompletionCallback<F> = Box<dyn Fn(Completion<F>) + Send + Sync>;

struct SinkInner<I, F> {
  on_value: ValueCallback<I>,
  on_completion: CompletionCallback<F>,
  upstream: Mutex<SubscriptionStatus>,
}

/// Requests unlimited demand and hands every signal to a closure.
///
/// The upstream subscription is released on completion, and cancelling the
/// sink cancels it.
pub struct Sink<I, F>(Arc<SinkInner<I, F>>);

impl<I, F> Clone for Sink<I, F> {
  fn clone(&self) -> Self { Sink(self.0.clone()) }
}

impl<I, F> Sink<I, F> {
  pub fn new(
    on_completion: impl Fn(Completion<F>) + Send + Sync + 'static,
    on_value: impl Fn(I) + Send + Sync + 'static,
  ) -> Self {
    Sink(Arc::new(SinkInner {
      on_value: Box::new(on_value),
      on_completion: Box::new(on_completion),
      upstream: Mutex::new(SubscriptionStatus::AwaitingSubscription),
    }))
  }
}

impl<I, F> Subscriber<I, F> for Sink<I, F> {
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut upstream = self.0.upstream.lock();
    if !upstream.is_awaiting() {
      drop(upstream);
      subscription.cancel();
      return;
    }
    *upstream = SubscriptionStatus::Subscribed(subscription.clone());
    drop(upstream);
    subscription.request(Demand::Unlimited);
  }

  fn receive(&self, input: I) -> Demand {
    (self.0.on_value)(input);
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let upstream = self.0.upstream.lock().terminate();
    drop(upstream);
    (self.0.on_completion)(completion);
  }
}

impl<I, F> Cancellable for Sink<I, F> {
  fn cancel(&self) {
    let upstream = self.0.upstream.lock().terminate();
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    publisher::Publisher,
    testing::{SubscriptionEvent, TestPublisher, TestingError},
  };

  #[recombine_macro::test]
  fn requests_unlimited_and_cancels_once() {
    let publisher = TestPublisher::<i32, TestingError>::default();
    let values = Arc::new(Mutex::new(vec![]));
    let v = values.clone();
    let sink = Sink::new(|_| {}, move |value| v.lock().push(value));
    publisher.subscribe(sink.clone());
    publisher.send(1);
    sink.cancel();
    sink.cancel();
    assert_eq!(*values.lock(), vec![1]);
    assert_eq!(
      publisher.subscription().history(),
      vec![SubscriptionEvent::Requested(Demand::Unlimited), SubscriptionEvent::Cancelled]
    );
  }

  #[recombine_macro::test]
  fn completion_releases_upstream() {
    let publisher = TestPublisher::<i32, TestingError>::default();
    let completions = Arc::new(Mutex::new(vec![]));
    let c = completions.clone();
    let sink = Sink::new(move |completion| c.lock().push(completion), |_: i32| {});
    publisher.subscribe(sink.clone());
    publisher.send_completion(Completion::Failure(TestingError::Oops));
    sink.cancel();
    assert_eq!(*completions.lock(), vec![Completion::Failure(TestingError::Oops)]);
    assert_eq!(publisher.subscription().cancel_count(), 0);
  }
}
