use std::{marker::PhantomData, sync::Arc};

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::SubscriptionRef,
};

/// Transforms every value with a closure.
///
/// Demand and cancellation pass straight through, so the downstream sees the
/// upstream's own subscription.
pub struct Map<P, F> {
  source: P,
  transform: Arc<F>,
}

impl<P, F> Map<P, F> {
  pub fn new(source: P, transform: F) -> Self { Map { source, transform: Arc::new(transform) } }
}

impl<P: Clone, F> Clone for Map<P, F> {
  fn clone(&self) -> Self { Map { source: self.source.clone(), transform: self.transform.clone() } }
}

impl<P, F, T> Publisher for Map<P, F>
where
  P: Publisher,
  F: Fn(P::Output) -> T + Send + Sync + 'static,
  T: Send + 'static,
{
  type Output = T;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<T, P::Failure> + 'static,
  {
    self.source.receive_subscriber(MapSubscriber {
      downstream: subscriber,
      transform: self.transform.clone(),
      _input: PhantomData,
    })
  }
}

struct MapSubscriber<S, F, I> {
  downstream: S,
  transform: Arc<F>,
  _input: PhantomData<fn(I)>,
}

impl<S, F, I, T, E> Subscriber<I, E> for MapSubscriber<S, F, I>
where
  S: Subscriber<T, E>,
  F: Fn(I) -> T + Send + Sync,
{
  #[inline]
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    self.downstream.receive_subscription(subscription)
  }

  #[inline]
  fn receive(&self, input: I) -> Demand { self.downstream.receive((self.transform)(input)) }

  #[inline]
  fn receive_completion(&self, completion: Completion<E>) {
    self.downstream.receive_completion(completion)
  }
}
