//! Subscriber trait and its terminal signal.
//!
//! A subscriber receives exactly one subscription, then any number of values
//! (never more than it asked for), then at most one [`Completion`].
//!
//! All methods take `&self`: a subscriber is a shared endpoint that may be
//! re-entered from inside its own callbacks, so implementations keep their
//! state behind a lock and must release it before calling out.

use std::sync::Arc;

use crate::{demand::Demand, subscription::SubscriptionRef};

// ============================================================================
// Completion
// ============================================================================

/// The terminal signal of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completion<E> {
  Finished,
  Failure(E),
}

impl<E> Completion<E> {
  #[inline]
  pub fn is_finished(&self) -> bool { matches!(self, Completion::Finished) }

  #[inline]
  pub fn is_failure(&self) -> bool { matches!(self, Completion::Failure(_)) }

  pub fn map_failure<E2>(self, f: impl FnOnce(E) -> E2) -> Completion<E2> {
    match self {
      Completion::Finished => Completion::Finished,
      Completion::Failure(e) => Completion::Failure(f(e)),
    }
  }

  pub fn into_result(self) -> Result<(), E> {
    match self {
      Completion::Finished => Ok(()),
      Completion::Failure(e) => Err(e),
    }
  }
}

impl<E> From<Result<(), E>> for Completion<E> {
  fn from(result: Result<(), E>) -> Self {
    match result {
      Ok(()) => Completion::Finished,
      Err(e) => Completion::Failure(e),
    }
  }
}

// ============================================================================
// Subscriber Trait
// ============================================================================

pub trait Subscriber<Input, Failure>: Send + Sync {
  /// Called once when subscribing. A second call must cancel the new
  /// subscription and leave the first one untouched.
  fn receive_subscription(&self, subscription: SubscriptionRef);

  /// Delivers one value. The returned demand is added to what is still
  /// outstanding.
  fn receive(&self, input: Input) -> Demand;

  /// Delivers the terminal signal.
  fn receive_completion(&self, completion: Completion<Failure>);
}

/// A subscriber with its concrete type erased.
pub type AnySubscriber<Input, Failure> = Box<dyn Subscriber<Input, Failure>>;

impl<Input, Failure, S> Subscriber<Input, Failure> for Arc<S>
where
  S: Subscriber<Input, Failure> + ?Sized,
{
  #[inline]
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    (**self).receive_subscription(subscription)
  }

  #[inline]
  fn receive(&self, input: Input) -> Demand { (**self).receive(input) }

  #[inline]
  fn receive_completion(&self, completion: Completion<Failure>) {
    (**self).receive_completion(completion)
  }
}

impl<Input, Failure, S> Subscriber<Input, Failure> for Box<S>
where
  S: Subscriber<Input, Failure> + ?Sized,
{
  #[inline]
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    (**self).receive_subscription(subscription)
  }

  #[inline]
  fn receive(&self, input: Input) -> Demand { (**self).receive(input) }

  #[inline]
  fn receive_completion(&self, completion: Completion<Failure>) {
    (**self).receive_completion(completion)
  }
}
