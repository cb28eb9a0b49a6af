//! The handle a publisher hands to its subscriber.
//!
//! A subscriber pulls values by calling [`Subscription::request`] and stops
//! the flow with [`Subscription::cancel`]. Both may be called from any
//! context, including from inside the subscriber's own `receive` callback.
//! `cancel` is idempotent and a `request` after `cancel` has no effect.

use std::{
  fmt::{Debug, Formatter},
  sync::Arc,
};

use crate::demand::Demand;

mod cancellable;
mod status;

pub use cancellable::{AnyCancellable, Cancellable};
pub use status::SubscriptionStatus;

pub trait Subscription: Send + Sync {
  /// Grants the publisher `demand` more values.
  fn request(&self, demand: Demand);

  /// Stops the flow. Calling this more than once has no extra effect.
  fn cancel(&self);

  /// Human readable name used for diagnostics and tests.
  fn description(&self) -> &'static str { "Subscription" }
}

/// Shared, type erased subscription handle.
pub type SubscriptionRef = Arc<dyn Subscription>;

impl Debug for dyn Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("description", &self.description())
      .finish()
  }
}

/// A subscription that ignores requests and cancellation.
///
/// Publishers that terminate immediately hand this to their subscriber
/// before delivering the completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
  fn request(&self, _demand: Demand) {}

  fn cancel(&self) {}

  fn description(&self) -> &'static str { "Empty" }
}

/// Shorthand for an [`EmptySubscription`] behind a [`SubscriptionRef`].
pub fn empty() -> SubscriptionRef { Arc::new(EmptySubscription) }

impl<T: Subscription + ?Sized> Cancellable for Arc<T> {
  #[inline]
  fn cancel(&self) { Subscription::cancel(&**self) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{SubscriptionEvent, TestSubscription};

  #[recombine_macro::test]
  fn empty_subscription_is_inert() {
    let subscription = empty();
    subscription.request(Demand::Unlimited);
    subscription.cancel();
    subscription.cancel();
    assert_eq!(subscription.description(), "Empty");
  }

  #[recombine_macro::test]
  fn cancellable_through_arc() {
    let subscription = Arc::new(TestSubscription::new());
    Cancellable::cancel(&subscription);
    assert_eq!(subscription.history(), vec![SubscriptionEvent::Cancelled]);
  }
}
