//! Subjects: publishers that can be driven imperatively.
//!
//! A subject is both a [`Publisher`] with any number of subscribers and a
//! sink that values can be sent into, either directly with
//! [`Subject::send`] or by subscribing it to another publisher through
//! [`Publisher::subscribe_subject`].
//!
//! | Subject | On subscribe | Upstream demand |
//! |---------|--------------|-----------------|
//! | [`PassthroughSubject`] | nothing | unlimited once any subscriber requested |
//! | [`CurrentValueSubject`] | current value on first request | unlimited right away |
//!
//! Values are only delivered to subscribers with outstanding demand; a
//! subscriber without demand misses them. Late subscribers of a completed
//! subject receive the stored completion right after their subscription.
//!
//! ```rust
//! use recombine::prelude::*;
//!
//! let subject = PassthroughSubject::<i32, std::convert::Infallible>::new();
//! let seen = std::sync::Arc::new(parking_lot::Mutex::new(vec![]));
//! let s = seen.clone();
//! let _cancellable = subject.sink(move |v| s.lock().push(v));
//! subject.send(1);
//! subject.send(2);
//! assert_eq!(*seen.lock(), vec![1, 2]);
//! ```

use crate::{
  publisher::Publisher,
  subscriber::Completion,
  subscription::SubscriptionRef,
};

mod conduits;
mod current_value_subject;
mod passthrough_subject;
mod subject_core;
mod subject_subscriber;

pub use current_value_subject::CurrentValueSubject;
pub use passthrough_subject::PassthroughSubject;
pub use subject_subscriber::SubjectSubscriber;

pub trait Subject: Publisher + Clone + Send + Sync + 'static {
  /// Offers `value` to every subscriber with outstanding demand.
  fn send(&self, value: Self::Output);

  /// Completes every subscriber. Later sends are ignored.
  fn send_completion(&self, completion: Completion<Self::Failure>);

  /// Hands the subject a subscription to an upstream it is fed from.
  fn send_subscription(&self, subscription: SubscriptionRef);
}
