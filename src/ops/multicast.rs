//! Shares one upstream subscription through a subject.
//!
//! Subscribers attach to the subject right away, but the upstream is only
//! subscribed once [`ConnectablePublisher::connect`] is called. The subject
//! is created lazily on first use and reused afterwards, so clones of a
//! `Multicast` share it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
  demand::Demand,
  publisher::{ConnectablePublisher, Publisher},
  subject::Subject,
  subscriber::{Completion, Subscriber},
  subscription::{AnyCancellable, Subscription, SubscriptionRef},
};

type SubjectFactory<Sub> = Box<dyn Fn() -> Sub + Send + Sync>;

struct MulticastShared<P, Sub> {
  source: P,
  create_subject: SubjectFactory<Sub>,
  subject: Mutex<Option<Sub>>,
}

pub struct Multicast<P, Sub>(Arc<MulticastShared<P, Sub>>);

impl<P, Sub> Clone for Multicast<P, Sub> {
  fn clone(&self) -> Self { Multicast(self.0.clone()) }
}

impl<P, Sub: Clone> Multicast<P, Sub> {
  pub fn new(source: P, create_subject: impl Fn() -> Sub + Send + Sync + 'static) -> Self {
    Multicast(Arc::new(MulticastShared {
      source,
      create_subject: Box::new(create_subject),
      subject: Mutex::new(None),
    }))
  }

  fn subject(&self) -> Sub {
    if let Some(subject) = self.0.subject.lock().clone() {
      return subject;
    }
    let created = (self.0.create_subject)();
    self.0.subject.lock().get_or_insert(created).clone()
  }
}

impl<P, Sub> Publisher for Multicast<P, Sub>
where
  P: Publisher,
  Sub: Subject<Output = P::Output, Failure = P::Failure>,
{
  type Output = P::Output;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Output, P::Failure> + 'static,
  {
    let inner = Arc::new_cyclic(|me| MulticastInner {
      me: me.clone(),
      state: Mutex::new(MulticastState::Ready(Arc::new(subscriber))),
    });
    self.subject().subscribe(inner)
  }
}

impl<P, Sub> ConnectablePublisher for Multicast<P, Sub>
where
  P: Publisher,
  Sub: Subject<Output = P::Output, Failure = P::Failure>,
{
  fn connect(&self) -> AnyCancellable {
    debug!(target: "recombine::multicast", "connecting");
    self.0.source.subscribe_subject(self.subject())
  }
}

// ==================== Inner ====================

enum MulticastState<D> {
  Ready(Arc<D>),
  Subscribed(Arc<D>, SubscriptionRef),
  Terminal,
}

/// Sits between the subject and one downstream.
struct MulticastInner<D> {
  me: Weak<Self>,
  state: Mutex<MulticastState<D>>,
}

impl<D> MulticastInner<D> {
  fn subscription(&self) -> Option<SubscriptionRef> {
    match &*self.state.lock() {
      MulticastState::Subscribed(_, subscription) => Some(subscription.clone()),
      _ => None,
    }
  }
}

impl<I, F, D> Subscriber<I, F> for MulticastInner<D>
where
  D: Subscriber<I, F> + 'static,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    let MulticastState::Ready(downstream) = &*state else {
      drop(state);
      debug!(target: "recombine::multicast", "cancelling redundant subscription");
      subscription.cancel();
      return;
    };
    let downstream = downstream.clone();
    *state = MulticastState::Subscribed(downstream.clone(), subscription);
    drop(state);
    if let Some(me) = self.me.upgrade() {
      downstream.receive_subscription(me);
    }
  }

  fn receive(&self, input: I) -> Demand {
    let downstream = match &*self.state.lock() {
      MulticastState::Subscribed(downstream, _) => downstream.clone(),
      _ => return Demand::NONE,
    };
    downstream.receive(input)
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let previous = std::mem::replace(&mut *self.state.lock(), MulticastState::Terminal);
    if let MulticastState::Subscribed(downstream, _) = previous {
      downstream.receive_completion(completion);
    }
  }
}

impl<D: Send + Sync> Subscription for MulticastInner<D> {
  fn request(&self, demand: Demand) {
    if let Some(subscription) = self.subscription() {
      subscription.request(demand);
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    if !matches!(*state, MulticastState::Subscribed(..)) {
      return;
    }
    let previous = std::mem::replace(&mut *state, MulticastState::Terminal);
    drop(state);
    if let MulticastState::Subscribed(_, subscription) = previous {
      subscription.cancel();
    }
  }

  fn description(&self) -> &'static str { "Multicast" }
}
