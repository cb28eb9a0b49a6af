//! Reference counted connection management for connectable publishers.
//!
//! The first subscriber connects the upstream. Every downstream `cancel`
//! drops one reference and the connection is cancelled once none are left;
//! the next subscriber connects again. A subscriber that receives a terminal
//! signal keeps its reference, since the upstream is done anyway.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
  demand::Demand,
  publisher::{ConnectablePublisher, Publisher},
  subscriber::{Completion, Subscriber},
  subscription::{AnyCancellable, Cancellable, Subscription, SubscriptionRef},
};

enum Connection {
  Disconnected,
  // `cancellable` is `None` while `connect()` is still running.
  Connected { refcount: usize, cancellable: Option<AnyCancellable> },
}

struct AutoconnectShared<C> {
  upstream: C,
  connection: Mutex<Connection>,
}

impl<C> AutoconnectShared<C> {
  fn release(&self) {
    let mut connection = self.connection.lock();
    let Connection::Connected { refcount, .. } = &mut *connection else { return };
    if *refcount > 1 {
      *refcount -= 1;
      return;
    }
    let previous = std::mem::replace(&mut *connection, Connection::Disconnected);
    drop(connection);
    debug!(target: "recombine::autoconnect", "last subscriber left, disconnecting");
    if let Connection::Connected { cancellable: Some(cancellable), .. } = previous {
      cancellable.cancel();
    }
  }
}

pub struct Autoconnect<C>(Arc<AutoconnectShared<C>>);

impl<C> Clone for Autoconnect<C> {
  fn clone(&self) -> Self { Autoconnect(self.0.clone()) }
}

impl<C> Autoconnect<C> {
  pub fn new(upstream: C) -> Self {
    Autoconnect(Arc::new(AutoconnectShared {
      upstream,
      connection: Mutex::new(Connection::Disconnected),
    }))
  }

  /// Whether the upstream is currently connected.
  pub fn is_connected(&self) -> bool {
    matches!(*self.0.connection.lock(), Connection::Connected { .. })
  }
}

impl<C> Publisher for Autoconnect<C>
where
  C: ConnectablePublisher + Send + Sync + 'static,
{
  type Output = C::Output;
  type Failure = C::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<C::Output, C::Failure> + 'static,
  {
    let inner = AutoconnectSubscriber { parent: self.0.clone(), downstream: subscriber };
    let mut connection = self.0.connection.lock();
    match &mut *connection {
      Connection::Connected { refcount, .. } => {
        *refcount += 1;
        drop(connection);
        self.0.upstream.subscribe(inner);
      }
      Connection::Disconnected => {
        *connection = Connection::Connected { refcount: 1, cancellable: None };
        drop(connection);
        self.0.upstream.subscribe(inner);
        debug!(target: "recombine::autoconnect", "first subscriber, connecting");
        let cancellable = self.0.upstream.connect();
        let mut connection = self.0.connection.lock();
        match &mut *connection {
          Connection::Connected { cancellable: slot @ None, .. } => *slot = Some(cancellable),
          // Everybody left while connecting.
          _ => {
            drop(connection);
            cancellable.cancel();
          }
        }
      }
    }
  }
}

// ==================== Inner ====================

struct AutoconnectSubscriber<C, D> {
  parent: Arc<AutoconnectShared<C>>,
  downstream: D,
}

impl<C, D> Subscriber<C::Output, C::Failure> for AutoconnectSubscriber<C, D>
where
  C: ConnectablePublisher + Send + Sync + 'static,
  D: Subscriber<C::Output, C::Failure>,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    self.downstream.receive_subscription(Arc::new(ReleasingSubscription {
      parent: self.parent.clone(),
      upstream: subscription,
      released: AtomicBool::new(false),
    }))
  }

  #[inline]
  fn receive(&self, input: C::Output) -> Demand { self.downstream.receive(input) }

  #[inline]
  fn receive_completion(&self, completion: Completion<C::Failure>) {
    self.downstream.receive_completion(completion)
  }
}

/// Drops the subscriber's reference on the connection when cancelled.
struct ReleasingSubscription<C> {
  parent: Arc<AutoconnectShared<C>>,
  upstream: SubscriptionRef,
  released: AtomicBool,
}

impl<C: Send + Sync> Subscription for ReleasingSubscription<C> {
  #[inline]
  fn request(&self, demand: Demand) { self.upstream.request(demand) }

  fn cancel(&self) {
    if self.released.swap(true, Ordering::AcqRel) {
      return;
    }
    self.parent.release();
    self.upstream.cancel();
  }

  fn description(&self) -> &'static str { self.upstream.description() }
}
