//! Joins 2 to 4 publishers in lockstep.
//!
//! Every child value is queued; a tuple is published once every queue holds
//! a value and the downstream has demand, consuming the front of each queue.
//! Complete tuples formed without demand stay queued until demand arrives.
//!
//! Zip finishes as soon as some child finished with an empty queue, since no
//! further tuple can be formed. Once a tuple has been published, a finished
//! child whose surplus cannot complete another tuple right away finishes the
//! Zip as well, discarding that surplus. Both rules are checked after every
//! completion and after every published tuple, and the remaining children are
//! cancelled.
//!
//! Demand requested while a tuple triggered by child `k` is being delivered
//! reaches child `k` as the return value of its `receive` call and every
//! other child through `request`. Demand returned by the downstream's own
//! `receive` follows the same rule.

use std::{collections::VecDeque, marker::PhantomData, sync::Arc};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{
  demand::Demand,
  ops::join::{join_publisher, JoinBuffer, JoinParent, Queued, Upstreams},
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

join_publisher! {
  /// Pairs up the values of two publishers.
  Zip => ZipInner, Queued<VecDeque>, item: Send;
  A a, B b 1
}

join_publisher! {
  Zip3 => ZipInner, Queued<VecDeque>, item: Send;
  A a, B b 1, C c 2
}

join_publisher! {
  Zip4 => ZipInner, Queued<VecDeque>, item: Send;
  A a, B b 1, C c 2, D d 3
}

// ==================== Inner ====================

struct ZipState<B, D> {
  buffer: B,
  upstreams: Upstreams,
  downstream: Option<Arc<D>>,
  demand: Demand,
  // Everything the downstream asked for, handed to late child subscriptions.
  requested: Demand,
  delivering: bool,
  // The child whose value started the running delivery, if any.
  trigger: Option<usize>,
  // Demand owed to `trigger`, returned from its `receive`.
  owed: Demand,
  terminated: bool,
}

impl<B: JoinBuffer, D> ZipState<B, D> {
  /// `emitted` is set once the running drain published a tuple.
  fn should_finish(&self, emitted: bool) -> bool {
    let complete = (0..B::ARITY).all(|index| self.buffer.has_value(index));
    self
      .upstreams
      .finished()
      .any(|index| !self.buffer.has_value(index) || (emitted && !complete))
  }

  fn terminate(&mut self) -> (Vec<SubscriptionRef>, Option<Arc<D>>) {
    self.terminated = true;
    self.delivering = false;
    self.buffer.clear();
    (self.upstreams.take_all(), self.downstream.take())
  }

  /// Records new downstream demand and returns the children to forward it to.
  fn add_demand(&mut self, demand: Demand) -> Vec<SubscriptionRef> {
    self.demand += demand;
    self.requested += demand;
    if self.delivering && self.trigger.is_some() {
      self.owed += demand;
      self.upstreams.except(self.trigger)
    } else {
      self.upstreams.except(None)
    }
  }
}

struct ZipInner<B, F, D> {
  state: Mutex<ZipState<B, D>>,
  _failure: PhantomData<fn(F)>,
}

impl<B, F, D> ZipInner<B, F, D>
where
  B: JoinBuffer,
  F: Send + 'static,
  D: Subscriber<B::Output, F> + 'static,
{
  fn open(subscriber: D) -> Arc<Self> {
    let downstream = Arc::new(subscriber);
    let inner = Arc::new(ZipInner {
      state: Mutex::new(ZipState {
        buffer: B::default(),
        upstreams: Upstreams::new(B::ARITY),
        downstream: Some(downstream.clone()),
        demand: Demand::NONE,
        requested: Demand::NONE,
        delivering: false,
        trigger: None,
        owed: Demand::NONE,
        terminated: false,
      }),
      _failure: PhantomData,
    });
    downstream.receive_subscription(inner.clone());
    inner
  }

  /// Publishes tuples while there is demand. The caller has set
  /// `delivering`. Returns the demand owed to the triggering child.
  fn drain(&self) -> Demand {
    let mut emitted = false;
    loop {
      let mut state = self.state.lock();
      if state.terminated {
        return Demand::NONE;
      }
      if state.should_finish(emitted) {
        self.finish(state);
        return Demand::NONE;
      }
      let output = if state.demand.is_none() { None } else { state.buffer.take_output() };
      let (Some(output), Some(downstream)) = (output, state.downstream.clone()) else {
        state.delivering = false;
        state.trigger = None;
        return std::mem::replace(&mut state.owed, Demand::NONE);
      };
      state.demand -= 1;
      drop(state);

      let more = downstream.receive(output);
      emitted = true;
      if !more.is_none() {
        let mut state = self.state.lock();
        if state.terminated {
          return Demand::NONE;
        }
        let upstreams = state.add_demand(more);
        drop(state);
        for upstream in upstreams {
          upstream.request(more);
        }
      }
    }
  }

  fn finish(&self, mut state: MutexGuard<'_, ZipState<B, D>>) {
    let (cancel, downstream) = state.terminate();
    drop(state);
    trace!(target: "recombine::zip", cancelled = cancel.len(), "no further tuple possible");
    for subscription in cancel {
      subscription.cancel();
    }
    if let Some(downstream) = downstream {
      downstream.receive_completion(Completion::Finished);
    }
  }
}

impl<B, F, D> JoinParent for ZipInner<B, F, D>
where
  B: JoinBuffer,
  F: Send + 'static,
  D: Subscriber<B::Output, F> + 'static,
{
  type Buffer = B;
  type Failure = F;

  fn child_subscription(&self, index: usize, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if state.terminated || !state.upstreams.attach(index, &subscription) {
      drop(state);
      debug!(target: "recombine::zip", index, "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    let requested = state.requested;
    drop(state);
    if !requested.is_none() {
      subscription.request(requested);
    }
  }

  fn child_value(&self, index: usize, store: impl FnOnce(&mut B)) -> Demand {
    let mut state = self.state.lock();
    if state.terminated || state.upstreams.is_finished(index) {
      return Demand::NONE;
    }
    store(&mut state.buffer);
    if state.delivering || state.demand.is_none() {
      return Demand::NONE;
    }
    state.delivering = true;
    state.trigger = Some(index);
    drop(state);
    self.drain()
  }

  fn child_completion(&self, index: usize, completion: Completion<F>) {
    let mut state = self.state.lock();
    if state.terminated {
      return;
    }
    state.upstreams.finish(index);
    match completion {
      Completion::Finished => {
        // A running delivery checks again once the downstream returns.
        if !state.delivering && state.should_finish(false) {
          self.finish(state);
        }
      }
      Completion::Failure(error) => {
        let (cancel, downstream) = state.terminate();
        drop(state);
        debug!(target: "recombine::zip", index, "child failed");
        for subscription in cancel {
          subscription.cancel();
        }
        if let Some(downstream) = downstream {
          downstream.receive_completion(Completion::Failure(error));
        }
      }
    }
  }
}

impl<B, F, D> Subscription for ZipInner<B, F, D>
where
  B: JoinBuffer,
  F: Send + 'static,
  D: Subscriber<B::Output, F> + 'static,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let mut state = self.state.lock();
    if state.terminated {
      return;
    }
    let upstreams = state.add_demand(demand);
    let drain = !std::mem::replace(&mut state.delivering, true);
    drop(state);

    for upstream in upstreams {
      upstream.request(demand);
    }
    if drain {
      self.drain();
    }
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    if state.terminated {
      return;
    }
    let (cancel, downstream) = state.terminate();
    drop(state);
    drop(downstream);
    for subscription in cancel {
      subscription.cancel();
    }
  }

  fn description(&self) -> &'static str { "Zip" }
}
