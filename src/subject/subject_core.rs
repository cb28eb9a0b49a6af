use std::{
  collections::VecDeque,
  sync::{Arc, Weak},
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::conduits::{broadcast, Conduits};
use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::{empty, Subscription, SubscriptionRef},
};

type Downstream<O, F> = Arc<dyn Subscriber<O, F>>;

// ============================================================================
// SubjectCore
// ============================================================================

/// State shared by every clone of a subject.
///
/// A value is offered to each attached conduit; a conduit without demand
/// drops it. Upstream subscriptions handed to the subject are asked for
/// unlimited demand once any downstream asked for something, or right away
/// when the subject replays its current value.
pub(crate) struct SubjectCore<O, F> {
  description: &'static str,
  replays_current: bool,
  state: Mutex<CoreState<O, F>>,
}

struct CoreState<O, F> {
  conduits: Conduits<Arc<Conduit<O, F>>>,
  upstreams: Vec<SubscriptionRef>,
  completion: Option<Completion<F>>,
  has_demand: bool,
  current: Option<O>,
}

impl<O, F> SubjectCore<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  pub fn passthrough() -> Arc<Self> { Self::new("PassthroughSubject", None) }

  pub fn current_value(value: O) -> Arc<Self> { Self::new("CurrentValueSubject", Some(value)) }

  fn new(description: &'static str, current: Option<O>) -> Arc<Self> {
    Arc::new(SubjectCore {
      description,
      replays_current: current.is_some(),
      state: Mutex::new(CoreState {
        conduits: Conduits::default(),
        upstreams: vec![],
        completion: None,
        has_demand: false,
        current,
      }),
    })
  }

  pub fn current(&self) -> Option<O> { self.state.lock().current.clone() }

  pub fn attach(self: &Arc<Self>, downstream: Downstream<O, F>) {
    let mut state = self.state.lock();
    if let Some(completion) = state.completion.clone() {
      drop(state);
      downstream.receive_subscription(empty());
      downstream.receive_completion(completion);
      return;
    }
    let id = state.conduits.reserve_id();
    let conduit = Arc::new(Conduit {
      id,
      description: self.description,
      parent: Arc::downgrade(self),
      state: Mutex::new(ConduitState {
        downstream: Some(downstream.clone()),
        demand: Demand::NONE,
        delivered_current: !self.replays_current,
        delivering: false,
        pending: VecDeque::new(),
      }),
    });
    state.conduits.insert(id, conduit.clone());
    trace!(target: "recombine::subject", subject = self.description, id, attached = state.conduits.len());
    drop(state);
    downstream.receive_subscription(conduit);
  }

  pub fn send(&self, value: O) {
    let conduits = {
      let mut state = self.state.lock();
      if state.completion.is_some() {
        return;
      }
      if self.replays_current {
        state.current = Some(value.clone());
      }
      state.conduits.snapshot()
    };
    broadcast(conduits, value, |conduit, value| conduit.offer(value));
  }

  pub fn send_completion(&self, completion: Completion<F>) {
    let (conduits, upstreams) = {
      let mut state = self.state.lock();
      if state.completion.is_some() {
        return;
      }
      state.completion = Some(completion.clone());
      (state.conduits.drain(), std::mem::take(&mut state.upstreams))
    };
    debug!(
      target: "recombine::subject",
      subject = self.description,
      failed = completion.is_failure(),
      conduits = conduits.len(),
      "completed"
    );
    drop(upstreams);
    broadcast(conduits, completion, |conduit, completion| conduit.finish(completion));
  }

  pub fn send_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if state.completion.is_some() {
      drop(state);
      subscription.cancel();
      return;
    }
    state.upstreams.push(subscription.clone());
    let request = self.replays_current || state.has_demand;
    drop(state);
    if request {
      subscription.request(Demand::Unlimited);
    }
  }

  fn demand_requested(&self) {
    let upstreams = {
      let mut state = self.state.lock();
      if state.has_demand {
        return;
      }
      state.has_demand = true;
      if self.replays_current {
        return;
      }
      state.upstreams.clone()
    };
    for upstream in upstreams {
      upstream.request(Demand::Unlimited);
    }
  }

  fn detach(&self, id: usize) {
    let removed = self.state.lock().conduits.remove(id);
    if removed.is_some() {
      trace!(target: "recombine::subject", subject = self.description, id, "detached");
    }
  }
}

impl<O, F> Drop for SubjectCore<O, F> {
  fn drop(&mut self) {
    for upstream in self.state.get_mut().upstreams.drain(..) {
      upstream.cancel();
    }
  }
}

// ============================================================================
// Conduit
// ============================================================================

/// The subscription a subject hands to one of its downstreams.
///
/// Signals are delivered one at a time. A signal offered while another one is
/// being delivered, for instance by a downstream sending into the same
/// subject from inside `receive`, is queued and delivered once that call
/// returns. No lock is held while the downstream runs.
struct Conduit<O, F> {
  id: usize,
  description: &'static str,
  parent: Weak<SubjectCore<O, F>>,
  state: Mutex<ConduitState<O, F>>,
}

enum Signal<O, F> {
  Value(O),
  Completion(Completion<F>),
}

struct ConduitState<O, F> {
  downstream: Option<Downstream<O, F>>,
  demand: Demand,
  delivered_current: bool,
  delivering: bool,
  // Signals already accounted against demand, waiting for the running delivery.
  pending: VecDeque<Signal<O, F>>,
}

impl<O, F> Conduit<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  fn offer(&self, value: O) {
    let mut state = self.state.lock();
    if state.downstream.is_none() {
      return;
    }
    if state.demand.is_none() {
      state.delivered_current = false;
      return;
    }
    state.demand -= 1;
    state.delivered_current = true;
    state.pending.push_back(Signal::Value(value));
    self.drain(state);
  }

  fn finish(&self, completion: Completion<F>) {
    let mut state = self.state.lock();
    if state.downstream.is_none() {
      return;
    }
    state.pending.push_back(Signal::Completion(completion));
    self.drain(state);
  }

  /// Delivers queued signals unless a delivery is already running further up
  /// the stack.
  fn drain<'a>(&'a self, mut state: MutexGuard<'a, ConduitState<O, F>>) {
    if std::mem::replace(&mut state.delivering, true) {
      return;
    }
    loop {
      let Some(signal) = state.pending.pop_front() else {
        state.delivering = false;
        return;
      };
      let Some(downstream) = state.downstream.clone() else {
        state.pending.clear();
        state.delivering = false;
        return;
      };
      match signal {
        Signal::Value(value) => {
          drop(state);
          let more = downstream.receive(value);
          state = self.state.lock();
          if state.downstream.is_some() {
            state.demand += more;
          }
        }
        Signal::Completion(completion) => {
          state.downstream = None;
          state.pending.clear();
          state.delivering = false;
          drop(state);
          downstream.receive_completion(completion);
          return;
        }
      }
    }
  }
}

impl<O, F> Subscription for Conduit<O, F>
where
  O: Clone + Send + 'static,
  F: Clone + Send + 'static,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let mut state = self.state.lock();
    if state.downstream.is_none() {
      return;
    }
    state.demand += demand;
    let replay = !std::mem::replace(&mut state.delivered_current, true);
    drop(state);

    let Some(parent) = self.parent.upgrade() else { return };
    if replay && parent.replays_current {
      if let Some(value) = parent.current() {
        let mut state = self.state.lock();
        if state.downstream.is_none() {
          return;
        }
        state.demand -= 1;
        state.pending.push_back(Signal::Value(value));
        self.drain(state);
      }
    }
    parent.demand_requested();
  }

  fn cancel(&self) {
    let mut state = self.state.lock();
    let downstream = state.downstream.take();
    state.pending.clear();
    drop(state);
    if downstream.is_none() {
      return;
    }
    if let Some(parent) = self.parent.upgrade() {
      parent.detach(self.id);
    }
  }

  fn description(&self) -> &'static str { self.description }
}
