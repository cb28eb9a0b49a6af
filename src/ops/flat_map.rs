//! Maps every upstream value to an inner publisher and merges their outputs.
//!
//! At most `max_publishers` inner publishers are subscribed at a time: that
//! much is requested from upstream up front and one more each time an inner
//! publisher finishes. Every inner publisher gets a lookahead of one value,
//! or unlimited demand once the downstream asked for unlimited.
//!
//! Values that arrive without downstream demand are queued together with the
//! subscription of the inner publisher that sent them, which is asked for
//! one more value once its queued value went out.

use std::{
  collections::{HashMap, VecDeque},
  sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Subscription, SubscriptionRef, SubscriptionStatus},
};

pub struct FlatMap<P, F> {
  source: P,
  max_publishers: Demand,
  transform: Arc<F>,
}

impl<P, F> FlatMap<P, F> {
  /// # Panics
  ///
  /// Panics if `max_publishers` is zero.
  pub fn new(source: P, max_publishers: Demand, transform: F) -> Self {
    assert!(!max_publishers.is_none(), "max_publishers must not be zero");
    FlatMap { source, max_publishers, transform: Arc::new(transform) }
  }
}

impl<P, F, C> Publisher for FlatMap<P, F>
where
  P: Publisher,
  F: Fn(P::Output) -> C + Send + Sync + 'static,
  C: Publisher<Failure = P::Failure> + 'static,
{
  type Output = C::Output;
  type Failure = P::Failure;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<C::Output, P::Failure> + 'static,
  {
    let inner: Arc<FlatMapInner<C, F, S>> = Arc::new_cyclic(|me| FlatMapInner {
      me: me.clone(),
      max_publishers: self.max_publishers,
      transform: self.transform.clone(),
      state: Mutex::new(FlatMapState {
        outer: SubscriptionStatus::AwaitingSubscription,
        outer_finished: false,
        downstream: Some(Arc::new(subscriber)),
        demand: Demand::NONE,
        children: HashMap::new(),
        next_child: 0,
        queue: VecDeque::new(),
        processing: false,
        finish_after_drain: false,
        terminated: false,
      }),
    });
    self.source.receive_subscriber(inner)
  }
}

// ==================== Inner ====================

struct FlatMapState<T, D> {
  outer: SubscriptionStatus,
  outer_finished: bool,
  downstream: Option<Arc<D>>,
  demand: Demand,
  // Live inner publishers; `None` until their subscription arrived.
  children: HashMap<usize, Option<SubscriptionRef>>,
  next_child: usize,
  // Values waiting for demand, each with the subscription of the inner
  // publisher left without demand by it.
  queue: VecDeque<(T, Option<SubscriptionRef>)>,
  processing: bool,
  finish_after_drain: bool,
  terminated: bool,
}

impl<T, D> FlatMapState<T, D> {
  fn demand_for_child(&self) -> Demand {
    if self.demand.is_unlimited() { Demand::Unlimited } else { Demand::max(1) }
  }

  /// Flags completion once nothing can produce values anymore. Returns whether
  /// the caller has to run the queue.
  fn check_finished(&mut self) -> bool {
    if self.outer_finished && self.children.is_empty() {
      self.finish_after_drain = true;
      if !self.processing {
        self.processing = true;
        return true;
      }
    }
    false
  }

  /// Drops everything; returns the subscriptions to cancel and the downstream.
  fn terminate(&mut self) -> (Vec<SubscriptionRef>, Option<Arc<D>>) {
    self.terminated = true;
    let mut cancel: Vec<_> = self.outer.terminate().into_iter().collect();
    cancel.extend(self.children.drain().filter_map(|(_, child)| child));
    self.queue.clear();
    (cancel, self.downstream.take())
  }
}

struct FlatMapInner<C: Publisher, F, D> {
  me: Weak<Self>,
  max_publishers: Demand,
  transform: Arc<F>,
  state: Mutex<FlatMapState<C::Output, D>>,
}

impl<C, F, D> FlatMapInner<C, F, D>
where
  C: Publisher,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn process_queue(&self) {
    loop {
      let mut state = self.state.lock();
      if state.terminated {
        state.processing = false;
        return;
      }
      let Some(downstream) = state.downstream.clone() else { return };
      if state.demand.is_none() || state.queue.is_empty() {
        if state.finish_after_drain && state.queue.is_empty() {
          let (cancel, _) = state.terminate();
          drop(state);
          drop(cancel);
          downstream.receive_completion(Completion::Finished);
        } else {
          state.processing = false;
        }
        return;
      }
      let Some((value, paused)) = state.queue.pop_front() else { return };
      state.demand -= 1;
      drop(state);

      let more = downstream.receive(value);
      if let Some(paused) = paused {
        paused.request(Demand::max(1));
      }
      if !more.is_none() {
        self.add_demand(more);
      }
    }
  }

  fn add_demand(&self, demand: Demand) {
    let mut state = self.state.lock();
    if state.terminated {
      return;
    }
    let became_unlimited = demand.is_unlimited() && !state.demand.is_unlimited();
    state.demand += demand;
    let children: Vec<_> = if became_unlimited {
      state.children.values().flatten().cloned().collect()
    } else {
      vec![]
    };
    drop(state);
    for child in children {
      child.request(Demand::Unlimited);
    }
  }

  fn fail(&self, error: C::Failure) {
    let mut state = self.state.lock();
    if state.terminated {
      return;
    }
    let (cancel, downstream) = state.terminate();
    drop(state);
    debug!(target: "recombine::flat_map", cancelled = cancel.len(), "failing");
    for subscription in cancel {
      subscription.cancel();
    }
    if let Some(downstream) = downstream {
      downstream.receive_completion(Completion::Failure(error));
    }
  }

  fn child_subscription(&self, id: usize, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    let demand = state.demand_for_child();
    match state.children.get_mut(&id) {
      Some(slot @ None) => *slot = Some(subscription.clone()),
      _ => {
        drop(state);
        debug!(target: "recombine::flat_map", id, "cancelling unexpected inner subscription");
        subscription.cancel();
        return;
      }
    }
    drop(state);
    subscription.request(demand);
  }

  fn child_value(&self, id: usize, value: C::Output) -> Demand {
    let mut state = self.state.lock();
    if state.terminated || !state.children.contains_key(&id) {
      return Demand::NONE;
    }
    if state.demand <= state.queue.len() {
      let paused = state.children.get(&id).cloned().flatten();
      state.queue.push_back((value, paused));
      trace!(target: "recombine::flat_map", id, queued = state.queue.len(), "pausing inner");
      return Demand::NONE;
    }
    state.queue.push_back((value, None));
    let answer = if state.demand.is_unlimited() { Demand::NONE } else { Demand::max(1) };
    let process = !std::mem::replace(&mut state.processing, true);
    drop(state);
    if process {
      self.process_queue();
    }
    answer
  }

  fn child_completion(&self, id: usize, completion: Completion<C::Failure>) {
    let error = match completion {
      Completion::Finished => {
        let mut state = self.state.lock();
        if state.terminated || state.children.remove(&id).is_none() {
          return;
        }
        let replenish = if self.max_publishers.is_unlimited() {
          None
        } else {
          state.outer.subscription().cloned()
        };
        let process = state.check_finished();
        drop(state);
        if let Some(outer) = replenish {
          outer.request(Demand::max(1));
        }
        if process {
          self.process_queue();
        }
        return;
      }
      Completion::Failure(error) => error,
    };
    self.state.lock().children.remove(&id);
    self.fail(error);
  }
}

impl<I, C, F, D> Subscriber<I, C::Failure> for FlatMapInner<C, F, D>
where
  I: Send + 'static,
  C: Publisher + 'static,
  F: Fn(I) -> C + Send + Sync + 'static,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.state.lock();
    if !state.outer.is_awaiting() {
      drop(state);
      debug!(target: "recombine::flat_map", "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    state.outer = SubscriptionStatus::Subscribed(subscription.clone());
    let downstream = state.downstream.clone();
    drop(state);

    if let (Some(downstream), Some(me)) = (downstream, self.me.upgrade()) {
      downstream.receive_subscription(me);
    }
    subscription.request(self.max_publishers);
  }

  fn receive(&self, input: I) -> Demand {
    let mut state = self.state.lock();
    if state.terminated || !state.outer.is_subscribed() {
      return Demand::NONE;
    }
    let id = state.next_child;
    state.next_child += 1;
    state.children.insert(id, None);
    trace!(target: "recombine::flat_map", id, live = state.children.len(), "subscribing inner");
    drop(state);

    let Some(parent) = self.me.upgrade() else { return Demand::NONE };
    (self.transform)(input).subscribe(FlatMapChild { parent, id });
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<C::Failure>) {
    match completion {
      Completion::Finished => {
        let mut state = self.state.lock();
        if state.terminated || state.outer_finished {
          return;
        }
        state.outer_finished = true;
        let outer = state.outer.terminate();
        let process = state.check_finished();
        drop(state);
        drop(outer);
        if process {
          self.process_queue();
        }
      }
      Completion::Failure(error) => self.fail(error),
    }
  }
}

impl<C, F, D> Subscription for FlatMapInner<C, F, D>
where
  C: Publisher,
  F: Send + Sync,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn request(&self, demand: Demand) {
    demand.assert_non_zero();
    let mut state = self.state.lock();
    if state.terminated {
      return;
    }
    let became_unlimited = demand.is_unlimited() && !state.demand.is_unlimited();
    state.demand += demand;
    let children: Vec<_> = if became_unlimited {
      state.children.values().flatten().cloned().collect()
    } else {
      vec![]
    };
    let process = !std::mem::replace(&mut state.processing, true);
    drop(state);

    for child in children {
      child.request(Demand::Unlimited);
    }
    if process {
      self.process_queue();
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

  fn description(&self) -> &'static str { "FlatMap" }
}

// ==================== Child ====================

struct FlatMapChild<C: Publisher, F, D> {
  parent: Arc<FlatMapInner<C, F, D>>,
  id: usize,
}

impl<C, F, D> Subscriber<C::Output, C::Failure> for FlatMapChild<C, F, D>
where
  C: Publisher,
  F: Send + Sync,
  D: Subscriber<C::Output, C::Failure> + 'static,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    self.parent.child_subscription(self.id, subscription)
  }

  fn receive(&self, input: C::Output) -> Demand { self.parent.child_value(self.id, input) }

  fn receive_completion(&self, completion: Completion<C::Failure>) {
    self.parent.child_completion(self.id, completion)
  }
}
