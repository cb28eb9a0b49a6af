//! Joins 2 to 4 publishers, publishing a tuple of their latest values.
//!
//! Nothing is published until every child produced a value; after that every
//! value from any child publishes a new tuple, as long as the downstream has
//! demand. Downstream requests are forwarded to every child.
//!
//! | Event                                    | Result                          |
//! |------------------------------------------|---------------------------------|
//! | child finishes before producing a value  | finish, cancel the others       |
//! | child finishes after producing a value   | keep going with its last value  |
//! | every child finished                     | finish                          |
//! | any child fails                          | fail, cancel the others         |

use std::{marker::PhantomData, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
  demand::Demand,
  ops::join::{join_publisher, JoinBuffer, JoinParent, Latest, Upstreams},
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

join_publisher! {
  /// Latest values of two publishers.
  CombineLatest => CombineLatestInner, Latest<Option>, item: Clone;
  A a, B b 1
}

join_publisher! {
  CombineLatest3 => CombineLatestInner, Latest<Option>, item: Clone;
  A a, B b 1, C c 2
}

join_publisher! {
  CombineLatest4 => CombineLatestInner, Latest<Option>, item: Clone;
  A a, B b 1, C c 2, D d 3
}

// ==================== Inner ====================

struct CombineLatestState<B, D> {
  buffer: B,
  upstreams: Upstreams,
  downstream: Option<Arc<D>>,
  demand: Demand,
  // Everything the downstream asked for, handed to late child subscriptions.
  requested: Demand,
  delivering: bool,
  terminated: bool,
}

impl<B: JoinBuffer, D> CombineLatestState<B, D> {
  fn terminate(&mut self) -> (Vec<SubscriptionRef>, Option<Arc<D>>) {
    self.terminated = true;
    self.buffer.clear();
    (self.upstreams.take_all(), self.downstream.take())
  }
}

struct CombineLatestInner<B, F, D> {
  state: Mutex<CombineLatestState<B, D>>,
  _failure: PhantomData<fn(F)>,
}

impl<B, F, D> CombineLatestInner<B, F, D>
where
  B: JoinBuffer,
  F: Send + 'static,
  D: Subscriber<B::Output, F> + 'static,
{
  fn open(subscriber: D) -> Arc<Self> {
    let downstream = Arc::new(subscriber);
    let inner = Arc::new(CombineLatestInner {
      state: Mutex::new(CombineLatestState {
        buffer: B::default(),
        upstreams: Upstreams::new(B::ARITY),
        downstream: Some(downstream.clone()),
        demand: Demand::NONE,
        requested: Demand::NONE,
        delivering: false,
        terminated: false,
      }),
      _failure: PhantomData,
    });
    downstream.receive_subscription(inner.clone());
    inner
  }
}

impl<B, F, D> JoinParent for CombineLatestInner<B, F, D>
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
      debug!(target: "recombine::combine_latest", index, "cancelling redundant subscription");
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
    let Some(output) = state.buffer.take_output() else { return Demand::NONE };
    let Some(downstream) = state.downstream.clone() else { return Demand::NONE };
    state.demand -= 1;
    state.delivering = true;
    drop(state);

    let more = downstream.receive(output);

    let mut state = self.state.lock();
    state.delivering = false;
    if more.is_none() || state.terminated {
      return Demand::NONE;
    }
    state.demand += more;
    state.requested += more;
    let upstreams = state.upstreams.except(None);
    drop(state);
    for upstream in upstreams {
      upstream.request(more);
    }
    Demand::NONE
  }

  fn child_completion(&self, index: usize, completion: Completion<F>) {
    let mut state = self.state.lock();
    if state.terminated {
      return;
    }
    state.upstreams.finish(index);
    let completion = match completion {
      Completion::Finished => {
        let exhausted = !state.buffer.has_value(index);
        if !exhausted && !state.upstreams.all_finished() {
          return;
        }
        if exhausted {
          debug!(target: "recombine::combine_latest", index, "child finished without a value");
        }
        Completion::Finished
      }
      failure => failure,
    };
    let (cancel, downstream) = state.terminate();
    drop(state);
    for subscription in cancel {
      subscription.cancel();
    }
    if let Some(downstream) = downstream {
      downstream.receive_completion(completion);
    }
  }
}

impl<B, F, D> Subscription for CombineLatestInner<B, F, D>
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
    state.demand += demand;
    state.requested += demand;
    let upstreams = state.upstreams.except(None);
    drop(state);
    for upstream in upstreams {
      upstream.request(demand);
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

  fn description(&self) -> &'static str { "CombineLatest" }
}
