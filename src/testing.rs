//! Test doubles for exercising the subscription protocol.
//!
//! - [`TrackingSubscriber`] records every signal it receives and answers
//!   with scripted demand.
//! - [`TestSubscription`] records every `request` and `cancel` made on it.
//! - [`TestPublisher`] hands a subscription to one subscriber and lets the
//!   test push values without regard to demand, returning whatever demand
//!   the subscriber answered.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{Subscription, SubscriptionRef},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum TestingError {
  #[error("oops")]
  Oops,
  #[error("something else went wrong")]
  Other,
}

// ==================== TrackingSubscriber ====================

/// One signal seen by a [`TrackingSubscriber`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<Input, Failure> {
  /// The description of the received subscription.
  Subscription(&'static str),
  Value(Input),
  Completion(Completion<Failure>),
}

type SubscriptionHook = Arc<dyn Fn(&SubscriptionRef) + Send + Sync>;
type ValueHook<I, F> = Arc<dyn Fn(&TrackingSubscriber<I, F>, &I) -> Demand + Send + Sync>;
type CompletionHook<F> = Arc<dyn Fn(&Completion<F>) + Send + Sync>;

struct Hooks<I, F> {
  on_subscription: Option<SubscriptionHook>,
  on_value: Option<ValueHook<I, F>>,
  on_completion: Option<CompletionHook<F>>,
}

struct TrackingState<I, F> {
  history: Vec<Event<I, F>>,
  subscription: Option<SubscriptionRef>,
}

struct TrackingInner<I, F> {
  initial_demand: Demand,
  value_demand: Demand,
  hooks: Mutex<Hooks<I, F>>,
  state: Mutex<TrackingState<I, F>>,
}

/// Records every signal; clones share the same history.
pub struct TrackingSubscriber<I, F>(Arc<TrackingInner<I, F>>);

impl<I, F> Clone for TrackingSubscriber<I, F> {
  fn clone(&self) -> Self { TrackingSubscriber(self.0.clone()) }
}

impl<I, F> TrackingSubscriber<I, F> {
  /// Requests `initial_demand` on subscription (nothing if it is zero) and
  /// answers every value with no additional demand.
  pub fn new(initial_demand: Demand) -> Self { Self::with_value_demand(initial_demand, Demand::NONE) }

  /// Like [`TrackingSubscriber::new`], answering every value with
  /// `value_demand`.
  pub fn with_value_demand(initial_demand: Demand, value_demand: Demand) -> Self {
    TrackingSubscriber(Arc::new(TrackingInner {
      initial_demand,
      value_demand,
      hooks: Mutex::new(Hooks { on_subscription: None, on_value: None, on_completion: None }),
      state: Mutex::new(TrackingState { history: vec![], subscription: None }),
    }))
  }

  /// Replaces the initial request with a custom reaction to the subscription.
  pub fn on_subscription(self, hook: impl Fn(&SubscriptionRef) + Send + Sync + 'static) -> Self {
    self.0.hooks.lock().on_subscription = Some(Arc::new(hook));
    self
  }

  /// Replaces the scripted value demand. The hook runs after the value was
  /// recorded and its answer becomes the returned demand.
  pub fn on_value(
    self, hook: impl Fn(&TrackingSubscriber<I, F>, &I) -> Demand + Send + Sync + 'static,
  ) -> Self {
    self.0.hooks.lock().on_value = Some(Arc::new(hook));
    self
  }

  pub fn on_completion(self, hook: impl Fn(&Completion<F>) + Send + Sync + 'static) -> Self {
    self.0.hooks.lock().on_completion = Some(Arc::new(hook));
    self
  }

  /// The first subscription received, if any.
  pub fn subscription(&self) -> Option<SubscriptionRef> { self.0.state.lock().subscription.clone() }

  pub fn request(&self, demand: Demand) {
    if let Some(subscription) = self.subscription() {
      subscription.request(demand);
    }
  }

  pub fn cancel(&self) {
    if let Some(subscription) = self.subscription() {
      subscription.cancel();
    }
  }

  /// Forgets the stored subscription so that the chain can be released.
  pub fn release_subscription(&self) -> Option<SubscriptionRef> {
    self.0.state.lock().subscription.take()
  }
}

impl<I: Clone, F: Clone> TrackingSubscriber<I, F> {
  pub fn history(&self) -> Vec<Event<I, F>> { self.0.state.lock().history.clone() }

  pub fn values(&self) -> Vec<I> {
    self
      .0
      .state
      .lock()
      .history
      .iter()
      .filter_map(|e| match e {
        Event::Value(v) => Some(v.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn completions(&self) -> Vec<Completion<F>> {
    self
      .0
      .state
      .lock()
      .history
      .iter()
      .filter_map(|e| match e {
        Event::Completion(c) => Some(c.clone()),
        _ => None,
      })
      .collect()
  }
}

impl<I, F> Subscriber<I, F> for TrackingSubscriber<I, F>
where
  I: Clone + Send,
  F: Clone + Send,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    {
      let mut state = self.0.state.lock();
      state.history.push(Event::Subscription(subscription.description()));
      if state.subscription.is_none() {
        state.subscription = Some(subscription.clone());
      }
    }
    let hook = self.0.hooks.lock().on_subscription.clone();
    match hook {
      Some(hook) => hook(&subscription),
      None if !self.0.initial_demand.is_none() => subscription.request(self.0.initial_demand),
      None => {}
    }
  }

  fn receive(&self, input: I) -> Demand {
    // Recorded before the hook runs so that reentrant deliveries keep their order.
    self.0.state.lock().history.push(Event::Value(input.clone()));
    let hook = self.0.hooks.lock().on_value.clone();
    match hook {
      Some(hook) => hook(self, &input),
      None => self.0.value_demand,
    }
  }

  fn receive_completion(&self, completion: Completion<F>) {
    self.0.state.lock().history.push(Event::Completion(completion.clone()));
    let hook = self.0.hooks.lock().on_completion.clone();
    if let Some(hook) = hook {
      hook(&completion);
    }
  }
}

// ==================== TestSubscription ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
  Requested(Demand),
  Cancelled,
}

type RequestHook = Arc<dyn Fn(Demand) + Send + Sync>;
type CancelHook = Arc<dyn Fn() + Send + Sync>;

/// Records requests and cancellations.
///
/// Every call is recorded, including the ones after `cancel`, so tests can
/// assert that an operator stops talking to its upstream.
#[derive(Default)]
pub struct TestSubscription {
  history: Mutex<Vec<SubscriptionEvent>>,
  on_request: Mutex<Option<RequestHook>>,
  on_cancel: Mutex<Option<CancelHook>>,
}

impl TestSubscription {
  pub fn new() -> Self { Self::default() }

  pub fn on_request(self, hook: impl Fn(Demand) + Send + Sync + 'static) -> Self {
    *self.on_request.lock() = Some(Arc::new(hook));
    self
  }

  pub fn on_cancel(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
    *self.on_cancel.lock() = Some(Arc::new(hook));
    self
  }

  pub fn history(&self) -> Vec<SubscriptionEvent> { self.history.lock().clone() }

  /// Sum of every recorded request.
  pub fn total_requested(&self) -> Demand {
    self.history.lock().iter().fold(Demand::NONE, |acc, e| match e {
      SubscriptionEvent::Requested(d) => acc + *d,
      SubscriptionEvent::Cancelled => acc,
    })
  }

  pub fn cancel_count(&self) -> usize {
    self
      .history
      .lock()
      .iter()
      .filter(|e| matches!(e, SubscriptionEvent::Cancelled))
      .count()
  }
}

impl Subscription for TestSubscription {
  fn request(&self, demand: Demand) {
    self.history.lock().push(SubscriptionEvent::Requested(demand));
    let hook = self.on_request.lock().clone();
    if let Some(hook) = hook {
      hook(demand);
    }
  }

  fn cancel(&self) {
    self.history.lock().push(SubscriptionEvent::Cancelled);
    let hook = self.on_cancel.lock().clone();
    if let Some(hook) = hook {
      hook();
    }
  }

  fn description(&self) -> &'static str { "TestSubscription" }
}

// ==================== TestPublisher ====================

struct TestPublisherInner<O, F> {
  subscription: Arc<TestSubscription>,
  subscriber: Mutex<Option<Arc<dyn Subscriber<O, F>>>>,
}

/// Drives its most recent subscriber by hand.
///
/// Clones share the subscriber, so a test can keep one clone while an
/// operator subscribes through another.
pub struct TestPublisher<O, F>(Arc<TestPublisherInner<O, F>>);

impl<O, F> Clone for TestPublisher<O, F> {
  fn clone(&self) -> Self { TestPublisher(self.0.clone()) }
}

impl<O, F> Default for TestPublisher<O, F> {
  fn default() -> Self { Self::new(Arc::new(TestSubscription::new())) }
}

impl<O, F> TestPublisher<O, F> {
  /// Every subscriber receives `subscription`.
  pub fn new(subscription: Arc<TestSubscription>) -> Self {
    TestPublisher(Arc::new(TestPublisherInner { subscription, subscriber: Mutex::new(None) }))
  }

  pub fn subscription(&self) -> Arc<TestSubscription> { self.0.subscription.clone() }

  pub fn has_subscriber(&self) -> bool { self.0.subscriber.lock().is_some() }

  fn subscriber(&self) -> Option<Arc<dyn Subscriber<O, F>>> { self.0.subscriber.lock().clone() }

  /// Pushes `value` regardless of demand and returns the subscriber's answer.
  ///
  /// # Panics
  ///
  /// Panics if nothing subscribed yet.
  pub fn send(&self, value: O) -> Demand {
    match self.subscriber() {
      Some(subscriber) => subscriber.receive(value),
      None => panic!("TestPublisher has no subscriber"),
    }
  }

  pub fn send_completion(&self, completion: Completion<F>) {
    if let Some(subscriber) = self.subscriber() {
      subscriber.receive_completion(completion);
    }
  }

  /// Hands an extra subscription to the current subscriber.
  pub fn send_subscription(&self, subscription: SubscriptionRef) {
    if let Some(subscriber) = self.subscriber() {
      subscriber.receive_subscription(subscription);
    }
  }

  /// Drops the stored subscriber.
  pub fn release(&self) { self.0.subscriber.lock().take(); }
}

impl<O, F> Publisher for TestPublisher<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  type Output = O;
  type Failure = F;

  fn receive_subscriber<S>(&self, subscriber: S)
  where
    S: Subscriber<O, F> + 'static,
  {
    let subscriber: Arc<dyn Subscriber<O, F>> = Arc::new(subscriber);
    *self.0.subscriber.lock() = Some(subscriber.clone());
    subscriber.receive_subscription(self.0.subscription.clone());
  }
}
