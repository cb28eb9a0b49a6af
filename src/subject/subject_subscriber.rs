use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::Subject;
use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::{Cancellable, Subscription, SubscriptionRef, SubscriptionStatus},
};

/// Feeds the signals of an upstream publisher into a subject.
///
/// The subject sees this subscriber as one of its upstream subscriptions and
/// decides how much to request. Cancelling it detaches the subject from the
/// upstream and releases the subject.
pub struct SubjectSubscriber<Sub>(Arc<SubjectSubscriberInner<Sub>>);

struct SubjectSubscriberInner<Sub> {
  me: Weak<Self>,
  state: Mutex<SubjectSubscriberState<Sub>>,
}

struct SubjectSubscriberState<Sub> {
  subject: Option<Sub>,
  upstream: SubscriptionStatus,
}

impl<Sub: Subject> SubjectSubscriber<Sub> {
  pub fn new(subject: Sub) -> Self {
    SubjectSubscriber(Arc::new_cyclic(|me| SubjectSubscriberInner {
      me: me.clone(),
      state: Mutex::new(SubjectSubscriberState {
        subject: Some(subject),
        upstream: SubscriptionStatus::AwaitingSubscription,
      }),
    }))
  }
}

impl<Sub> Clone for SubjectSubscriber<Sub> {
  fn clone(&self) -> Self { SubjectSubscriber(self.0.clone()) }
}

impl<Sub: Subject> Subscriber<Sub::Output, Sub::Failure> for SubjectSubscriber<Sub> {
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.0.state.lock();
    let subject = if state.upstream.is_awaiting() { state.subject.clone() } else { None };
    let Some(subject) = subject else {
      drop(state);
      subscription.cancel();
      return;
    };
    state.upstream = SubscriptionStatus::Subscribed(subscription);
    drop(state);
    if let Some(me) = self.0.me.upgrade() {
      subject.send_subscription(me);
    }
  }

  fn receive(&self, input: Sub::Output) -> Demand {
    let subject = self.0.state.lock().subject.clone();
    if let Some(subject) = subject {
      subject.send(input);
    }
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<Sub::Failure>) {
    let (upstream, subject) = {
      let mut state = self.0.state.lock();
      (state.upstream.terminate(), state.subject.take())
    };
    drop(upstream);
    if let Some(subject) = subject {
      subject.send_completion(completion);
    }
  }
}

impl<Sub: Subject> Subscription for SubjectSubscriberInner<Sub> {
  fn request(&self, demand: Demand) {
    let upstream = self.state.lock().upstream.subscription().cloned();
    if let Some(upstream) = upstream {
      upstream.request(demand);
    }
  }

  fn cancel(&self) {
    let (upstream, subject) = {
      let mut state = self.state.lock();
      (state.upstream.terminate(), state.subject.take())
    };
    drop(subject);
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }

  fn description(&self) -> &'static str { "Subject" }
}

impl<Sub: Subject> Cancellable for SubjectSubscriber<Sub> {
  fn cancel(&self) { Subscription::cancel(&*self.0) }
}
