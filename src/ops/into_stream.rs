//! Bridges a publisher into a `futures::Stream`.
//!
//! The stream requests one value per poll that finds nothing buffered, so the
//! publisher never runs ahead of the consumer. A failure is yielded as the
//! last item, `Err(failure)`; `Finished` ends the stream. Dropping the stream
//! cancels the upstream.
//!
//! ```rust
//! use futures::{executor::block_on, StreamExt};
//! use recombine::prelude::*;
//!
//! let stream = Sequence::<_, std::convert::Infallible>::new(vec![1, 2, 3]).into_stream();
//! let values: Vec<_> = block_on(stream.map(|item| item.unwrap_or_default()).collect());
//! assert_eq!(values, vec![1, 2, 3]);
//! ```

use std::{
  collections::VecDeque,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll, Waker},
};

use futures::Stream;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
  demand::Demand,
  publisher::Publisher,
  subscriber::{Completion, Subscriber},
  subscription::{SubscriptionRef, SubscriptionStatus},
};

struct StreamState<O, F> {
  upstream: SubscriptionStatus,
  queue: VecDeque<Result<O, F>>,
  // A `max(1)` request is outstanding.
  requested: bool,
  closed: bool,
  waker: Option<Waker>,
}

impl<O, F> StreamState<O, F> {
  fn wake(&mut self) {
    if let Some(waker) = self.waker.take() {
      waker.wake();
    }
  }
}

type Shared<O, F> = Arc<Mutex<StreamState<O, F>>>;

pub struct IntoStream<O, F> {
  state: Shared<O, F>,
}

impl<O, F> IntoStream<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  pub fn new<P>(publisher: &P) -> Self
  where
    P: Publisher<Output = O, Failure = F>,
  {
    let state = Arc::new(Mutex::new(StreamState {
      upstream: SubscriptionStatus::AwaitingSubscription,
      queue: VecDeque::new(),
      requested: false,
      closed: false,
      waker: None,
    }));
    publisher.subscribe(StreamSubscriber(state.clone()));
    IntoStream { state }
  }
}

impl<O, F> Stream for IntoStream<O, F> {
  type Item = Result<O, F>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let mut state = self.state.lock();
    loop {
      if let Some(item) = state.queue.pop_front() {
        return Poll::Ready(Some(item));
      }
      if state.closed {
        return Poll::Ready(None);
      }
      state.waker = Some(cx.waker().clone());
      if state.requested {
        return Poll::Pending;
      }
      let Some(upstream) = state.upstream.subscription().cloned() else { return Poll::Pending };
      state.requested = true;
      drop(state);
      // The value may arrive before `request` returns.
      upstream.request(Demand::max(1));
      state = self.state.lock();
    }
  }
}

impl<O, F> Drop for IntoStream<O, F> {
  fn drop(&mut self) {
    let mut state = self.state.lock();
    state.closed = true;
    state.queue.clear();
    let upstream = state.upstream.terminate();
    drop(state);
    if let Some(upstream) = upstream {
      upstream.cancel();
    }
  }
}

// ==================== Subscriber ====================

struct StreamSubscriber<O, F>(Shared<O, F>);

impl<O, F> Subscriber<O, F> for StreamSubscriber<O, F>
where
  O: Send + 'static,
  F: Send + 'static,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    let mut state = self.0.lock();
    if !state.upstream.is_awaiting() {
      drop(state);
      debug!(target: "recombine::into_stream", "cancelling redundant subscription");
      subscription.cancel();
      return;
    }
    state.upstream = SubscriptionStatus::Subscribed(subscription);
    // A poll that came first is waiting to request.
    state.wake();
  }

  fn receive(&self, input: O) -> Demand {
    let mut state = self.0.lock();
    if !state.upstream.is_subscribed() {
      return Demand::NONE;
    }
    state.requested = false;
    state.queue.push_back(Ok(input));
    state.wake();
    Demand::NONE
  }

  fn receive_completion(&self, completion: Completion<F>) {
    let mut state = self.0.lock();
    if state.upstream.terminate().is_none() {
      return;
    }
    if let Completion::Failure(failure) = completion {
      state.queue.push_back(Err(failure));
    }
    state.closed = true;
    state.wake();
  }
}

#[cfg(test)]
mod tests {
  use futures::{FutureExt, StreamExt};

  use super::*;
  use crate::{
    publishers::Sequence,
    subject::{PassthroughSubject, Subject},
    testing::{SubscriptionEvent, TestPublisher, TestingError},
  };

  #[recombine_macro::test(local)]
  async fn yields_every_value_then_ends() {
    let stream = Sequence::<_, TestingError>::new(vec![1, 2, 3]).into_stream();
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);
  }

  #[recombine_macro::test]
  fn requests_one_value_per_poll() {
    let source = TestPublisher::<i32, TestingError>::default();
    let mut stream = source.clone().into_stream();
    assert_eq!(stream.next().now_or_never(), None);
    assert_eq!(stream.next().now_or_never(), None);
    assert_eq!(source.subscription().history(), vec![SubscriptionEvent::Requested(Demand::max(1))]);

    source.send(1);
    assert_eq!(stream.next().now_or_never(), Some(Some(Ok(1))));
    assert_eq!(stream.next().now_or_never(), None);
    assert_eq!(source.subscription().total_requested(), Demand::max(2));

    source.send_completion(Completion::Failure(TestingError::Oops));
    assert_eq!(stream.next().now_or_never(), Some(Some(Err(TestingError::Oops))));
    assert_eq!(stream.next().now_or_never(), Some(None));
  }

  #[recombine_macro::test]
  fn dropping_the_stream_cancels_upstream() {
    let source = TestPublisher::<i32, TestingError>::default();
    let stream = source.clone().into_stream();
    drop(stream);
    assert_eq!(source.subscription().cancel_count(), 1);
  }

  #[recombine_macro::test(shared)]
  async fn values_sent_from_another_task_wake_the_consumer() {
    let subject = PassthroughSubject::<i32, TestingError>::new();
    let mut stream = subject.clone().into_stream();
    let producer = tokio::spawn(async move {
      for value in 0..3 {
        tokio::task::yield_now().await;
        subject.send(value);
      }
      subject.send_completion(Completion::Finished);
    });
    let mut received = vec![];
    while let Some(item) = stream.next().await {
      received.extend(item);
    }
    producer.await.unwrap();
    assert!(received.iter().all(|value| (0..3).contains(value)));
  }
}
