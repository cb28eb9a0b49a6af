//! Everything needed to build and subscribe pipelines, for glob import.

pub use crate::{
  demand::Demand,
  error::{OverflowError, TimeoutError},
  ops::{
    autoconnect::Autoconnect,
    buffer::{Buffer, BufferingStrategy, PrefetchStrategy},
    combine_latest::{CombineLatest, CombineLatest3, CombineLatest4},
    comparison::{natural_order, Comparison, Extremum, TryComparison},
    debounce::Debounce,
    flat_map::FlatMap,
    into_stream::IntoStream,
    map::Map,
    multicast::Multicast,
    share::Share,
    switch_to_latest::SwitchToLatest,
    throttle::Throttle,
    timeout::Timeout,
    zip::{Zip, Zip3, Zip4},
  },
  publisher::{AnyPublisher, ConnectablePublisher, Publisher},
  publishers::{Empty, Fail, Just, Sequence},
  scheduler::{Duration, ImmediateScheduler, Scheduler, TaskHandle, VirtualTimeScheduler},
  subject::{CurrentValueSubject, PassthroughSubject, Subject, SubjectSubscriber},
  subscriber::{AnySubscriber, Completion, Subscriber},
  subscribers::Sink,
  subscription::{AnyCancellable, Cancellable, Subscription, SubscriptionRef},
};
#[cfg(feature = "tokio-scheduler")]
pub use crate::scheduler::TokioScheduler;
