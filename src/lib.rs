//! # recombine: demand-driven reactive streams
//!
//! Publishers describe how values are produced, subscribers consume them, and
//! every value flows only after the subscriber asked for it through its
//! [`Subscription`](subscription::Subscription). Operators sit in between,
//! each one a subscriber to its upstream and a subscription to its
//! downstream.
//!
//! ## Quick Start
//!
//! ```rust
//! use recombine::prelude::*;
//!
//! let seen = std::sync::Arc::new(parking_lot::Mutex::new(vec![]));
//! let sink = seen.clone();
//! let _cancellable = Sequence::<_, std::convert::Infallible>::new(vec![1, 2, 3])
//!   .zip(Sequence::new(vec!["a", "b"]))
//!   .sink(move |pair| sink.lock().push(pair));
//! assert_eq!(*seen.lock(), vec![(1, "a"), (2, "b")]);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Demand`] | How many more values a subscriber accepts |
//! | [`Publisher`] | Produces values for each attached subscriber |
//! | [`Subscriber`] | Receives a subscription, values and one completion |
//! | [`Subscription`] | Requests more values or cancels the flow |
//! | [`Scheduler`] | Clock and executor for the time based operators |
//!
//! ## Feature Flags
//!
//! - **`tokio-scheduler`**: `TokioScheduler`, running actions on the ambient
//!   tokio runtime.
//!
//! [`Demand`]: demand::Demand
//! [`Publisher`]: publisher::Publisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`Scheduler`]: scheduler::Scheduler

pub mod demand;
pub mod error;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod publishers;
pub mod scheduler;
pub mod subject;
pub mod subscriber;
pub mod subscribers;
pub mod subscription;
pub mod testing;

pub use prelude::*;
