//! Operators returned by the [`Publisher`](crate::publisher::Publisher)
//! combinators.
//!
//! Every operator builds its state per subscriber when subscribed and hands
//! the downstream a subscription whose `description()` names the operator.

pub mod autoconnect;
pub mod buffer;
pub mod combine_latest;
pub mod comparison;
pub mod debounce;
pub mod flat_map;
pub mod into_stream;
pub(crate) mod join;
pub mod map;
pub mod multicast;
pub mod share;
pub mod switch_to_latest;
pub mod throttle;
pub mod timeout;
pub mod zip;
