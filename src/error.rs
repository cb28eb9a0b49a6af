//! Ready-made failure types.
//!
//! Streams carry whatever failure type the caller picks. These two cover the
//! failures the crate itself can synthesize, so a pipeline whose failure type
//! implements `From<OverflowError>` or `From<TimeoutError>` can use the
//! matching shortcuts:
//!
//! - [`BufferingStrategy::overflow`](crate::ops::buffer::BufferingStrategy::overflow)
//! - [`Publisher::timeout_with_error`](crate::publisher::Publisher::timeout_with_error)

use std::time::Duration;

use thiserror::Error;

/// A value arrived while a buffer was already holding `capacity` values.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("buffer of capacity {capacity} overflowed")]
pub struct OverflowError {
  pub capacity: usize,
}

/// No value arrived within `after`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[error("no value within {after:?}")]
pub struct TimeoutError {
  pub after: Duration,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[recombine_macro::test]
  fn messages() {
    assert_eq!(OverflowError { capacity: 3 }.to_string(), "buffer of capacity 3 overflowed");
    assert_eq!(
      TimeoutError { after: Duration::from_millis(5) }.to_string(),
      "no value within 5ms"
    );
  }
}
