//! Demand: the quota a subscriber grants to the publisher feeding it.
//!
//! A [`Demand`] is either [`Demand::Unlimited`] or a bounded
//! [`Demand::Max`]. All arithmetic saturates: adding never overflows into a
//! smaller bound (it becomes unlimited instead) and subtracting never goes
//! below zero. Unlimited absorbs every operation.
//!
//! ```rust
//! use recombine::demand::Demand;
//!
//! let mut demand = Demand::max(2);
//! demand += 3;
//! assert_eq!(demand, Demand::max(5));
//! assert_eq!(demand + Demand::Unlimited, Demand::Unlimited);
//! assert_eq!(Demand::max(1) - 4, Demand::NONE);
//! ```

use std::{
  cmp::Ordering,
  fmt::{Display, Formatter},
  ops::{Add, AddAssign, Mul, MulAssign, Sub, SubAssign},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Demand {
  /// No limit on the number of values.
  Unlimited,
  /// At most this many more values.
  Max(usize),
}

impl Demand {
  pub const NONE: Demand = Demand::Max(0);

  #[inline]
  pub const fn max(n: usize) -> Self { Demand::Max(n) }

  #[inline]
  pub const fn none() -> Self { Self::NONE }

  #[inline]
  pub const fn is_none(&self) -> bool { matches!(self, Demand::Max(0)) }

  #[inline]
  pub const fn is_unlimited(&self) -> bool { matches!(self, Demand::Unlimited) }

  /// The bound, or `None` when unlimited.
  #[inline]
  pub const fn limit(&self) -> Option<usize> {
    match self {
      Demand::Unlimited => None,
      Demand::Max(n) => Some(*n),
    }
  }

  /// Fails fast on a zero demand.
  ///
  /// # Panics
  ///
  /// Panics when `self` is [`Demand::NONE`].
  #[track_caller]
  pub fn assert_non_zero(self) {
    if self.is_none() {
      panic!("demand must not be zero");
    }
  }
}

impl Default for Demand {
  fn default() -> Self { Self::NONE }
}

impl From<usize> for Demand {
  fn from(n: usize) -> Self { Demand::Max(n) }
}

impl Display for Demand {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Demand::Unlimited => f.write_str("unlimited"),
      Demand::Max(n) => write!(f, "max({n})"),
    }
  }
}

// ==================== Arithmetic ====================

impl Add for Demand {
  type Output = Demand;

  fn add(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Max(a), Demand::Max(b)) => a.checked_add(b).map_or(Demand::Unlimited, Demand::Max),
      _ => Demand::Unlimited,
    }
  }
}

impl Add<usize> for Demand {
  type Output = Demand;

  #[inline]
  fn add(self, rhs: usize) -> Demand { self + Demand::Max(rhs) }
}

impl AddAssign for Demand {
  #[inline]
  fn add_assign(&mut self, rhs: Demand) { *self = *self + rhs }
}

impl AddAssign<usize> for Demand {
  #[inline]
  fn add_assign(&mut self, rhs: usize) { *self = *self + rhs }
}

impl Sub for Demand {
  type Output = Demand;

  fn sub(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Unlimited, _) => Demand::Unlimited,
      (Demand::Max(_), Demand::Unlimited) => Demand::NONE,
      (Demand::Max(a), Demand::Max(b)) => Demand::Max(a.saturating_sub(b)),
    }
  }
}

impl Sub<usize> for Demand {
  type Output = Demand;

  #[inline]
  fn sub(self, rhs: usize) -> Demand { self - Demand::Max(rhs) }
}

impl SubAssign for Demand {
  #[inline]
  fn sub_assign(&mut self, rhs: Demand) { *self = *self - rhs }
}

impl SubAssign<usize> for Demand {
  #[inline]
  fn sub_assign(&mut self, rhs: usize) { *self = *self - rhs }
}

impl Mul<usize> for Demand {
  type Output = Demand;

  fn mul(self, rhs: usize) -> Demand {
    match self {
      Demand::Unlimited => Demand::Unlimited,
      Demand::Max(a) => a.checked_mul(rhs).map_or(Demand::Unlimited, Demand::Max),
    }
  }
}

impl MulAssign<usize> for Demand {
  #[inline]
  fn mul_assign(&mut self, rhs: usize) { *self = *self * rhs }
}

// ==================== Ordering ====================

impl Ord for Demand {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (Demand::Unlimited, Demand::Unlimited) => Ordering::Equal,
      (Demand::Unlimited, Demand::Max(_)) => Ordering::Greater,
      (Demand::Max(_), Demand::Unlimited) => Ordering::Less,
      (Demand::Max(a), Demand::Max(b)) => a.cmp(b),
    }
  }
}

impl PartialOrd for Demand {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq<usize> for Demand {
  fn eq(&self, other: &usize) -> bool { matches!(self, Demand::Max(n) if n == other) }
}

impl PartialOrd<usize> for Demand {
  fn partial_cmp(&self, other: &usize) -> Option<Ordering> { Some(self.cmp(&Demand::Max(*other))) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn demand() -> impl Strategy<Value = Demand> {
    prop_oneof![
      1 => Just(Demand::Unlimited),
      4 => any::<usize>().prop_map(Demand::Max),
      4 => (0usize..64).prop_map(Demand::Max),
    ]
  }

  #[recombine_macro::test]
  fn addition_saturates_into_unlimited() {
    assert_eq!(Demand::max(usize::MAX) + 1, Demand::Unlimited);
    assert_eq!(Demand::max(usize::MAX - 1) + 1, Demand::max(usize::MAX));
    assert_eq!(Demand::max(3) + Demand::max(4), Demand::max(7));
  }

  #[recombine_macro::test]
  fn subtraction_floors_at_zero() {
    assert_eq!(Demand::max(3) - 5, Demand::NONE);
    assert_eq!(Demand::max(3) - Demand::Unlimited, Demand::NONE);
    assert_eq!(Demand::Unlimited - 42, Demand::Unlimited);
    assert_eq!(Demand::Unlimited - Demand::Unlimited, Demand::Unlimited);
  }

  #[recombine_macro::test]
  fn multiplication() {
    assert_eq!(Demand::max(3) * 4, Demand::max(12));
    assert_eq!(Demand::max(usize::MAX) * 2, Demand::Unlimited);
    assert_eq!(Demand::Unlimited * 0, Demand::Unlimited);
  }

  #[recombine_macro::test]
  fn ordering_puts_unlimited_on_top() {
    assert!(Demand::Unlimited > Demand::max(usize::MAX));
    assert!(Demand::max(1) > 0);
    assert!(Demand::NONE == 0);
    assert!(Demand::Unlimited != 0);
    assert!(Demand::Unlimited > 100);
  }

  #[recombine_macro::test]
  fn display() {
    assert_eq!(Demand::Unlimited.to_string(), "unlimited");
    assert_eq!(Demand::max(42).to_string(), "max(42)");
  }

  #[recombine_macro::test]
  #[should_panic(expected = "demand must not be zero")]
  fn zero_demand_is_fatal_where_asserted() { Demand::NONE.assert_non_zero(); }

  proptest! {
    #[test]
    fn add_never_shrinks(a in demand(), b in demand()) {
      let sum = a + b;
      prop_assert!(sum >= a);
      prop_assert!(sum >= b);
      if a.is_unlimited() || b.is_unlimited() {
        prop_assert_eq!(sum, Demand::Unlimited);
      }
    }

    #[test]
    fn add_is_commutative(a in demand(), b in demand()) {
      prop_assert_eq!(a + b, b + a);
    }

    #[test]
    fn sub_never_grows(a in demand(), b in demand()) {
      let diff = a - b;
      prop_assert!(diff <= a);
      if a.is_unlimited() {
        prop_assert_eq!(diff, Demand::Unlimited);
      }
    }

    #[test]
    fn bounded_add_then_sub_round_trips(a in 0usize..1 << 20, b in 0usize..1 << 20) {
      prop_assert_eq!(Demand::max(a) + b - b, Demand::max(a));
    }
  }
}
