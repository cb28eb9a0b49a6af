use super::SubscriptionRef;

/// Lifecycle of the upstream link held by an operator.
///
/// `AwaitingSubscription` moves to `Subscribed` once, and every later
/// subscription must be rejected. `PendingTerminal` keeps the link alive while
/// a terminal signal waits to be delivered; `Terminal` is final.
#[derive(Default)]
pub enum SubscriptionStatus {
  #[default]
  AwaitingSubscription,
  Subscribed(SubscriptionRef),
  PendingTerminal(SubscriptionRef),
  Terminal,
}

impl SubscriptionStatus {
  #[inline]
  pub fn is_awaiting(&self) -> bool { matches!(self, SubscriptionStatus::AwaitingSubscription) }

  #[inline]
  pub fn is_subscribed(&self) -> bool { matches!(self, SubscriptionStatus::Subscribed(_)) }

  #[inline]
  pub fn is_terminal(&self) -> bool { matches!(self, SubscriptionStatus::Terminal) }

  /// The upstream subscription while actively subscribed.
  pub fn subscription(&self) -> Option<&SubscriptionRef> {
    match self {
      SubscriptionStatus::Subscribed(subscription) => Some(subscription),
      _ => None,
    }
  }

  /// Moves to `Terminal`, handing back the upstream subscription if one was
  /// still held.
  pub fn terminate(&mut self) -> Option<SubscriptionRef> {
    match std::mem::replace(self, SubscriptionStatus::Terminal) {
      SubscriptionStatus::Subscribed(subscription)
      | SubscriptionStatus::PendingTerminal(subscription) => Some(subscription),
      _ => None,
    }
  }

  /// Moves from `Subscribed` to `PendingTerminal`. Returns `false` when the
  /// link was not actively subscribed.
  pub fn begin_terminal(&mut self) -> bool {
    match std::mem::take(self) {
      SubscriptionStatus::Subscribed(subscription) => {
        *self = SubscriptionStatus::PendingTerminal(subscription);
        true
      }
      other => {
        *self = other;
        false
      }
    }
  }
}

impl std::fmt::Debug for SubscriptionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SubscriptionStatus::AwaitingSubscription => f.write_str("AwaitingSubscription"),
      SubscriptionStatus::Subscribed(s) => write!(f, "Subscribed({})", s.description()),
      SubscriptionStatus::PendingTerminal(s) => write!(f, "PendingTerminal({})", s.description()),
      SubscriptionStatus::Terminal => f.write_str("Terminal"),
    }
  }
}
