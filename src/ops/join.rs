//! Plumbing shared by the fixed-arity joins, `CombineLatest*` and `Zip*`.
//!
//! A join owns one buffer holding a slot per child publisher. Every child is
//! subscribed through a [`JoinChild`] tagged with its index at the type
//! level, so values of different types land in the right slot without any
//! type erasure.

use std::{collections::VecDeque, sync::Arc};

use crate::{
  demand::Demand,
  subscriber::{Completion, Subscriber},
  subscription::SubscriptionRef,
};

// ==================== Buffers ====================

pub(crate) trait JoinBuffer: Default + Send + 'static {
  type Output;
  const ARITY: usize;

  /// Assembles the next tuple, or `None` while some slot is empty.
  fn take_output(&mut self) -> Option<Self::Output>;

  fn has_value(&self, index: usize) -> bool;

  fn clear(&mut self) { *self = Self::default(); }
}

/// Typed access to slot `I` of a buffer.
pub(crate) trait JoinSlot<const I: usize>: JoinBuffer {
  type Item;

  fn store(&mut self, item: Self::Item);
}

/// Keeps the most recent value per child; assembling a tuple clones them.
#[derive(Default)]
pub(crate) struct Latest<T>(T);

/// Queues every value per child; assembling a tuple pops one of each.
#[derive(Default)]
pub(crate) struct Queued<T>(T);

macro_rules! join_slot {
  ([$($All:ident),+], $T:ident, $idx:tt) => {
    impl<$($All: Clone + Send + 'static),+> JoinSlot<$idx> for Latest<($(Option<$All>,)+)> {
      type Item = $T;

      fn store(&mut self, item: $T) { self.0.$idx = Some(item); }
    }

    impl<$($All: Send + 'static),+> JoinSlot<$idx> for Queued<($(VecDeque<$All>,)+)> {
      type Item = $T;

      fn store(&mut self, item: $T) { self.0.$idx.push_back(item); }
    }
  };
}

macro_rules! join_buffers {
  ($arity:literal, $all:tt, $($T:ident $idx:tt),+) => {
    impl<$($T: Clone + Send + 'static),+> JoinBuffer for Latest<($(Option<$T>,)+)> {
      type Output = ($($T,)+);
      const ARITY: usize = $arity;

      fn take_output(&mut self) -> Option<Self::Output> { Some(($(self.0.$idx.clone()?,)+)) }

      fn has_value(&self, index: usize) -> bool {
        match index {
          $($idx => self.0.$idx.is_some(),)+
          _ => false,
        }
      }
    }

    impl<$($T: Send + 'static),+> JoinBuffer for Queued<($(VecDeque<$T>,)+)> {
      type Output = ($($T,)+);
      const ARITY: usize = $arity;

      fn take_output(&mut self) -> Option<Self::Output> {
        if $(self.0.$idx.is_empty())||+ {
          return None;
        }
        Some(($(self.0.$idx.pop_front()?,)+))
      }

      fn has_value(&self, index: usize) -> bool {
        match index {
          $($idx => !self.0.$idx.is_empty(),)+
          _ => false,
        }
      }
    }

    $(join_slot!($all, $T, $idx);)+
  };
}

join_buffers!(2, [A, B], A 0, B 1);
join_buffers!(3, [A, B, C], A 0, B 1, C 2);
join_buffers!(4, [A, B, C, D], A 0, B 1, C 2, D 3);

// ==================== Upstreams ====================

/// Subscriptions of the children and which of them finished.
pub(crate) struct Upstreams {
  subscriptions: Vec<Option<SubscriptionRef>>,
  finished: Vec<bool>,
}

impl Upstreams {
  pub(crate) fn new(arity: usize) -> Self {
    Upstreams { subscriptions: vec![None; arity], finished: vec![false; arity] }
  }

  /// Records the subscription of child `index`. Returns `false` if that child
  /// already had one, in which case the caller cancels the newcomer.
  pub(crate) fn attach(&mut self, index: usize, subscription: &SubscriptionRef) -> bool {
    match self.subscriptions.get_mut(index) {
      Some(slot @ None) if !self.finished[index] => {
        *slot = Some(subscription.clone());
        true
      }
      _ => false,
    }
  }

  pub(crate) fn finish(&mut self, index: usize) {
    if let Some(finished) = self.finished.get_mut(index) {
      *finished = true;
      self.subscriptions[index] = None;
    }
  }

  pub(crate) fn is_finished(&self, index: usize) -> bool {
    self.finished.get(index).copied().unwrap_or(true)
  }

  pub(crate) fn all_finished(&self) -> bool { self.finished.iter().all(|f| *f) }

  /// Indices of the finished children.
  pub(crate) fn finished(&self) -> impl Iterator<Item = usize> + '_ {
    self.finished.iter().enumerate().filter(|(_, f)| **f).map(|(i, _)| i)
  }

  /// Live subscriptions, leaving out child `skip`.
  pub(crate) fn except(&self, skip: Option<usize>) -> Vec<SubscriptionRef> {
    self
      .subscriptions
      .iter()
      .enumerate()
      .filter(|(i, _)| Some(*i) != skip)
      .filter_map(|(_, s)| s.clone())
      .collect()
  }

  pub(crate) fn take_all(&mut self) -> Vec<SubscriptionRef> {
    self.subscriptions.iter_mut().filter_map(Option::take).collect()
  }
}

// ==================== Children ====================

/// The operator state every [`JoinChild`] reports to.
pub(crate) trait JoinParent: Send + Sync + 'static {
  type Buffer: JoinBuffer;
  type Failure;

  fn child_subscription(&self, index: usize, subscription: SubscriptionRef);

  /// `store` puts the value into the child's slot while the state is locked.
  fn child_value(&self, index: usize, store: impl FnOnce(&mut Self::Buffer)) -> Demand;

  fn child_completion(&self, index: usize, completion: Completion<Self::Failure>);
}

pub(crate) struct JoinChild<J, const I: usize> {
  parent: Arc<J>,
}

impl<J, const I: usize> JoinChild<J, I> {
  pub(crate) fn new(parent: Arc<J>) -> Self { JoinChild { parent } }
}

impl<J, const I: usize> Subscriber<<J::Buffer as JoinSlot<I>>::Item, J::Failure> for JoinChild<J, I>
where
  J: JoinParent,
  J::Buffer: JoinSlot<I>,
{
  fn receive_subscription(&self, subscription: SubscriptionRef) {
    self.parent.child_subscription(I, subscription)
  }

  fn receive(&self, input: <J::Buffer as JoinSlot<I>>::Item) -> Demand {
    self
      .parent
      .child_value(I, move |buffer| <J::Buffer as JoinSlot<I>>::store(buffer, input))
  }

  fn receive_completion(&self, completion: Completion<J::Failure>) {
    self.parent.child_completion(I, completion)
  }
}

// ==================== Publishers ====================

/// Declares a fixed-arity join publisher. `$inner` is the operator state,
/// built from the downstream and an empty `$buffer` whose slots wrap each
/// child's output in `$slot`.
macro_rules! join_publisher {
  (
    $(#[$meta:meta])*
    $name:ident => $inner:ident, $buffer:ident<$slot:ident>, item: $bound:path;
    $A:ident $a:ident, $($T:ident $field:ident $idx:tt),+
  ) => {
    $(#[$meta])*
    pub struct $name<$A, $($T),+> {
      $a: $A,
      $($field: $T,)+
    }

    impl<$A, $($T),+> $name<$A, $($T),+> {
      pub fn new($a: $A, $($field: $T),+) -> Self { $name { $a, $($field),+ } }
    }

    impl<$A: Clone, $($T: Clone),+> Clone for $name<$A, $($T),+> {
      fn clone(&self) -> Self { $name { $a: self.$a.clone(), $($field: self.$field.clone()),+ } }
    }

    impl<$A, $($T),+> Publisher for $name<$A, $($T),+>
    where
      $A: Publisher,
      <$A as Publisher>::Output: $bound,
      $(
        $T: Publisher<Failure = <$A as Publisher>::Failure>,
        <$T as Publisher>::Output: $bound,
      )+
    {
      type Output = (<$A as Publisher>::Output, $(<$T as Publisher>::Output),+);
      type Failure = <$A as Publisher>::Failure;

      fn receive_subscriber<S>(&self, subscriber: S)
      where
        S: Subscriber<Self::Output, Self::Failure> + 'static,
      {
        let inner = $inner::<
          $buffer<($slot<<$A as Publisher>::Output>, $($slot<<$T as Publisher>::Output>),+)>,
          Self::Failure,
          S,
        >::open(subscriber);
        self.$a.subscribe($crate::ops::join::JoinChild::<_, 0>::new(inner.clone()));
        $(self.$field.subscribe($crate::ops::join::JoinChild::<_, $idx>::new(inner.clone()));)+
      }
    }
  };
}

pub(crate) use join_publisher;
