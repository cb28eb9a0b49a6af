use smallvec::SmallVec;

/// Id keyed registry of the downstream conduits attached to a subject.
///
/// Ids are handed out before insertion so a conduit can know its own id,
/// which it later uses to detach itself.
pub(crate) struct Conduits<T> {
  entries: SmallVec<[(usize, T); 2]>,
  next_id: usize,
}

impl<T> Default for Conduits<T> {
  fn default() -> Self { Self { entries: SmallVec::new(), next_id: 0 } }
}

impl<T> Conduits<T> {
  /// Allocates the id for the next [`Conduits::insert`].
  #[inline]
  pub fn reserve_id(&mut self) -> usize {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  #[inline]
  pub fn insert(&mut self, id: usize, conduit: T) { self.entries.push((id, conduit)); }

  pub fn remove(&mut self, id: usize) -> Option<T> {
    let index = self.entries.iter().position(|(key, _)| *key == id)?;
    Some(self.entries.remove(index).1)
  }

  #[inline]
  pub fn len(&self) -> usize { self.entries.len() }

  #[inline]
  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Removes every conduit, keeping insertion order.
  pub fn drain(&mut self) -> SmallVec<[T; 2]> {
    std::mem::take(&mut self.entries)
      .into_iter()
      .map(|(_, conduit)| conduit)
      .collect()
  }
}

impl<T: Clone> Conduits<T> {
  /// A copy of the current conduits, so delivery can happen without holding
  /// the subject's lock.
  pub fn snapshot(&self) -> SmallVec<[T; 2]> {
    self.entries.iter().map(|(_, conduit)| conduit.clone()).collect()
  }
}

/// Hands `value` to every target: all but the last get a clone, the last one
/// gets the value itself.
pub(crate) fn broadcast<T, V: Clone>(
  targets: impl IntoIterator<Item = T>, value: V, mut deliver: impl FnMut(&T, V),
) {
  let mut iter = targets.into_iter().peekable();
  while let Some(target) = iter.next() {
    if iter.peek().is_some() {
      deliver(&target, value.clone());
    } else {
      deliver(&target, value);
      break;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[recombine_macro::test]
  fn remove_by_id_keeps_order() {
    let mut conduits = Conduits::default();
    for name in ["a", "b", "c"] {
      let id = conduits.reserve_id();
      conduits.insert(id, name);
    }
    assert_eq!(conduits.remove(1), Some("b"));
    assert_eq!(conduits.remove(1), None);
    assert_eq!(conduits.snapshot().as_slice(), &["a", "c"]);
    assert_eq!(conduits.drain().as_slice(), &["a", "c"]);
    assert!(conduits.is_empty());
  }

  #[recombine_macro::test]
  fn broadcast_moves_into_last_target() {
    let mut seen = vec![];
    broadcast(0..3, String::from("v"), |target, value| seen.push((*target, value)));
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(_, v)| v == "v"));

    let mut none = 0;
    broadcast(Vec::<usize>::new(), 1, |_, _| none += 1);
    assert_eq!(none, 0);
  }
}
