use parking_lot::Mutex;

/// Anything that can stop an activity, such as a subscription or a scheduled
/// task.
pub trait Cancellable: Send + Sync {
  fn cancel(&self);
}

/// A type erased cancellable that cancels itself when dropped.
///
/// **Attention:** if the returned value is not bound to a variable it is
/// dropped immediately, which cancels right away.
#[must_use]
pub struct AnyCancellable(Mutex<Option<Box<dyn FnOnce() + Send>>>);

impl AnyCancellable {
  pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
    AnyCancellable(Mutex::new(Some(Box::new(cancel))))
  }

  pub fn from_cancellable<C: Cancellable + 'static>(cancellable: C) -> Self {
    Self::new(move || cancellable.cancel())
  }

  /// Keeps this cancellable alive inside `bag` until the bag is dropped.
  pub fn store_in(self, bag: &mut Vec<AnyCancellable>) { bag.push(self) }

  /// Drops the guard without cancelling.
  pub fn detach(self) { self.0.lock().take(); }
}

impl Cancellable for AnyCancellable {
  fn cancel(&self) {
    let action = self.0.lock().take();
    if let Some(action) = action {
      action();
    }
  }
}

impl Drop for AnyCancellable {
  fn drop(&mut self) { Cancellable::cancel(self) }
}

impl std::fmt::Debug for AnyCancellable {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AnyCancellable")
      .field("is_cancelled", &self.0.lock().is_none())
      .finish()
  }
}
