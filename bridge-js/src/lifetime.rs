use std::cell::Cell;
use std::rc::Rc;

/// Lifecycle state of an executing context.
///
/// ```text
/// Constructing -> Valid <-> Frozen
///                   |         |
///                   +--> Disposed <--+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
  Constructing,
  Valid,
  Frozen,
  Disposed,
}

/// Shared liveness flag for one executing context.
///
/// Every component that can be reached asynchronously (trampolines, the callback registry) holds a
/// clone of the token and consults it before touching engine state. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct LifetimeToken {
  state: Rc<Cell<ContextState>>,
}

impl Default for LifetimeToken {
  fn default() -> Self {
    Self::new()
  }
}

impl LifetimeToken {
  /// Creates a token in the [`ContextState::Constructing`] state.
  pub fn new() -> Self {
    Self {
      state: Rc::new(Cell::new(ContextState::Constructing)),
    }
  }

  pub fn state(&self) -> ContextState {
    self.state.get()
  }

  /// Fully constructed and not disposed. Frozen contexts are still valid.
  pub fn is_valid(&self) -> bool {
    matches!(self.state(), ContextState::Valid | ContextState::Frozen)
  }

  pub fn is_frozen(&self) -> bool {
    self.state() == ContextState::Frozen
  }

  pub fn is_disposed(&self) -> bool {
    self.state() == ContextState::Disposed
  }

  /// Marks construction as complete. Has no effect outside `Constructing`.
  pub fn mark_valid(&self) -> bool {
    self.transition(ContextState::Constructing, ContextState::Valid)
  }

  /// Returns whether the state changed.
  pub fn freeze(&self) -> bool {
    self.transition(ContextState::Valid, ContextState::Frozen)
  }

  /// Returns whether the state changed.
  pub fn unfreeze(&self) -> bool {
    self.transition(ContextState::Frozen, ContextState::Valid)
  }

  /// Enters the terminal state. Returns `false` if the token was already disposed.
  pub fn dispose(&self) -> bool {
    if self.is_disposed() {
      return false;
    }
    self.state.set(ContextState::Disposed);
    true
  }

  fn transition(&self, from: ContextState, to: ContextState) -> bool {
    if self.state() != from {
      return false;
    }
    self.state.set(to);
    true
  }
}
