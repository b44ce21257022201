//! The callback registry: the single source of truth for "is this callback still alive and
//! attached to a live context".
//!
//! Host entry points never see script functions. They are handed a [`CallbackId`] and give it back
//! when the asynchronous operation completes; the trampoline then asks the registry to resolve the
//! id. A record is resolvable only while it is registered *and* the owning context's
//! [`LifetimeToken`] reports the context as valid, so a host firing late after cancellation or
//! teardown resolves to "not found" instead of a dangling callback.

use crate::handle::CallbackId;
use crate::handle::ContextId;
use crate::lifetime::LifetimeToken;
use crate::value::JsFunction;
use ahash::HashMap;
use ahash::HashMapExt;

/// The asynchronous primitive a callback record was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
  /// `setTimeout`.
  Timeout,
  /// `setInterval`.
  Interval,
  /// `requestAnimationFrame`.
  AnimationFrame,
  /// A module invocation completion callback.
  Module,
}

impl CallbackKind {
  pub fn persistence(self) -> Persistence {
    match self {
      CallbackKind::Interval => Persistence::Persistent,
      CallbackKind::Timeout | CallbackKind::AnimationFrame | CallbackKind::Module => {
        Persistence::Transient
      }
    }
  }

  /// Whether a cancel operation of the `timer` family (`clearTimeout`/`clearInterval`) applies to
  /// records of this kind.
  pub fn is_timer(self) -> bool {
    matches!(self, CallbackKind::Timeout | CallbackKind::Interval)
  }
}

/// Whether a record survives its own firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistence {
  /// Fires once, then is removed.
  Transient,
  /// Fires repeatedly until cancelled or the context is disposed.
  Persistent,
}

/// An immutable callback payload owned by the registry.
#[derive(Debug, Clone)]
pub struct CallbackRecord {
  context: ContextId,
  callback: Option<JsFunction>,
  kind: CallbackKind,
}

impl CallbackRecord {
  pub fn new(context: ContextId, callback: Option<JsFunction>, kind: CallbackKind) -> Self {
    Self {
      context,
      callback,
      kind,
    }
  }

  pub fn context(&self) -> ContextId {
    self.context
  }

  /// The stored script function. `None` is an internal error reported at firing time.
  pub fn callback(&self) -> Option<&JsFunction> {
    self.callback.as_ref()
  }

  pub fn kind(&self) -> CallbackKind {
    self.kind
  }

  pub fn persistence(&self) -> Persistence {
    self.kind.persistence()
  }
}

/// An index-addressed table of live callback records for one executing context.
///
/// Ids are allocated from a monotonically increasing counter that wraps at `i32::MAX`; an id is
/// never handed out while a record registered under the same id is still live.
///
/// The registry is `!Send` and must only be touched from its context's engine thread.
#[derive(Debug)]
pub struct CallbackRegistry {
  owner: ContextId,
  token: LifetimeToken,
  records: HashMap<CallbackId, CallbackRecord>,
  next_id: CallbackId,
}

impl CallbackRegistry {
  pub fn new(owner: ContextId, token: LifetimeToken) -> Self {
    Self {
      owner,
      token,
      records: HashMap::new(),
      next_id: CallbackId::first(),
    }
  }

  pub fn owner(&self) -> ContextId {
    self.owner
  }

  /// Takes ownership of `record` and returns the id it is registered under.
  pub fn register(&mut self, record: CallbackRecord) -> CallbackId {
    debug_assert_eq!(
      record.context, self.owner,
      "callback record registered with a foreign context"
    );
    let mut id = self.next_id;
    while self.records.contains_key(&id) {
      id = id.next();
    }
    self.next_id = id.next();
    self.records.insert(id, record);
    id
  }

  /// Resolves `id` to its record if it is registered and the owning context is still valid.
  ///
  /// `None` means "not found" and callers must treat it as a no-op.
  pub fn resolve(&self, id: CallbackId) -> Option<&CallbackRecord> {
    if !self.token.is_valid() {
      return None;
    }
    self.records.get(&id)
  }

  /// Deregisters `id`, returning the record if one was registered. Idempotent.
  pub fn remove(&mut self, id: CallbackId) -> Option<CallbackRecord> {
    self.records.remove(&id)
  }

  /// Removes every record owned by `context`, returning how many were removed.
  pub fn remove_all_for_context(&mut self, context: ContextId) -> usize {
    let before = self.records.len();
    self.records.retain(|_, record| record.context != context);
    before - self.records.len()
  }

  pub fn contains(&self, id: CallbackId) -> bool {
    self.records.contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  #[cfg(test)]
  pub(crate) fn set_next_id(&mut self, id: CallbackId) {
    self.next_id = id;
  }
}
