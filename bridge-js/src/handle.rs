use core::fmt;

/// Opaque identifier of an executing context within the current thread's pool.
///
/// This is the `context_id` carried across the host boundary. Ids are never reused for the
/// lifetime of a pool, so a stale id can only ever resolve to "not found".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ContextId(u32);

impl ContextId {
  #[inline]
  pub const fn from_raw(raw: u32) -> Self {
    Self(raw)
  }

  #[inline]
  pub const fn to_raw(self) -> u32 {
    self.0
  }

  /// Converts the `i32` representation used by host entry points. Negative values never name a
  /// context.
  #[inline]
  pub fn from_ffi(raw: i32) -> Option<Self> {
    u32::try_from(raw).ok().map(Self)
  }

  #[inline]
  pub fn to_ffi(self) -> i32 {
    self.0 as i32
  }
}

impl fmt::Debug for ContextId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("ContextId").field(&self.0).finish()
  }
}

impl fmt::Display for ContextId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A registry index: the integer handle under which a callback record is registered.
///
/// This is also the script-visible timer/request id. Valid ids are strictly positive; `0` is used
/// on the wire to mean "no callback".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CallbackId(i32);

impl CallbackId {
  /// The wire value meaning "no callback was registered".
  pub const NONE: i32 = 0;

  #[inline]
  pub fn from_raw(raw: i32) -> Option<Self> {
    (raw > 0).then_some(Self(raw))
  }

  #[inline]
  pub const fn to_raw(self) -> i32 {
    self.0
  }

  /// The next id in allocation order, wrapping from `i32::MAX` back to `1`.
  #[inline]
  pub(crate) fn next(self) -> Self {
    Self(if self.0 == i32::MAX { 1 } else { self.0 + 1 })
  }

  #[inline]
  pub(crate) const fn first() -> Self {
    Self(1)
  }
}

impl fmt::Debug for CallbackId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("CallbackId").field(&self.0).finish()
  }
}

impl fmt::Display for CallbackId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}
