use crate::handle::ContextId;
use crate::value::Value;
use std::fmt::Display;

/// Errors produced by the bridge and its script bindings.
///
/// These are the *synchronous* error channel: they are returned to the caller of a binding and
/// surface as a thrown exception at the call site. Errors that happen while the host is driving a
/// callback are never returned; they are converted into a [`ScriptError`] and routed through
/// [`Context::report_error`](crate::Context::report_error) instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
  /// A binding was called with fewer arguments than it requires.
  #[error("Failed to execute '{method}': {required} argument required, but only {present} present.")]
  NotEnoughArguments {
    method: &'static str,
    required: usize,
    present: usize,
  },

  /// A binding argument has the wrong type.
  #[error("Failed to execute '{method}': {message}")]
  InvalidArgument {
    method: &'static str,
    message: &'static str,
  },

  /// The embedding never registered the host entry point a binding needs.
  #[error("Failed to execute '{method}': host method ({entry}) is not registered.")]
  MissingCapability {
    method: &'static str,
    entry: &'static str,
  },

  /// The host entry point returned the failure sentinel.
  #[error("Failed to execute '{method}': host method ({entry}) execute failed.")]
  HostFailure {
    method: &'static str,
    entry: &'static str,
  },

  /// Attempted to call a non-callable value.
  #[error("value is not callable")]
  NotCallable,

  /// A script-level `throw`.
  #[error("uncaught exception")]
  Throw(Value),

  /// No live context is registered under this id.
  #[error("invalid context id {0}")]
  InvalidContext(ContextId),

  /// The context has already been disposed.
  #[error("context {0} has been disposed")]
  ContextDisposed(ContextId),

  /// No pool has been initialised on the current thread.
  #[error("context pool is not initialized")]
  PoolNotInitialized,

  /// Every slot in the context pool is occupied.
  #[error("context pool exhausted: {capacity} contexts already live")]
  PoolExhausted { capacity: usize },
}

impl BridgeError {
  /// Converts this error into the script-visible error value that would be thrown at the call
  /// site (or delivered to `onerror`).
  pub fn to_script_error(&self) -> ScriptError {
    match self {
      BridgeError::Throw(Value::Error(err)) => err.clone(),
      BridgeError::Throw(value) => ScriptError::new(ErrorKind::Error, value.to_display_string()),
      BridgeError::InvalidArgument { .. } | BridgeError::NotCallable => {
        ScriptError::new(ErrorKind::TypeError, self.to_string())
      }
      BridgeError::InvalidContext(_)
      | BridgeError::ContextDisposed(_)
      | BridgeError::PoolNotInitialized
      | BridgeError::PoolExhausted { .. } => {
        ScriptError::new(ErrorKind::InternalError, self.to_string())
      }
      _ => ScriptError::new(ErrorKind::Error, self.to_string()),
    }
  }
}

/// The constructor family of a script-visible error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Error,
  TypeError,
  InternalError,
}

impl Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ErrorKind::Error => f.write_str("Error"),
      ErrorKind::TypeError => f.write_str("TypeError"),
      ErrorKind::InternalError => f.write_str("InternalError"),
    }
  }
}

/// A script-visible error object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
  pub kind: ErrorKind,
  pub message: String,
}

impl ScriptError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  /// An `Error` carrying a message reported by the host.
  pub fn from_host(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Error, message)
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::InternalError, message)
  }
}

impl Display for ScriptError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{kind}: {message}", kind = self.kind, message = self.message)
  }
}

impl From<ScriptError> for BridgeError {
  fn from(err: ScriptError) -> Self {
    BridgeError::Throw(Value::Error(err))
  }
}
