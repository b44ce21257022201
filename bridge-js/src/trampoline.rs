//! Fixed-signature entry points the host calls when an asynchronous operation completes.
//!
//! Each trampoline runs the same protocol on the engine thread:
//! 1. resolve `context_id` in the pool; unknown, disposed or still-constructing contexts are a
//!    silent no-op (teardown raced the firing),
//! 2. a frozen context returns immediately *without* consuming the record,
//! 3. resolve `callback_id` in the context's registry; not found is a silent no-op (already
//!    cancelled),
//! 4. a record without a stored function is reported as an internal error,
//! 5. a host-supplied `errmsg` is reported as a script error instead of invoking the callback,
//! 6. otherwise the callback is invoked and its return value discarded; a throw is reported,
//! 7. transient records are removed afterwards regardless of the outcome.
//!
//! Nothing here may unwind into the host: errors go through
//! [`Context::report_error`](crate::Context::report_error) and panics are caught at the boundary.

use crate::error::ScriptError;
use crate::handle::CallbackId;
use crate::handle::ContextId;
use crate::registry::Persistence;
use crate::runtime::get_context;
use crate::value::Value;
use std::ffi::c_char;
use std::ffi::CStr;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use tracing::error;
use tracing::trace;
use tracing::warn;

/// One-shot timer firing (`setTimeout`).
///
/// # Safety
///
/// `errmsg` must be null or point to a NUL-terminated string valid for the duration of the call.
/// Must be called on the engine thread that owns `context_id`.
pub unsafe extern "C" fn handle_transient_callback(
  callback_id: i32,
  context_id: i32,
  errmsg: *const c_char,
) {
  // SAFETY: upheld by the caller.
  let errmsg = unsafe { host_string(errmsg) };
  fire(
    Firing {
      callback_id,
      context_id,
      label: "timer",
      persistence: Persistence::Transient,
      errmsg,
    },
    || Ok(Vec::new()),
  );
}

/// Repeating timer firing (`setInterval`).
///
/// # Safety
///
/// See [`handle_transient_callback`].
pub unsafe extern "C" fn handle_persistent_callback(
  callback_id: i32,
  context_id: i32,
  errmsg: *const c_char,
) {
  // SAFETY: upheld by the caller.
  let errmsg = unsafe { host_string(errmsg) };
  fire(
    Firing {
      callback_id,
      context_id,
      label: "timer",
      persistence: Persistence::Persistent,
      errmsg,
    },
    || Ok(Vec::new()),
  );
}

/// Animation-frame firing. The callback receives the frame timestamp.
///
/// # Safety
///
/// See [`handle_transient_callback`].
pub unsafe extern "C" fn handle_raf_transient_callback(
  callback_id: i32,
  context_id: i32,
  timestamp: f64,
  errmsg: *const c_char,
) {
  // SAFETY: upheld by the caller.
  let errmsg = unsafe { host_string(errmsg) };
  fire(
    Firing {
      callback_id,
      context_id,
      label: "requestAnimationFrame",
      persistence: Persistence::Transient,
      errmsg,
    },
    || Ok(vec![Value::Number(timestamp)]),
  );
}

/// Module invocation completion. The callback receives the parsed JSON `data` (`null` when the host
/// passes no data).
///
/// # Safety
///
/// `errmsg` and `data` must each be null or point to a NUL-terminated string valid for the duration
/// of the call. Must be called on the engine thread that owns `context_id`.
pub unsafe extern "C" fn handle_module_callback(
  callback_id: i32,
  context_id: i32,
  errmsg: *const c_char,
  data: *const c_char,
) {
  // SAFETY: upheld by the caller.
  let (errmsg, data) = unsafe { (host_string(errmsg), host_string(data)) };
  fire(
    Firing {
      callback_id,
      context_id,
      label: "module",
      persistence: Persistence::Transient,
      errmsg,
    },
    move || {
      let Some(data) = data else {
        return Ok(vec![Value::Null]);
      };
      let json: serde_json::Value = serde_json::from_str(&data).map_err(|err| {
        ScriptError::internal(format!(
          "Failed to trigger callback: invalid module response: {err}"
        ))
      })?;
      Ok(vec![Value::from_json(json)])
    },
  );
}

struct Firing {
  callback_id: i32,
  context_id: i32,
  label: &'static str,
  persistence: Persistence,
  errmsg: Option<String>,
}

unsafe fn host_string(ptr: *const c_char) -> Option<String> {
  if ptr.is_null() {
    return None;
  }
  // SAFETY: non-null and NUL-terminated per the trampoline contracts.
  Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

fn fire(firing: Firing, arguments: impl FnOnce() -> Result<Vec<Value>, ScriptError>) {
  let callback_id = firing.callback_id;
  let context_id = firing.context_id;
  let persistence = firing.persistence;
  if catch_unwind(AssertUnwindSafe(|| deliver(firing, arguments))).is_ok() {
    return;
  }

  error!(context_id, callback_id, "callback panicked");
  let recovered = catch_unwind(AssertUnwindSafe(|| {
    recover(callback_id, context_id, persistence)
  }));
  if recovered.is_err() {
    error!(context_id, callback_id, "panic recovery panicked");
  }
}

fn recover(callback_id: i32, context_id: i32, persistence: Persistence) {
  let Some(ctx) = ContextId::from_ffi(context_id).and_then(get_context) else {
    return;
  };
  ctx.report_error(ScriptError::internal(
    "Failed to trigger callback: callback panicked.",
  ));
  if persistence == Persistence::Transient {
    if let (Some(id), Ok(mut registry)) = (
      CallbackId::from_raw(callback_id),
      ctx.registry_mut_checked(),
    ) {
      registry.remove(id);
    }
  }
}

fn deliver(firing: Firing, arguments: impl FnOnce() -> Result<Vec<Value>, ScriptError>) {
  let Firing {
    callback_id,
    context_id,
    label,
    persistence,
    errmsg,
  } = firing;

  let Some(ctx) = ContextId::from_ffi(context_id).and_then(get_context) else {
    trace!(context_id, callback_id, "firing for unknown context dropped");
    return;
  };
  if !ctx.is_valid() {
    trace!(context_id, callback_id, "firing for invalid context dropped");
    return;
  }
  if ctx.is_frozen() {
    warn!(context_id, callback_id, "Failed to trigger {label} callback: context is frozen");
    return;
  }
  let Some(id) = CallbackId::from_raw(callback_id) else {
    trace!(context_id, callback_id, "firing without callback dropped");
    return;
  };
  // Resolve afresh on every firing; the record is cloned out so no registry borrow is held while
  // script runs.
  let Some(record) = ctx.registry().resolve(id).cloned() else {
    trace!(context_id, callback_id, "firing for removed callback dropped");
    return;
  };

  match (record.callback(), errmsg) {
    (None, _) => ctx.report_error(ScriptError::internal(format!(
      "Failed to trigger callback: {label} callback is null."
    ))),
    (Some(_), Some(errmsg)) => ctx.report_error(ScriptError::from_host(errmsg)),
    (Some(callback), None) => match arguments() {
      Ok(args) => {
        trace!(context_id, callback_id, "invoking {label} callback");
        if let Err(err) = callback.call(&ctx, Value::Undefined, &args) {
          ctx.report_error(err.to_script_error());
        }
      }
      Err(err) => ctx.report_error(err),
    },
  }

  if persistence == Persistence::Transient {
    ctx.registry_mut().remove(id);
  }
}
