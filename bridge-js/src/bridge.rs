//! Script bindings for the asynchronous host primitives.
//!
//! Every scheduling binding follows the same shape:
//! 1. validate arguments (input errors are thrown synchronously),
//! 2. silently return `undefined` while the context is frozen,
//! 3. fail with a capability error if the host never registered the entry point,
//! 4. register a [`CallbackRecord`] and hand its id plus a fixed trampoline to the host,
//! 5. return the id as the script-visible handle, or throw if the host reports [`HOST_FAILURE`].
//!
//! When the host fails to schedule, the freshly registered record is removed again before the error
//! is thrown: no handle escapes to script, so nothing could ever cancel it.

use crate::context::Context;
use crate::error::BridgeError;
use crate::handle::CallbackId;
use crate::host::CancelFn;
use crate::host::ScheduleTimerFn;
use crate::host::TimerCallback;
use crate::host::HOST_FAILURE;
use crate::registry::CallbackKind;
use crate::registry::CallbackRecord;
use crate::registry::Persistence;
use crate::trampoline;
use crate::value::JsFunction;
use crate::value::Value;
use std::ffi::CString;
use tracing::debug;
use tracing::warn;

/// A native binding implemented in Rust.
///
/// The arguments are exactly what script passed; bindings perform their own arity checks.
pub type NativeCallFn = fn(&Context, Value, &[Value]) -> Result<Value, BridgeError>;

/// Registry metadata for a native binding installed on the global object.
#[derive(Clone, Copy)]
pub struct NativeFunctionMeta {
  pub name: &'static str,
  pub length: u32,
  pub call: NativeCallFn,
}

const TIMER_BINDINGS: &[NativeFunctionMeta] = &[
  NativeFunctionMeta {
    name: "setTimeout",
    length: 0,
    call: set_timeout,
  },
  NativeFunctionMeta {
    name: "setInterval",
    length: 0,
    call: set_interval,
  },
  NativeFunctionMeta {
    name: "clearTimeout",
    length: 0,
    call: clear_timeout,
  },
  NativeFunctionMeta {
    name: "clearInterval",
    length: 0,
    call: clear_timeout,
  },
  NativeFunctionMeta {
    name: "requestAnimationFrame",
    length: 0,
    call: request_animation_frame,
  },
  NativeFunctionMeta {
    name: "cancelAnimationFrame",
    length: 0,
    call: cancel_animation_frame,
  },
];

const MODULE_BINDINGS: &[NativeFunctionMeta] = &[NativeFunctionMeta {
  name: "__invoke_module__",
  length: 2,
  call: invoke_module,
}];

/// The timer and animation-frame bindings.
pub fn timer_bindings() -> &'static [NativeFunctionMeta] {
  TIMER_BINDINGS
}

/// The module invocation bindings.
pub fn module_bindings() -> &'static [NativeFunctionMeta] {
  MODULE_BINDINGS
}

fn install(ctx: &Context, bindings: &[NativeFunctionMeta]) {
  for meta in bindings {
    ctx.set_global(meta.name, Value::Function(JsFunction::new(meta.name, meta.call)));
  }
}

/// Installs `setTimeout`, `setInterval`, `clearTimeout`, `clearInterval`,
/// `requestAnimationFrame` and `cancelAnimationFrame` on the context's global scope.
pub fn bind_timer(ctx: &Context) {
  install(ctx, TIMER_BINDINGS);
}

/// Installs `__invoke_module__` on the context's global scope.
pub fn bind_module(ctx: &Context) {
  install(ctx, MODULE_BINDINGS);
}

/// `setTimeout(callback, delay?)`.
pub fn set_timeout(ctx: &Context, _this: Value, args: &[Value]) -> Result<Value, BridgeError> {
  schedule_timer(
    ctx,
    args,
    "setTimeout",
    CallbackKind::Timeout,
    ctx.host_methods().set_timeout,
  )
}

/// `setInterval(callback, delay?)`.
pub fn set_interval(ctx: &Context, _this: Value, args: &[Value]) -> Result<Value, BridgeError> {
  schedule_timer(
    ctx,
    args,
    "setInterval",
    CallbackKind::Interval,
    ctx.host_methods().set_interval,
  )
}

/// `clearTimeout(id)`, also bound as `clearInterval`.
pub fn clear_timeout(ctx: &Context, _this: Value, args: &[Value]) -> Result<Value, BridgeError> {
  cancel(
    ctx,
    args,
    "clearTimeout",
    ctx.host_methods().clear_timeout,
    CallbackKind::is_timer,
  )
}

/// `requestAnimationFrame(callback)`.
pub fn request_animation_frame(
  ctx: &Context,
  _this: Value,
  args: &[Value],
) -> Result<Value, BridgeError> {
  const METHOD: &str = "requestAnimationFrame";
  ensure_valid(ctx)?;
  let callback = callback_argument(METHOD, args)?;
  if reject_frozen(ctx, METHOD) {
    return Ok(Value::Undefined);
  }
  let Some(request) = ctx.host_methods().request_animation_frame else {
    return Err(BridgeError::MissingCapability {
      method: METHOD,
      entry: METHOD,
    });
  };

  let id = register(ctx, callback, CallbackKind::AnimationFrame);
  // SAFETY: `request` was registered by the embedding for the lifetime of the pool. The trampoline
  // is a plain function with the `FrameCallback` ABI.
  let status = unsafe {
    request(
      id.to_raw(),
      ctx.id().to_ffi(),
      trampoline::handle_raf_transient_callback,
    )
  };
  finish_schedule(ctx, id, status, METHOD, METHOD)
}

/// `cancelAnimationFrame(id)`.
pub fn cancel_animation_frame(
  ctx: &Context,
  _this: Value,
  args: &[Value],
) -> Result<Value, BridgeError> {
  cancel(
    ctx,
    args,
    "cancelAnimationFrame",
    ctx.host_methods().cancel_animation_frame,
    |kind| kind == CallbackKind::AnimationFrame,
  )
}

/// `__invoke_module__(module, method, params?, callback?)`.
///
/// `params` is serialized to JSON before crossing the boundary. When a callback is supplied it is
/// registered as a one-shot record and its id is returned; otherwise the host is told there is no
/// callback and `undefined` is returned.
pub fn invoke_module(ctx: &Context, _this: Value, args: &[Value]) -> Result<Value, BridgeError> {
  const METHOD: &str = "invokeModule";
  ensure_valid(ctx)?;
  if args.len() < 2 {
    return Err(BridgeError::NotEnoughArguments {
      method: METHOD,
      required: 2,
      present: args.len(),
    });
  }
  let module = args[0].as_str().ok_or(BridgeError::InvalidArgument {
    method: METHOD,
    message: "parameter 1 (module) must be a string.",
  })?;
  let method = args[1].as_str().ok_or(BridgeError::InvalidArgument {
    method: METHOD,
    message: "parameter 2 (method) must be a string.",
  })?;
  let params = args
    .get(2)
    .cloned()
    .unwrap_or_default()
    .to_json()
    .map_err(|_| BridgeError::InvalidArgument {
      method: METHOD,
      message: "parameter 3 (params) can not be serialized.",
    })?;
  let callback = match args.get(3).filter(|v| !v.is_undefined()) {
    None => None,
    Some(value) => Some(
      value
        .as_function()
        .cloned()
        .ok_or(BridgeError::InvalidArgument {
          method: METHOD,
          message: "parameter 4 (callback) must be a function.",
        })?,
    ),
  };

  if reject_frozen(ctx, METHOD) {
    return Ok(Value::Undefined);
  }
  let Some(invoke) = ctx.host_methods().invoke_module else {
    return Err(BridgeError::MissingCapability {
      method: METHOD,
      entry: METHOD,
    });
  };

  let interior_nul = BridgeError::InvalidArgument {
    method: METHOD,
    message: "module and method names must not contain NUL characters.",
  };
  let module = CString::new(module).map_err(|_| interior_nul.clone())?;
  let method = CString::new(method).map_err(|_| interior_nul)?;
  // Serialized JSON never contains a raw NUL.
  let params = CString::new(params).unwrap_or_default();

  let id = callback.map(|f| register(ctx, f, CallbackKind::Module));
  // SAFETY: `invoke` was registered by the embedding for the lifetime of the pool. All strings are
  // valid NUL-terminated buffers that outlive the call; the host must copy them if it keeps them.
  let status = unsafe {
    invoke(
      id.map_or(CallbackId::NONE, CallbackId::to_raw),
      ctx.id().to_ffi(),
      module.as_ptr(),
      method.as_ptr(),
      params.as_ptr(),
      trampoline::handle_module_callback,
    )
  };

  match id {
    Some(id) => finish_schedule(ctx, id, status, METHOD, METHOD),
    None if status == HOST_FAILURE => Err(BridgeError::HostFailure {
      method: METHOD,
      entry: METHOD,
    }),
    None => Ok(Value::Undefined),
  }
}

fn schedule_timer(
  ctx: &Context,
  args: &[Value],
  method: &'static str,
  kind: CallbackKind,
  schedule: Option<ScheduleTimerFn>,
) -> Result<Value, BridgeError> {
  ensure_valid(ctx)?;
  let callback = callback_argument(method, args)?;
  if reject_frozen(ctx, method) {
    return Ok(Value::Undefined);
  }
  let delay = coerce_delay(method, args.get(1))?;
  let Some(schedule) = schedule else {
    return Err(BridgeError::MissingCapability {
      method,
      entry: method,
    });
  };

  let trampoline: TimerCallback = match kind.persistence() {
    Persistence::Transient => trampoline::handle_transient_callback,
    Persistence::Persistent => trampoline::handle_persistent_callback,
  };
  let id = register(ctx, callback, kind);
  // SAFETY: `schedule` was registered by the embedding for the lifetime of the pool. The trampoline
  // is a plain function with the `TimerCallback` ABI.
  let status = unsafe { schedule(id.to_raw(), ctx.id().to_ffi(), trampoline, delay) };
  finish_schedule(ctx, id, status, method, method)
}

fn cancel(
  ctx: &Context,
  args: &[Value],
  method: &'static str,
  host_cancel: Option<CancelFn>,
  applies_to: impl Fn(CallbackKind) -> bool,
) -> Result<Value, BridgeError> {
  ensure_valid(ctx)?;
  let Some(handle) = args.first() else {
    return Err(BridgeError::NotEnoughArguments {
      method,
      required: 1,
      present: 0,
    });
  };
  if reject_frozen(ctx, method) {
    return Ok(Value::Undefined);
  }
  let Value::Number(handle) = handle else {
    return Err(BridgeError::InvalidArgument {
      method,
      message: "parameter 1 is not a timer kind.",
    });
  };
  let raw = *handle as i32;
  let Some(host_cancel) = host_cancel else {
    return Err(BridgeError::MissingCapability {
      method,
      entry: method,
    });
  };

  if let Some(id) = CallbackId::from_raw(raw) {
    let mut registry = ctx.registry_mut();
    if registry.resolve(id).is_some_and(|r| applies_to(r.kind())) {
      registry.remove(id);
      debug!(context_id = %ctx.id(), callback_id = raw, method, "callback cancelled");
    }
  }
  // SAFETY: `host_cancel` was registered by the embedding for the lifetime of the pool.
  unsafe { host_cancel(ctx.id().to_ffi(), raw) };
  Ok(Value::Undefined)
}

fn ensure_valid(ctx: &Context) -> Result<(), BridgeError> {
  if ctx.is_valid() {
    Ok(())
  } else {
    Err(BridgeError::ContextDisposed(ctx.id()))
  }
}

fn callback_argument(method: &'static str, args: &[Value]) -> Result<JsFunction, BridgeError> {
  let Some(callback) = args.first() else {
    return Err(BridgeError::NotEnoughArguments {
      method,
      required: 1,
      present: 0,
    });
  };
  callback
    .as_function()
    .cloned()
    .ok_or(BridgeError::InvalidArgument {
      method,
      message: "parameter 1 (callback) must be a function.",
    })
}

fn reject_frozen(ctx: &Context, method: &'static str) -> bool {
  if ctx.is_frozen() {
    warn!(context_id = %ctx.id(), method, "Failed to execute '{method}': context is frozen");
    return true;
  }
  false
}

/// Coerces the optional delay argument of `setTimeout`/`setInterval` to whole milliseconds.
///
/// Missing or `undefined` delays are `0`. Numbers truncate toward zero and saturate to the `i32`
/// range; `NaN` and negative delays become `0`.
pub fn coerce_delay(method: &'static str, delay: Option<&Value>) -> Result<i32, BridgeError> {
  match delay {
    None | Some(Value::Undefined) => Ok(0),
    Some(Value::Number(n)) if n.is_nan() => Ok(0),
    Some(Value::Number(n)) => Ok((n.trunc() as i32).max(0)),
    Some(_) => Err(BridgeError::InvalidArgument {
      method,
      message: "parameter 2 (timeout) only can be a number or undefined.",
    }),
  }
}

fn register(ctx: &Context, callback: JsFunction, kind: CallbackKind) -> CallbackId {
  let record = CallbackRecord::new(ctx.id(), Some(callback), kind);
  ctx.registry_mut().register(record)
}

fn finish_schedule(
  ctx: &Context,
  id: CallbackId,
  status: i32,
  method: &'static str,
  entry: &'static str,
) -> Result<Value, BridgeError> {
  if status == HOST_FAILURE {
    ctx.registry_mut().remove(id);
    return Err(BridgeError::HostFailure { method, entry });
  }
  debug!(context_id = %ctx.id(), callback_id = id.to_raw(), method, "callback scheduled");
  Ok(Value::Number(id.to_raw() as f64))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delay_defaults_to_zero() {
    assert_eq!(coerce_delay("setTimeout", None).unwrap(), 0);
    assert_eq!(coerce_delay("setTimeout", Some(&Value::Undefined)).unwrap(), 0);
  }

  #[test]
  fn delay_truncates_and_saturates() {
    let delay = |n: f64| coerce_delay("setTimeout", Some(&Value::Number(n))).unwrap();
    assert_eq!(delay(10.9), 10);
    assert_eq!(delay(-5.0), 0);
    assert_eq!(delay(f64::NAN), 0);
    assert_eq!(delay(1e12), i32::MAX);
    assert_eq!(delay(f64::INFINITY), i32::MAX);
  }

  #[test]
  fn non_numeric_delay_is_an_input_error() {
    let err = coerce_delay("setInterval", Some(&Value::string("10"))).unwrap_err();
    assert!(matches!(
      err,
      BridgeError::InvalidArgument {
        method: "setInterval",
        ..
      }
    ));
  }

  #[test]
  fn binding_tables_are_complete() {
    let names: Vec<_> = timer_bindings().iter().map(|m| m.name).collect();
    assert_eq!(
      names,
      [
        "setTimeout",
        "setInterval",
        "clearTimeout",
        "clearInterval",
        "requestAnimationFrame",
        "cancelAnimationFrame"
      ]
    );
    assert_eq!(module_bindings()[0].name, "__invoke_module__");
  }
}
