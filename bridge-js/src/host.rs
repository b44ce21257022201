//! The native host boundary.
//!
//! The host runtime (the embedding's own event loop: timers, frame pacing, platform modules) is
//! reachable only through the C-ABI function pointers in [`HostMethods`]. It is handed an opaque
//! `callback_id` plus a fixed trampoline from [`crate::trampoline`], and later calls the trampoline
//! back on the context's engine thread. Hosts key their pending work by
//! `(context_id, callback_id)`.
//!
//! Every entry point is optional; the bridge checks for `None` before calling and raises a
//! "missing capability" error instead.

use std::ffi::c_char;

/// Returned by scheduling entry points to signal a host-side failure.
pub const HOST_FAILURE: i32 = -1;

/// Trampoline for timer firings. `errmsg` is null on success.
pub type TimerCallback =
  unsafe extern "C" fn(callback_id: i32, context_id: i32, errmsg: *const c_char);

/// Trampoline for animation-frame firings, carrying the frame timestamp in milliseconds.
pub type FrameCallback =
  unsafe extern "C" fn(callback_id: i32, context_id: i32, timestamp: f64, errmsg: *const c_char);

/// Trampoline for module invocation completions. `data` is null or NUL-terminated JSON text.
pub type ModuleCallback = unsafe extern "C" fn(
  callback_id: i32,
  context_id: i32,
  errmsg: *const c_char,
  data: *const c_char,
);

/// `setTimeout` / `setInterval`: schedule `callback` after `delay_ms`. Returns [`HOST_FAILURE`]
/// on failure.
pub type ScheduleTimerFn = unsafe extern "C" fn(
  callback_id: i32,
  context_id: i32,
  callback: TimerCallback,
  delay_ms: i32,
) -> i32;

/// `requestAnimationFrame`: schedule `callback` for the next frame. Returns [`HOST_FAILURE`] on
/// failure.
pub type RequestFrameFn =
  unsafe extern "C" fn(callback_id: i32, context_id: i32, callback: FrameCallback) -> i32;

/// Best-effort cancellation of a pending timer or frame request.
pub type CancelFn = unsafe extern "C" fn(context_id: i32, callback_id: i32);

/// Invoke `method` on the platform module `module` with JSON `params`. Completion is delivered
/// through `callback` unless `callback_id` is `0`. Returns [`HOST_FAILURE`] on failure.
pub type InvokeModuleFn = unsafe extern "C" fn(
  callback_id: i32,
  context_id: i32,
  module: *const c_char,
  method: *const c_char,
  params: *const c_char,
  callback: ModuleCallback,
) -> i32;

/// Sink for errors reported through a context's error channel.
pub type ErrorHandlerFn = unsafe extern "C" fn(context_id: i32, errmsg: *const c_char);

/// The table of host entry points registered by the embedding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct HostMethods {
  pub set_timeout: Option<ScheduleTimerFn>,
  pub set_interval: Option<ScheduleTimerFn>,
  pub clear_timeout: Option<CancelFn>,
  pub request_animation_frame: Option<RequestFrameFn>,
  pub cancel_animation_frame: Option<CancelFn>,
  pub invoke_module: Option<InvokeModuleFn>,
  pub on_js_error: Option<ErrorHandlerFn>,
}
