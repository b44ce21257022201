//! A deterministic, engine-supplied host runtime.
//!
//! This implements every [`HostMethods`] entry point against a thread-local virtual clock so that
//! embeddings without a real event loop (and this crate's tests) can drive timers, animation
//! frames and module invocations explicitly:
//! - [`advance`] moves the clock forward and fires due timers in `(due time, scheduling order)`
//!   order, re-arming intervals,
//! - [`run_frame`] fires every frame callback requested before the call,
//! - [`complete_module_call`] answers the oldest pending module invocation.
//!
//! Trampolines are always invoked with no host state borrowed, so callbacks may freely schedule or
//! cancel further work.
//!
//! Like a real host, this one knows nothing about freezing: a one-shot firing delivered while its
//! context is frozen is consumed here, and the record it targets stays registered until the
//! context is disposed or the embedder redelivers it through the trampoline.

use crate::host::FrameCallback;
use crate::host::HostMethods;
use crate::host::ModuleCallback;
use crate::host::TimerCallback;
use crate::host::HOST_FAILURE;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::ffi::c_char;
use std::ffi::CStr;
use std::ffi::CString;
use std::ptr;

#[derive(Clone, Copy)]
struct PendingTimer {
  callback_id: i32,
  context_id: i32,
  trampoline: TimerCallback,
  period: Option<u64>,
}

#[derive(Clone, Copy)]
struct PendingFrame {
  seq: u64,
  callback_id: i32,
  context_id: i32,
  trampoline: FrameCallback,
}

/// A module invocation received from a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCall {
  pub callback_id: i32,
  pub context_id: i32,
  pub module: String,
  pub method: String,
  pub params: String,
}

struct PendingModuleCall {
  call: ModuleCall,
  trampoline: ModuleCallback,
}

#[derive(Default)]
struct HostState {
  now: u64,
  seq: u64,
  timers: BTreeMap<(u64, u64), PendingTimer>,
  frames: Vec<PendingFrame>,
  module_calls: VecDeque<PendingModuleCall>,
  fail_schedules: usize,
  firing_error: Option<CString>,
  cancellations: Vec<(i32, i32)>,
  errors: Vec<(i32, String)>,
}

impl HostState {
  fn take_failure(&mut self) -> bool {
    if self.fail_schedules == 0 {
      return false;
    }
    self.fail_schedules -= 1;
    true
  }

  fn push_timer(&mut self, due: u64, timer: PendingTimer) {
    self.seq += 1;
    self.timers.insert((due, self.seq), timer);
  }
}

thread_local! {
  static HOST: RefCell<HostState> = RefCell::new(HostState::default());
}

fn with_state<R>(f: impl FnOnce(&mut HostState) -> R) -> R {
  HOST.with(|state| f(&mut state.borrow_mut()))
}

/// The full table of virtual host entry points.
pub fn host_methods() -> HostMethods {
  HostMethods {
    set_timeout: Some(set_timeout),
    set_interval: Some(set_interval),
    clear_timeout: Some(cancel),
    request_animation_frame: Some(request_animation_frame),
    cancel_animation_frame: Some(cancel),
    invoke_module: Some(invoke_module),
    on_js_error: Some(on_js_error),
  }
}

/// Clears all pending work, recorded events and injected failures, and rewinds the clock.
pub fn reset() {
  with_state(|state| *state = HostState::default());
}

/// Current virtual time in milliseconds.
pub fn now() -> u64 {
  with_state(|state| state.now)
}

/// Makes the next `count` scheduling calls return [`HOST_FAILURE`].
pub fn fail_next_schedules(count: usize) {
  with_state(|state| state.fail_schedules = count);
}

/// Delivers `message` as the host error of the next timer or frame firing.
pub fn fail_next_firing(message: &str) {
  let message = CString::new(message).ok();
  with_state(|state| state.firing_error = message);
}

pub fn pending_timers() -> usize {
  with_state(|state| state.timers.len())
}

pub fn pending_frames() -> usize {
  with_state(|state| state.frames.len())
}

pub fn pending_module_calls() -> Vec<ModuleCall> {
  with_state(|state| state.module_calls.iter().map(|p| p.call.clone()).collect())
}

/// Every `(context_id, callback_id)` pair a context asked to cancel since the last [`reset`], in
/// order. This is a record of calls only; pending work is dropped at cancel time.
pub fn cancellations() -> Vec<(i32, i32)> {
  with_state(|state| state.cancellations.clone())
}

/// Every error forwarded through `on_js_error`, in order.
pub fn reported_errors() -> Vec<(i32, String)> {
  with_state(|state| state.errors.clone())
}

/// Advances the clock by `ms`, firing every timer that becomes due. Returns how many firings were
/// delivered.
pub fn advance(ms: u64) -> usize {
  let target = with_state(|state| state.now.saturating_add(ms));
  let mut fired = 0;
  loop {
    let next = with_state(|state| {
      let (&key, _) = state.timers.iter().next()?;
      if key.0 > target {
        return None;
      }
      let timer = state.timers.remove(&key)?;
      state.now = key.0;
      if let Some(period) = timer.period {
        // Re-armed before firing so a cancel from inside the callback also stops the next run.
        state.push_timer(key.0 + period.max(1), timer);
      }
      Some((timer, state.firing_error.take()))
    });
    let Some((timer, error)) = next else {
      break;
    };
    let errmsg = error.as_ref().map_or(ptr::null(), |e| e.as_ptr());
    // SAFETY: `errmsg` is null or owned by `error`, which outlives the call.
    unsafe { (timer.trampoline)(timer.callback_id, timer.context_id, errmsg) };
    fired += 1;
  }
  with_state(|state| state.now = target);
  fired
}

/// Fires every animation-frame callback requested so far with `timestamp`. Frames requested by
/// those callbacks wait for the next call.
pub fn run_frame(timestamp: f64) -> usize {
  let cutoff = with_state(|state| state.seq);
  let mut fired = 0;
  loop {
    // Frames cancelled by an earlier callback in this batch are already gone.
    let next = with_state(|state| {
      let index = state.frames.iter().position(|f| f.seq <= cutoff)?;
      let frame = state.frames.remove(index);
      Some((frame, state.firing_error.take()))
    });
    let Some((frame, error)) = next else {
      break;
    };
    let errmsg = error.as_ref().map_or(ptr::null(), |e| e.as_ptr());
    // SAFETY: `errmsg` is null or owned by `error`, which outlives the call.
    unsafe { (frame.trampoline)(frame.callback_id, frame.context_id, timestamp, errmsg) };
    fired += 1;
  }
  fired
}

/// Answers the oldest pending module call with either JSON `data` or a host error message.
/// Returns `false` if nothing was pending.
pub fn complete_module_call(result: Result<&str, &str>) -> bool {
  let Some(pending) = with_state(|state| state.module_calls.pop_front()) else {
    return false;
  };
  let (errmsg, data) = match result {
    Ok(data) => (None, CString::new(data).ok()),
    Err(message) => (CString::new(message).ok(), None),
  };
  let errmsg_ptr = errmsg.as_ref().map_or(ptr::null(), |e| e.as_ptr());
  let data_ptr = data.as_ref().map_or(ptr::null(), |d| d.as_ptr());
  // SAFETY: both pointers are null or owned by locals that outlive the call.
  unsafe {
    (pending.trampoline)(
      pending.call.callback_id,
      pending.call.context_id,
      errmsg_ptr,
      data_ptr,
    )
  };
  true
}

unsafe extern "C" fn set_timeout(
  callback_id: i32,
  context_id: i32,
  callback: TimerCallback,
  delay_ms: i32,
) -> i32 {
  schedule_timer(callback_id, context_id, callback, delay_ms, false)
}

unsafe extern "C" fn set_interval(
  callback_id: i32,
  context_id: i32,
  callback: TimerCallback,
  delay_ms: i32,
) -> i32 {
  schedule_timer(callback_id, context_id, callback, delay_ms, true)
}

fn schedule_timer(
  callback_id: i32,
  context_id: i32,
  trampoline: TimerCallback,
  delay_ms: i32,
  repeat: bool,
) -> i32 {
  with_state(|state| {
    if state.take_failure() {
      return HOST_FAILURE;
    }
    let delay = delay_ms.max(0) as u64;
    let due = state.now.saturating_add(delay);
    state.push_timer(
      due,
      PendingTimer {
        callback_id,
        context_id,
        trampoline,
        period: repeat.then_some(delay),
      },
    );
    callback_id
  })
}

unsafe extern "C" fn request_animation_frame(
  callback_id: i32,
  context_id: i32,
  callback: FrameCallback,
) -> i32 {
  with_state(|state| {
    if state.take_failure() {
      return HOST_FAILURE;
    }
    state.seq += 1;
    let seq = state.seq;
    state.frames.push(PendingFrame {
      seq,
      callback_id,
      context_id,
      trampoline: callback,
    });
    callback_id
  })
}

unsafe extern "C" fn cancel(context_id: i32, callback_id: i32) {
  with_state(|state| {
    state.cancellations.push((context_id, callback_id));
    state
      .timers
      .retain(|_, t| (t.context_id, t.callback_id) != (context_id, callback_id));
    state
      .frames
      .retain(|f| (f.context_id, f.callback_id) != (context_id, callback_id));
  });
}

unsafe extern "C" fn invoke_module(
  callback_id: i32,
  context_id: i32,
  module: *const c_char,
  method: *const c_char,
  params: *const c_char,
  callback: ModuleCallback,
) -> i32 {
  // SAFETY: the bridge passes valid NUL-terminated strings for the duration of this call.
  let (module, method, params) = unsafe {
    (
      CStr::from_ptr(module).to_string_lossy().into_owned(),
      CStr::from_ptr(method).to_string_lossy().into_owned(),
      CStr::from_ptr(params).to_string_lossy().into_owned(),
    )
  };
  with_state(|state| {
    if state.take_failure() {
      return HOST_FAILURE;
    }
    state.module_calls.push_back(PendingModuleCall {
      call: ModuleCall {
        callback_id,
        context_id,
        module,
        method,
        params,
      },
      trampoline: callback,
    });
    0
  })
}

unsafe extern "C" fn on_js_error(context_id: i32, errmsg: *const c_char) {
  if errmsg.is_null() {
    return;
  }
  // SAFETY: the bridge passes a valid NUL-terminated string for the duration of this call.
  let message = unsafe { CStr::from_ptr(errmsg) }
    .to_string_lossy()
    .into_owned();
  with_state(|state| state.errors.push((context_id, message)));
}
