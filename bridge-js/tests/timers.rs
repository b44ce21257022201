use bridge_js::allocate_context;
use bridge_js::dispose_context;
use bridge_js::init_pool;
use bridge_js::virtual_host;
use bridge_js::BridgeError;
use bridge_js::CallbackId;
use bridge_js::Context;
use bridge_js::HostMethods;
use bridge_js::JsFunction;
use bridge_js::PoolOptions;
use bridge_js::ScriptError;
use bridge_js::Value;
use std::cell::RefCell;
use std::rc::Rc;

type CallLog = Rc<RefCell<Vec<Vec<Value>>>>;

fn setup() -> Rc<Context> {
  setup_with(virtual_host::host_methods())
}

fn setup_with(host: HostMethods) -> Rc<Context> {
  virtual_host::reset();
  init_pool(PoolOptions::default(), host);
  allocate_context().unwrap()
}

fn recorder(log: &CallLog) -> Value {
  let log = log.clone();
  Value::Function(JsFunction::new("callback", move |_, _, args| {
    log.borrow_mut().push(args.to_vec());
    Ok(Value::Undefined)
  }))
}

fn handle(value: Value) -> CallbackId {
  match value {
    Value::Number(n) => CallbackId::from_raw(n as i32).unwrap(),
    other => panic!("expected numeric handle, got {other:?}"),
  }
}

#[test]
fn timeout_fires_once_after_its_delay() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("setTimeout", &[recorder(&log), Value::from(10)])
      .unwrap(),
  );
  assert!(ctx.registry().contains(id));

  assert_eq!(virtual_host::advance(9), 0);
  assert!(log.borrow().is_empty());
  assert_eq!(virtual_host::advance(1), 1);
  assert_eq!(log.borrow().len(), 1);
  assert!(log.borrow()[0].is_empty());

  assert!(ctx.registry().resolve(id).is_none());
  assert_eq!(virtual_host::advance(100), 0);
  assert_eq!(log.borrow().len(), 1);
}

#[test]
fn interval_stays_registered_between_firings() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("setInterval", &[recorder(&log), Value::from(5)])
      .unwrap(),
  );

  assert_eq!(virtual_host::advance(5), 1);
  assert!(ctx.registry().resolve(id).is_some());
  assert_eq!(virtual_host::advance(10), 2);
  assert!(ctx.registry().resolve(id).is_some());
  assert_eq!(log.borrow().len(), 3);

  ctx
    .call_global("clearInterval", &[Value::from(id.to_raw())])
    .unwrap();
  assert!(ctx.registry().resolve(id).is_none());
  assert_eq!(virtual_host::advance(50), 0);
  assert_eq!(log.borrow().len(), 3);
}

#[test]
fn clear_before_firing_prevents_invocation() {
  let ctx = setup();
  let log = CallLog::default();
  let id = ctx
    .call_global("setTimeout", &[recorder(&log), Value::from(10)])
    .unwrap();
  ctx.call_global("clearTimeout", &[id.clone()]).unwrap();

  virtual_host::advance(20);
  assert!(log.borrow().is_empty());
  assert_eq!(
    virtual_host::cancellations(),
    vec![(ctx.id().to_ffi(), handle(id).to_raw())]
  );
}

#[test]
fn stale_firing_after_cancel_is_silent() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("setTimeout", &[recorder(&log), Value::from(10)])
      .unwrap(),
  );
  ctx
    .call_global("clearTimeout", &[Value::from(id.to_raw())])
    .unwrap();

  // A host that ignores cancellation still cannot reach the callback.
  unsafe {
    bridge_js::handle_transient_callback(id.to_raw(), ctx.id().to_ffi(), std::ptr::null())
  };
  assert!(log.borrow().is_empty());
  assert!(virtual_host::reported_errors().is_empty());
}

#[test]
fn missing_callback_is_a_synchronous_error() {
  let ctx = setup();
  let err = ctx.call_global("setTimeout", &[]).unwrap_err();
  assert!(matches!(
    err,
    BridgeError::NotEnoughArguments {
      method: "setTimeout",
      required: 1,
      present: 0
    }
  ));
  assert_eq!(
    err.to_string(),
    "Failed to execute 'setTimeout': 1 argument required, but only 0 present."
  );
  assert!(ctx.registry().is_empty());
  assert_eq!(virtual_host::pending_timers(), 0);
}

#[test]
fn non_function_callback_is_a_type_error() {
  let ctx = setup();
  let err = ctx
    .call_global("setInterval", &[Value::from("code"), Value::from(1)])
    .unwrap_err();
  assert!(matches!(err, BridgeError::InvalidArgument { .. }));
  assert_eq!(err.to_script_error().kind, bridge_js::ErrorKind::TypeError);
  assert!(ctx.registry().is_empty());
}

#[test]
fn non_numeric_delay_is_rejected_before_registration() {
  let ctx = setup();
  let log = CallLog::default();
  let err = ctx
    .call_global("setTimeout", &[recorder(&log), Value::from("10")])
    .unwrap_err();
  assert!(matches!(err, BridgeError::InvalidArgument { .. }));
  assert!(ctx.registry().is_empty());
}

#[test]
fn missing_delay_fires_on_next_advance() {
  let ctx = setup();
  let log = CallLog::default();
  ctx.call_global("setTimeout", &[recorder(&log)]).unwrap();
  assert_eq!(virtual_host::advance(0), 1);
  assert_eq!(log.borrow().len(), 1);
}

#[test]
fn host_failure_throws_and_leaves_no_record() {
  let ctx = setup();
  let log = CallLog::default();
  virtual_host::fail_next_schedules(1);
  let err = ctx
    .call_global("setTimeout", &[recorder(&log), Value::from(10)])
    .unwrap_err();
  assert!(matches!(err, BridgeError::HostFailure { .. }));
  assert_eq!(
    err.to_string(),
    "Failed to execute 'setTimeout': host method (setTimeout) execute failed."
  );
  assert!(ctx.registry().is_empty());

  // The failure was one-off.
  ctx
    .call_global("setTimeout", &[recorder(&log), Value::from(10)])
    .unwrap();
  assert_eq!(ctx.registry().len(), 1);
}

#[test]
fn missing_capability_is_reported_per_entry_point() {
  let ctx = setup_with(HostMethods {
    set_timeout: None,
    ..virtual_host::host_methods()
  });
  let log = CallLog::default();
  let err = ctx
    .call_global("setTimeout", &[recorder(&log), Value::from(1)])
    .unwrap_err();
  assert_eq!(
    err.to_string(),
    "Failed to execute 'setTimeout': host method (setTimeout) is not registered."
  );
  assert!(ctx.registry().is_empty());

  // Other primitives are unaffected.
  ctx
    .call_global("setInterval", &[recorder(&log), Value::from(1)])
    .unwrap();
}

#[test]
fn frozen_context_rejects_scheduling_without_registering() {
  let ctx = setup();
  let log = CallLog::default();
  assert!(ctx.freeze());

  for name in ["setTimeout", "setInterval", "requestAnimationFrame"] {
    let result = ctx.call_global(name, &[recorder(&log), Value::from(1)]).unwrap();
    assert_eq!(result, Value::Undefined, "{name} while frozen");
  }
  assert!(ctx.registry().is_empty());
  assert_eq!(virtual_host::pending_timers(), 0);
  assert_eq!(virtual_host::pending_frames(), 0);
}

#[test]
fn frozen_context_withholds_firings_without_consuming_them() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("setTimeout", &[recorder(&log), Value::from(10)])
      .unwrap(),
  );
  ctx.freeze();
  virtual_host::advance(10);
  assert!(log.borrow().is_empty());
  assert!(ctx.registry().resolve(id).is_some());

  // Redelivery after unfreezing runs the callback.
  ctx.unfreeze();
  unsafe {
    bridge_js::handle_transient_callback(id.to_raw(), ctx.id().to_ffi(), std::ptr::null())
  };
  assert_eq!(log.borrow().len(), 1);
  assert!(ctx.registry().resolve(id).is_none());
}

#[test]
fn two_intervals_are_independent() {
  let ctx = setup();
  let fast = CallLog::default();
  let slow = CallLog::default();
  let fast_id = ctx
    .call_global("setInterval", &[recorder(&fast), Value::from(2)])
    .unwrap();
  ctx
    .call_global("setInterval", &[recorder(&slow), Value::from(3)])
    .unwrap();

  virtual_host::advance(6);
  assert_eq!(fast.borrow().len(), 3);
  assert_eq!(slow.borrow().len(), 2);

  ctx.call_global("clearInterval", &[fast_id]).unwrap();
  virtual_host::advance(6);
  assert_eq!(fast.borrow().len(), 3);
  assert_eq!(slow.borrow().len(), 4);
}

#[test]
fn interval_can_cancel_itself() {
  let ctx = setup();
  let count = Rc::new(RefCell::new(0));
  let own_id = Rc::new(RefCell::new(Value::Undefined));
  let callback = {
    let count = count.clone();
    let own_id = own_id.clone();
    JsFunction::new("tick", move |ctx, _, _| {
      *count.borrow_mut() += 1;
      if *count.borrow() == 2 {
        let id = own_id.borrow().clone();
        ctx.call_global("clearInterval", &[id])?;
      }
      Ok(Value::Undefined)
    })
  };
  let id = ctx
    .call_global("setInterval", &[Value::Function(callback), Value::from(1)])
    .unwrap();
  *own_id.borrow_mut() = id;

  virtual_host::advance(10);
  assert_eq!(*count.borrow(), 2);
  assert_eq!(virtual_host::pending_timers(), 0);
  assert!(ctx.registry().is_empty());
}

#[test]
fn callback_may_schedule_more_work() {
  let ctx = setup();
  let log = CallLog::default();
  let inner = recorder(&log);
  let outer = JsFunction::new("outer", move |ctx, _, _| {
    ctx.call_global("setTimeout", &[inner.clone(), Value::from(5)])?;
    Ok(Value::Undefined)
  });
  ctx
    .call_global("setTimeout", &[Value::Function(outer), Value::from(5)])
    .unwrap();

  assert_eq!(virtual_host::advance(5), 1);
  assert!(log.borrow().is_empty());
  assert_eq!(virtual_host::advance(5), 1);
  assert_eq!(log.borrow().len(), 1);
}

#[test]
fn clear_timeout_does_not_cancel_animation_frames() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("requestAnimationFrame", &[recorder(&log)])
      .unwrap(),
  );
  ctx
    .call_global("clearTimeout", &[Value::from(id.to_raw())])
    .unwrap();
  // The local record survives a mismatched cancel.
  assert!(ctx.registry().resolve(id).is_some());
}

#[test]
fn cancel_with_unknown_id_is_a_no_op() {
  let ctx = setup();
  assert_eq!(
    ctx.call_global("clearTimeout", &[Value::from(999)]).unwrap(),
    Value::Undefined
  );
  assert_eq!(
    ctx
      .call_global("cancelAnimationFrame", &[Value::from(-1)])
      .unwrap(),
    Value::Undefined
  );
}

#[test]
fn cancel_requires_a_numeric_handle() {
  let ctx = setup();
  let err = ctx.call_global("clearTimeout", &[]).unwrap_err();
  assert!(matches!(err, BridgeError::NotEnoughArguments { .. }));
  let err = ctx
    .call_global("clearTimeout", &[Value::from("1")])
    .unwrap_err();
  assert!(matches!(err, BridgeError::InvalidArgument { .. }));
}

#[test]
fn animation_frame_receives_timestamp() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("requestAnimationFrame", &[recorder(&log)])
      .unwrap(),
  );
  assert_eq!(virtual_host::run_frame(16.5), 1);
  assert_eq!(*log.borrow(), vec![vec![Value::Number(16.5)]]);
  assert!(ctx.registry().resolve(id).is_none());
  assert_eq!(virtual_host::run_frame(33.0), 0);
}

#[test]
fn cancelled_animation_frame_never_runs() {
  let ctx = setup();
  let log = CallLog::default();
  let id = ctx
    .call_global("requestAnimationFrame", &[recorder(&log)])
    .unwrap();
  ctx.call_global("cancelAnimationFrame", &[id]).unwrap();
  assert_eq!(virtual_host::run_frame(16.0), 0);
  assert!(log.borrow().is_empty());
}

#[test]
fn host_error_is_reported_instead_of_invoking() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("setTimeout", &[recorder(&log), Value::from(1)])
      .unwrap(),
  );
  virtual_host::fail_next_firing("timer backend unavailable");
  virtual_host::advance(1);

  assert!(log.borrow().is_empty());
  assert_eq!(
    virtual_host::reported_errors(),
    vec![(
      ctx.id().to_ffi(),
      "Error: timer backend unavailable".to_string()
    )]
  );
  assert!(ctx.registry().resolve(id).is_none());
}

#[test]
fn thrown_error_reaches_onerror_and_host() {
  let ctx = setup();
  let seen = Rc::new(RefCell::new(Vec::new()));
  let onerror = {
    let seen = seen.clone();
    JsFunction::new("onerror", move |_, _, args| {
      seen.borrow_mut().push(args[0].clone());
      Ok(Value::Undefined)
    })
  };
  ctx.set_global("onerror", Value::Function(onerror));

  let thrower = JsFunction::new("thrower", |_, _, _| {
    Err(ScriptError::from_host("boom").into())
  });
  ctx
    .call_global("setTimeout", &[Value::Function(thrower), Value::from(0)])
    .unwrap();
  virtual_host::advance(0);

  assert_eq!(
    *seen.borrow(),
    vec![Value::Error(ScriptError::from_host("boom"))]
  );
  assert_eq!(
    virtual_host::reported_errors(),
    vec![(ctx.id().to_ffi(), "Error: boom".to_string())]
  );
  assert!(ctx.registry().is_empty());
}

#[test]
fn throwing_interval_keeps_firing() {
  let ctx = setup();
  let thrower = JsFunction::new("thrower", |_, _, _| {
    Err(BridgeError::Throw(Value::from("nope")))
  });
  ctx
    .call_global("setInterval", &[Value::Function(thrower), Value::from(1)])
    .unwrap();
  virtual_host::advance(3);
  assert_eq!(virtual_host::reported_errors().len(), 3);
  assert_eq!(ctx.registry().len(), 1);
}

#[test]
fn firing_after_dispose_is_silent() {
  let ctx = setup();
  let log = CallLog::default();
  let id = handle(
    ctx
      .call_global("setTimeout", &[recorder(&log), Value::from(10)])
      .unwrap(),
  );
  let context_id = ctx.id();
  dispose_context(context_id).unwrap();

  unsafe {
    bridge_js::handle_transient_callback(id.to_raw(), context_id.to_ffi(), std::ptr::null())
  };
  virtual_host::advance(10);
  assert!(log.borrow().is_empty());
  assert!(virtual_host::reported_errors().is_empty());
  assert!(ctx.registry().resolve(id).is_none());
}

#[test]
fn disposed_context_rejects_bindings() {
  let ctx = setup();
  let set_timeout = ctx.global("setTimeout");
  dispose_context(ctx.id()).unwrap();
  let log = CallLog::default();
  let err = ctx.call(&set_timeout, &[recorder(&log)]).unwrap_err();
  assert!(matches!(err, BridgeError::ContextDisposed(_)));
}

#[test]
fn timer_ids_are_distinct_positive_integers() {
  let ctx = setup();
  let log = CallLog::default();
  let a = handle(ctx.call_global("setTimeout", &[recorder(&log)]).unwrap());
  let b = handle(ctx.call_global("setInterval", &[recorder(&log)]).unwrap());
  let c = handle(
    ctx
      .call_global("requestAnimationFrame", &[recorder(&log)])
      .unwrap(),
  );
  assert!(a.to_raw() > 0);
  assert_ne!(a, b);
  assert_ne!(b, c);
  assert_ne!(a, c);
}

#[test]
fn frame_cancelled_by_an_earlier_frame_is_skipped() {
  let ctx = setup();
  let log = CallLog::default();
  let victim = Rc::new(RefCell::new(Value::Undefined));
  let canceller = {
    let victim = victim.clone();
    JsFunction::new("canceller", move |ctx, _, _| {
      let id = victim.borrow().clone();
      ctx.call_global("cancelAnimationFrame", &[id])?;
      Ok(Value::Undefined)
    })
  };
  ctx
    .call_global("requestAnimationFrame", &[Value::Function(canceller)])
    .unwrap();
  *victim.borrow_mut() = ctx
    .call_global("requestAnimationFrame", &[recorder(&log)])
    .unwrap();

  assert_eq!(virtual_host::run_frame(16.0), 1);
  assert!(log.borrow().is_empty());
  assert_eq!(virtual_host::pending_frames(), 0);
}

#[test]
fn frames_requested_during_a_frame_wait_for_the_next_one() {
  let ctx = setup();
  let log = CallLog::default();
  let inner = recorder(&log);
  let outer = JsFunction::new("outer", move |ctx, _, _| {
    ctx.call_global("requestAnimationFrame", &[inner.clone()])?;
    Ok(Value::Undefined)
  });
  ctx
    .call_global("requestAnimationFrame", &[Value::Function(outer)])
    .unwrap();

  assert_eq!(virtual_host::run_frame(16.0), 1);
  assert!(log.borrow().is_empty());
  assert_eq!(virtual_host::run_frame(32.0), 1);
  assert_eq!(*log.borrow(), vec![vec![Value::Number(32.0)]]);
}
