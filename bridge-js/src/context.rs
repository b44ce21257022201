use crate::bridge;
use crate::error::BridgeError;
use crate::error::ScriptError;
use crate::handle::ContextId;
use crate::host::HostMethods;
use crate::lifetime::LifetimeToken;
use crate::registry::CallbackRegistry;
use crate::runtime::Atom;
use crate::runtime::Runtime;
use crate::value::Value;
use ahash::HashMap;
use ahash::HashMapExt;
use std::cell::BorrowMutError;
use std::cell::Cell;
use std::cell::Ref;
use std::cell::RefCell;
use std::cell::RefMut;
use std::ffi::CString;
use std::fmt;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use tracing::error;
use tracing::trace;

type DisposeCallback = Box<dyn FnOnce(&Context)>;

/// One isolated script execution environment sharing the thread's [`Runtime`].
///
/// A context owns its global scope, its [`CallbackRegistry`] and its [`LifetimeToken`]. Contexts are
/// created and disposed through the pool ([`allocate_context`](crate::allocate_context),
/// [`dispose_context`](crate::dispose_context)); everything here must be called from the engine
/// thread that owns the pool.
pub struct Context {
  id: ContextId,
  token: LifetimeToken,
  runtime: Rc<Runtime>,
  host: HostMethods,
  registry: RefCell<CallbackRegistry>,
  globals: RefCell<HashMap<Atom, Value>>,
  reporting_error: Cell<bool>,
  dispose_callback: RefCell<Option<DisposeCallback>>,
}

impl Context {
  pub(crate) fn new(id: ContextId, runtime: Rc<Runtime>, host: HostMethods) -> Self {
    let token = LifetimeToken::new();
    let context = Self {
      id,
      token: token.clone(),
      runtime,
      host,
      registry: RefCell::new(CallbackRegistry::new(id, token)),
      globals: RefCell::new(HashMap::new()),
      reporting_error: Cell::new(false),
      dispose_callback: RefCell::new(None),
    };
    bridge::bind_timer(&context);
    bridge::bind_module(&context);
    context.token.mark_valid();
    context
  }

  #[inline]
  pub fn id(&self) -> ContextId {
    self.id
  }

  #[inline]
  pub fn token(&self) -> &LifetimeToken {
    &self.token
  }

  #[inline]
  pub fn runtime(&self) -> &Rc<Runtime> {
    &self.runtime
  }

  #[inline]
  pub fn host_methods(&self) -> &HostMethods {
    &self.host
  }

  pub fn is_valid(&self) -> bool {
    self.token.is_valid()
  }

  pub fn is_frozen(&self) -> bool {
    self.token.is_frozen()
  }

  /// Suspends the context: new scheduling calls are rejected and pending callbacks are withheld
  /// (not cancelled) until [`Context::unfreeze`].
  pub fn freeze(&self) -> bool {
    self.token.freeze()
  }

  pub fn unfreeze(&self) -> bool {
    self.token.unfreeze()
  }

  /// Borrows the callback registry.
  ///
  /// The borrow must not be held across a call into script or the host.
  pub fn registry(&self) -> Ref<'_, CallbackRegistry> {
    self.registry.borrow()
  }

  pub(crate) fn registry_mut(&self) -> RefMut<'_, CallbackRegistry> {
    self.registry.borrow_mut()
  }

  pub(crate) fn registry_mut_checked(&self) -> Result<RefMut<'_, CallbackRegistry>, BorrowMutError> {
    self.registry.try_borrow_mut()
  }

  /// Reads a global binding. Missing bindings read as `undefined`.
  pub fn global(&self, name: &str) -> Value {
    let atom = self.runtime.intern(name);
    self
      .globals
      .borrow()
      .get(&atom)
      .cloned()
      .unwrap_or_default()
  }

  pub fn set_global(&self, name: &str, value: Value) {
    let atom = self.runtime.intern(name);
    self.globals.borrow_mut().insert(atom, value);
  }

  /// Calls `callee` with an `undefined` receiver.
  pub fn call(&self, callee: &Value, args: &[Value]) -> Result<Value, BridgeError> {
    if !self.is_valid() {
      return Err(BridgeError::ContextDisposed(self.id));
    }
    let callee = callee.as_function().ok_or(BridgeError::NotCallable)?;
    callee.call(self, Value::Undefined, args)
  }

  /// Calls the global function `name`, e.g. `ctx.call_global("setTimeout", &[cb, 10.into()])`.
  pub fn call_global(&self, name: &str, args: &[Value]) -> Result<Value, BridgeError> {
    let callee = self.global(name);
    self.call(&callee, args)
  }

  /// Runs a script against this context.
  ///
  /// An uncaught error is reported through the error channel rather than returned. Returns whether
  /// the script completed normally.
  pub fn evaluate(&self, script: impl FnOnce(&Context) -> Result<Value, BridgeError>) -> bool {
    if !self.is_valid() {
      trace!(context_id = %self.id, "evaluate on invalid context ignored");
      return false;
    }
    match script(self) {
      Ok(_) => true,
      Err(err) => {
        self.report_error(err.to_script_error());
        false
      }
    }
  }

  /// The context's asynchronous error channel.
  ///
  /// The error is dispatched to the global `onerror` handler (if it is a function) and forwarded to
  /// the host's `on_js_error` entry point. Nothing is ever thrown back to the caller, which makes
  /// this safe to call from inside a host-driven callback. A panicking `onerror` handler is
  /// contained here as well; the error is still forwarded to the host.
  pub fn report_error(&self, err: ScriptError) {
    if !self.is_valid() {
      trace!(context_id = %self.id, error = %err, "error on invalid context dropped");
      return;
    }
    error!(context_id = %self.id, error = %err, "script error");

    if !self.reporting_error.replace(true) {
      let _reset = ReportingGuard(&self.reporting_error);
      self.dispatch_onerror(&err);
    }

    if let Some(on_js_error) = self.host.on_js_error {
      let message = CString::new(err.to_string().replace('\0', "\u{FFFD}"))
        .unwrap_or_default();
      // SAFETY: the host registered this entry point for the lifetime of the pool; `message` is a
      // valid NUL-terminated string that outlives the call.
      unsafe { on_js_error(self.id.to_ffi(), message.as_ptr()) };
    }
  }

  fn dispatch_onerror(&self, err: &ScriptError) {
    let Some(handler) = self.global("onerror").as_function().cloned() else {
      return;
    };
    let args = [Value::Error(err.clone())];
    match catch_unwind(AssertUnwindSafe(|| handler.call(self, Value::Undefined, &args))) {
      Ok(Ok(_)) => {}
      Ok(Err(nested)) => error!(
        context_id = %self.id,
        error = %nested.to_script_error(),
        "onerror handler threw"
      ),
      Err(_) => error!(context_id = %self.id, "onerror handler panicked"),
    }
  }

  /// Registers a callback run once while this context is disposed, after its callbacks have been
  /// deregistered.
  pub fn set_dispose_callback(&self, callback: impl FnOnce(&Context) + 'static) {
    *self.dispose_callback.borrow_mut() = Some(Box::new(callback));
  }

  pub(crate) fn dispose(&self) {
    if !self.token.dispose() {
      return;
    }
    let removed = self.registry.borrow_mut().remove_all_for_context(self.id);
    trace!(context_id = %self.id, removed, "callbacks deregistered");
    // Bindings are dropped outside the borrow.
    let globals = std::mem::take(&mut *self.globals.borrow_mut());
    drop(globals);
    let callback = self.dispose_callback.borrow_mut().take();
    if let Some(callback) = callback {
      callback(self);
    }
  }
}

/// Clears the `onerror` re-entrancy flag however dispatch ends.
struct ReportingGuard<'a>(&'a Cell<bool>);

impl Drop for ReportingGuard<'_> {
  fn drop(&mut self) {
    self.0.set(false);
  }
}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("id", &self.id)
      .field("state", &self.token.state())
      .field("callbacks", &self.registry.try_borrow().map(|r| r.len()).ok())
      .finish()
  }
}
