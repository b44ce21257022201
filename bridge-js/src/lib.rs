//! Asynchronous callback bridging between script contexts and a native host runtime.
//!
//! A script context has no event loop of its own. This crate gives it the browser-style
//! asynchronous primitives (`setTimeout`, `setInterval`, `clearTimeout`, `clearInterval`,
//! `requestAnimationFrame`, `cancelAnimationFrame`) plus a generic `__invoke_module__` call, by
//! delegating the actual waiting to a host that later calls back into the engine.
//!
//! The pieces:
//! - A per-thread context pool ([`init_pool`], [`allocate_context`], [`dispose_context`]) sharing
//!   one explicitly reference-counted [`Runtime`]
//! - A per-context [`CallbackRegistry`] mapping integer [`CallbackId`]s to pending callbacks
//! - A [`LifetimeToken`] per context that gates every registry lookup
//! - A table of host entry points ([`HostMethods`]) and the fixed trampolines the host calls back
//!   ([`handle_transient_callback`], [`handle_persistent_callback`],
//!   [`handle_raf_transient_callback`], [`handle_module_callback`])
//! - [`virtual_host`], a deterministic host runtime driven by an explicit virtual clock
//!
//! # Error channels
//!
//! Errors detected while a binding is being called are returned as [`BridgeError`] and behave like
//! a synchronous throw. Errors detected while the *host* is driving a callback (host-reported
//! failures, callback throws, null callbacks) are never returned: they are routed through
//! [`Context::report_error`], which dispatches to the script's `onerror` handler and the host's
//! `on_js_error` entry point.
//!
//! # Threading
//!
//! Everything is single-threaded. The pool lives in a thread-local, and trampolines must be invoked
//! on the same thread that scheduled the work.

mod bridge;
mod context;
mod error;
mod handle;
mod host;
mod lifetime;
mod registry;
mod runtime;
mod trampoline;
mod value;
pub mod virtual_host;

pub use crate::bridge::bind_module;
pub use crate::bridge::bind_timer;
pub use crate::bridge::cancel_animation_frame;
pub use crate::bridge::clear_timeout;
pub use crate::bridge::coerce_delay;
pub use crate::bridge::invoke_module;
pub use crate::bridge::module_bindings;
pub use crate::bridge::request_animation_frame;
pub use crate::bridge::set_interval;
pub use crate::bridge::set_timeout;
pub use crate::bridge::timer_bindings;
pub use crate::bridge::NativeCallFn;
pub use crate::bridge::NativeFunctionMeta;
pub use crate::context::Context;
pub use crate::error::BridgeError;
pub use crate::error::ErrorKind;
pub use crate::error::ScriptError;
pub use crate::handle::CallbackId;
pub use crate::handle::ContextId;
pub use crate::host::CancelFn;
pub use crate::host::ErrorHandlerFn;
pub use crate::host::FrameCallback;
pub use crate::host::HostMethods;
pub use crate::host::InvokeModuleFn;
pub use crate::host::ModuleCallback;
pub use crate::host::RequestFrameFn;
pub use crate::host::ScheduleTimerFn;
pub use crate::host::TimerCallback;
pub use crate::host::HOST_FAILURE;
pub use crate::lifetime::ContextState;
pub use crate::lifetime::LifetimeToken;
pub use crate::registry::CallbackKind;
pub use crate::registry::CallbackRecord;
pub use crate::registry::CallbackRegistry;
pub use crate::registry::Persistence;
pub use crate::runtime::allocate_context;
pub use crate::runtime::dispose_context;
pub use crate::runtime::dispose_pool;
pub use crate::runtime::freeze_context;
pub use crate::runtime::gc_runs;
pub use crate::runtime::get_context;
pub use crate::runtime::init_pool;
pub use crate::runtime::live_contexts;
pub use crate::runtime::runtime_alive;
pub use crate::runtime::unfreeze_context;
pub use crate::runtime::Atom;
pub use crate::runtime::PoolOptions;
pub use crate::runtime::Runtime;
pub use crate::trampoline::handle_module_callback;
pub use crate::trampoline::handle_persistent_callback;
pub use crate::trampoline::handle_raf_transient_callback;
pub use crate::trampoline::handle_transient_callback;
pub use crate::value::JsFunction;
pub use crate::value::ScriptFn;
pub use crate::value::Value;
