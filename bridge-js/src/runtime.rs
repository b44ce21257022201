//! The shared interpreter runtime and the per-thread context pool.
//!
//! Each engine thread owns at most one context pool. The pool holds the set of live
//! [`Context`]s and one shared [`Runtime`] that all of them evaluate against. The runtime is
//! reference counted *explicitly* by the number of live contexts: the first context allocated on a
//! thread creates it and installs the built-in names, and it is torn down only after the last
//! context has been disposed and its garbage-collection pass has run.
//!
//! Trampolines reach contexts through [`get_context`], which is why the pool lives in a
//! thread-local rather than being passed around: the host only hands back a `context_id`.

use crate::context::Context;
use crate::error::BridgeError;
use crate::handle::ContextId;
use crate::host::HostMethods;
use ahash::HashMap;
use ahash::HashMapExt;
use serde::Deserialize;
use serde::Serialize;
use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
  /// Upper bound on simultaneously live contexts.
  pub max_contexts: usize,
}

impl Default for PoolOptions {
  fn default() -> Self {
    Self { max_contexts: 1024 }
  }
}

/// Names interned into every fresh runtime before the first context evaluates anything.
const BUILTIN_NAMES: &[&str] = &[
  "setTimeout",
  "setInterval",
  "clearTimeout",
  "clearInterval",
  "requestAnimationFrame",
  "cancelAnimationFrame",
  "__invoke_module__",
  "onerror",
];

/// An interned global name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct Atom(u32);

impl Atom {
  #[inline]
  pub fn index(self) -> u32 {
    self.0
  }
}

#[derive(Default)]
struct AtomTable {
  ids: HashMap<Rc<str>, Atom>,
  names: Vec<Rc<str>>,
}

impl AtomTable {
  fn intern(&mut self, name: &str) -> Atom {
    if let Some(atom) = self.ids.get(name) {
      return *atom;
    }
    let atom = Atom(self.names.len() as u32);
    let name: Rc<str> = Rc::from(name);
    self.names.push(name.clone());
    self.ids.insert(name, atom);
    atom
  }
}

/// State shared by every context on one engine thread.
///
/// Mutated only at context construction/destruction and when new global names are interned.
pub struct Runtime {
  atoms: RefCell<AtomTable>,
  gc_runs: Cell<u64>,
  disposed: Cell<bool>,
}

impl Runtime {
  fn new() -> Self {
    let runtime = Self {
      atoms: RefCell::new(AtomTable::default()),
      gc_runs: Cell::new(0),
      disposed: Cell::new(false),
    };
    let mut atoms = runtime.atoms.borrow_mut();
    for name in BUILTIN_NAMES {
      atoms.intern(name);
    }
    drop(atoms);
    runtime
  }

  pub fn intern(&self, name: &str) -> Atom {
    self.atoms.borrow_mut().intern(name)
  }

  pub fn atom_name(&self, atom: Atom) -> Option<Rc<str>> {
    self.atoms.borrow().names.get(atom.0 as usize).cloned()
  }

  pub fn atom_count(&self) -> usize {
    self.atoms.borrow().names.len()
  }

  pub fn gc_runs(&self) -> u64 {
    self.gc_runs.get()
  }

  pub fn is_disposed(&self) -> bool {
    self.disposed.get()
  }

  /// Runs a collection pass after a context has released its objects.
  fn collect_garbage(&self) {
    self.gc_runs.set(self.gc_runs.get() + 1);
    debug!(gc_runs = self.gc_runs.get(), "runtime gc pass");
  }

  /// Releases runtime-global state. Only called once the last context is gone.
  fn dispose(&self) {
    let mut atoms = self.atoms.borrow_mut();
    atoms.ids.clear();
    atoms.names.clear();
    self.disposed.set(true);
  }
}

/// The live contexts of one engine thread plus the shared runtime they run on.
struct RuntimePool {
  generation: u64,
  options: PoolOptions,
  host: HostMethods,
  contexts: HashMap<ContextId, Rc<Context>>,
  next_context_id: u32,
  runtime: Option<Rc<Runtime>>,
  running_contexts: usize,
  total_gc_runs: u64,
}

thread_local! {
  static POOL: RefCell<Option<RuntimePool>> = const { RefCell::new(None) };
  static NEXT_GENERATION: Cell<u64> = const { Cell::new(0) };
}

// User code (script callbacks, dispose callbacks) must never run inside this closure.
fn with_pool<R>(f: impl FnOnce(&mut RuntimePool) -> R) -> Result<R, BridgeError> {
  POOL.with(|cell| {
    let mut slot = cell.borrow_mut();
    slot.as_mut().map(f).ok_or(BridgeError::PoolNotInitialized)
  })
}

/// Installs a fresh pool on the current thread, disposing any previous one first.
pub fn init_pool(options: PoolOptions, host: HostMethods) {
  dispose_pool();
  debug!(max_contexts = options.max_contexts, "initializing context pool");
  let generation = NEXT_GENERATION.with(|next| next.replace(next.get() + 1));
  POOL.with(|cell| {
    *cell.borrow_mut() = Some(RuntimePool {
      generation,
      options,
      host,
      contexts: HashMap::new(),
      next_context_id: 0,
      runtime: None,
      running_contexts: 0,
      total_gc_runs: 0,
    });
  });
}

/// Disposes every live context (in allocation order) and removes the pool from the current thread.
///
/// If a dispose callback installs a new pool, disposal stops and the new pool is left in place.
pub fn dispose_pool() {
  let Ok(generation) = with_pool(|pool| pool.generation) else {
    return;
  };
  while let Ok(Some(id)) = with_pool(|pool| {
    if pool.generation != generation {
      return None;
    }
    pool.contexts.keys().min().copied()
  }) {
    // A dispose callback may have disposed this context already.
    let _ = dispose_context(id);
  }
  POOL.with(|cell| {
    let mut slot = cell.borrow_mut();
    if slot.as_ref().is_some_and(|pool| pool.generation == generation) {
      *slot = None;
    }
  });
}

/// Allocates a new context, creating the shared runtime if this is the first live context.
pub fn allocate_context() -> Result<Rc<Context>, BridgeError> {
  let (id, runtime, host) = with_pool(|pool| {
    if pool.contexts.len() >= pool.options.max_contexts || pool.next_context_id > i32::MAX as u32 {
      return Err(BridgeError::PoolExhausted {
        capacity: pool.options.max_contexts,
      });
    }
    let id = ContextId::from_raw(pool.next_context_id);
    pool.next_context_id += 1;
    pool.running_contexts += 1;
    let runtime = pool
      .runtime
      .get_or_insert_with(|| {
        debug!("creating shared runtime");
        Rc::new(Runtime::new())
      })
      .clone();
    Ok((id, runtime, pool.host))
  })??;

  let context = Rc::new(Context::new(id, runtime, host));
  with_pool(|pool| pool.contexts.insert(id, context.clone()))?;
  debug!(context_id = %id, "context allocated");
  Ok(context)
}

/// Looks up a live context. Returns `None` for disposed or unknown ids, or when no pool exists.
pub fn get_context(id: ContextId) -> Option<Rc<Context>> {
  POOL.with(|cell| {
    let slot = cell.try_borrow().ok()?;
    slot.as_ref()?.contexts.get(&id).cloned()
  })
}

/// Disposes a context and releases its share of the runtime.
///
/// Teardown order: the context is removed from the pool (so trampolines can no longer reach it),
/// its token is disposed and its registry cleared, the dispose callback runs, the runtime performs
/// a GC pass, and finally the runtime is torn down if this was the last context.
///
/// The pool's counters are settled before the dispose callback runs, so the callback may freely
/// allocate, dispose or even replace the pool.
pub fn dispose_context(id: ContextId) -> Result<(), BridgeError> {
  let (context, last) = with_pool(|pool| {
    let context = pool.contexts.remove(&id)?;
    pool.total_gc_runs += 1;
    pool.running_contexts -= 1;
    let last = if pool.running_contexts == 0 {
      pool.runtime.take()
    } else {
      None
    };
    Some((context, last))
  })?
  .ok_or(BridgeError::InvalidContext(id))?;
  context.dispose();

  context.runtime().collect_garbage();
  if let Some(runtime) = last {
    debug!("last context disposed; tearing down shared runtime");
    runtime.dispose();
  }
  debug!(context_id = %id, "context disposed");
  Ok(())
}

pub fn freeze_context(id: ContextId) -> Result<bool, BridgeError> {
  let context = get_context(id).ok_or(BridgeError::InvalidContext(id))?;
  Ok(context.freeze())
}

pub fn unfreeze_context(id: ContextId) -> Result<bool, BridgeError> {
  let context = get_context(id).ok_or(BridgeError::InvalidContext(id))?;
  Ok(context.unfreeze())
}

/// Number of live contexts on this thread (`0` without a pool).
pub fn live_contexts() -> usize {
  with_pool(|pool| pool.running_contexts).unwrap_or(0)
}

/// Whether the shared runtime currently exists on this thread.
pub fn runtime_alive() -> bool {
  with_pool(|pool| pool.runtime.is_some()).unwrap_or(false)
}

/// Total GC passes run by context teardown since the pool was initialised.
pub fn gc_runs() -> u64 {
  with_pool(|pool| pool.total_gc_runs).unwrap_or(0)
}
