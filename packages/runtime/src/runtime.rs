//! The embedded runtime: global namespace behind the runtime lock.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::exception::Exception;
use crate::function::Function;
use crate::lock::{LockGuard, RuntimeLock};
use crate::object::Object;

/// The embedded runtime instance.
///
/// All access goes through [`Runtime::enter`], which acquires the runtime
/// lock and hands back a [`RuntimeGuard`]. The guard is the only way to read
/// or write globals and to call functions.
///
/// # Example
///
/// ```rust
/// use embedkern_runtime::{Object, Runtime};
///
/// let runtime = Runtime::new();
/// let guard = runtime.enter();
/// guard.set_global("answer", 42);
/// assert_eq!(guard.get_global("answer"), Some(Object::Int(42)));
/// ```
#[derive(Debug, Default)]
pub struct Runtime {
    lock: RuntimeLock,

    /// Global namespace. Only touched through a guard.
    globals: Mutex<BTreeMap<String, Object>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the runtime, blocking while another thread is inside.
    pub fn enter(&self) -> RuntimeGuard<'_> {
        RuntimeGuard {
            runtime: self,
            _lock: self.lock.acquire(),
        }
    }

    /// Enter the runtime only if no other thread is inside.
    pub fn try_enter(&self) -> Option<RuntimeGuard<'_>> {
        let lock = self.lock.try_acquire()?;
        Some(RuntimeGuard {
            runtime: self,
            _lock: lock,
        })
    }

    /// Whether the current thread is inside the runtime.
    pub fn is_entered(&self) -> bool {
        self.lock.is_held_by_current_thread()
    }

    fn globals(&self) -> MutexGuard<'_, BTreeMap<String, Object>> {
        self.globals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Access token for the embedded runtime.
///
/// Holding a guard means the current thread owns the runtime lock. Guards
/// nest; the lock is released when the outermost one is dropped.
pub struct RuntimeGuard<'a> {
    runtime: &'a Runtime,
    _lock: LockGuard<'a>,
}

impl<'a> RuntimeGuard<'a> {
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    /// Nesting depth of the current entry (1 for the outermost guard).
    pub fn depth(&self) -> usize {
        self.runtime.lock.depth()
    }

    pub fn get_global(&self, name: &str) -> Option<Object> {
        self.runtime.globals().get(name).cloned()
    }

    /// Bind a global, returning the previous binding.
    pub fn set_global(&self, name: impl Into<String>, value: impl Into<Object>) -> Option<Object> {
        self.runtime.globals().insert(name.into(), value.into())
    }

    pub fn remove_global(&self, name: &str) -> Option<Object> {
        self.runtime.globals().remove(name)
    }

    pub fn global_names(&self) -> Vec<String> {
        self.runtime.globals().keys().cloned().collect()
    }

    /// Drop every global binding, returning them to the caller.
    pub fn clear_globals(&self) -> BTreeMap<String, Object> {
        std::mem::take(&mut *self.runtime.globals())
    }

    /// Call a runtime function.
    pub fn call(&self, function: &Function, args: &[Object]) -> Result<Object, Exception> {
        function.call(self, args)
    }
}

impl std::fmt::Debug for RuntimeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeGuard")
            .field("depth", &self.depth())
            .finish()
    }
}
