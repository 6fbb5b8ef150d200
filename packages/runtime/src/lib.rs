//! embedkern runtime: the embedded side of the bridge.
//!
//! This crate models what the host sees of the embedded, dynamically typed
//! runtime:
//! - `Object`: the runtime's native value (shared, mutable containers included)
//! - `Exception`: what runtime code raises
//! - `Function`: a native callable carrying an explicit context object
//! - `RuntimeLock` / `Runtime`: the single-threaded-access discipline
//!
//! Nothing here knows about messages or comms. Every operation that touches
//! runtime objects on behalf of the host goes through a `RuntimeGuard`, which
//! can only be obtained by entering the runtime.
//!
//! # Example
//!
//! ```rust
//! use embedkern_runtime::{Function, Object, Runtime};
//!
//! fn double(_: &embedkern_runtime::RuntimeGuard<'_>, _: &Object, args: &[Object])
//!     -> Result<Object, embedkern_runtime::Exception>
//! {
//!     let n = embedkern_runtime::required_arg(args, 0, "double")?;
//!     Ok(Object::Int(n.as_int().unwrap_or_default() * 2))
//! }
//!
//! let runtime = Runtime::new();
//! let guard = runtime.enter();
//! let f = Function::new("double", double);
//! assert_eq!(guard.call(&f, &[Object::Int(21)]).unwrap(), Object::Int(42));
//! ```

pub use bytes::Bytes;

mod exception;
mod function;
mod lock;
mod object;
mod runtime;

pub use exception::Exception;
pub use function::{required_arg, Function, NativeFn};
pub use lock::{LockGuard, RuntimeLock};
pub use object::{Dict, Handle, List, Object};
pub use runtime::{Runtime, RuntimeGuard};
