//! Native functions callable from the host.

use std::fmt;
use std::sync::Arc;

use crate::exception::Exception;
use crate::object::Object;
use crate::runtime::RuntimeGuard;

/// Signature of a native function body.
///
/// The body receives the guard proving the runtime is entered, its own
/// context object and the call arguments. It cannot capture anything: state
/// it needs travels in the context, where the caller can see it.
pub type NativeFn = fn(&RuntimeGuard<'_>, &Object, &[Object]) -> Result<Object, Exception>;

struct Inner {
    name: String,
    code: NativeFn,
    context: Object,
}

/// A named native function with an explicit context object.
///
/// Cloning is cheap and preserves identity.
#[derive(Clone)]
pub struct Function(Arc<Inner>);

impl Function {
    /// Create a function with no context.
    pub fn new(name: impl Into<String>, code: NativeFn) -> Self {
        Self::with_context(name, code, Object::None)
    }

    /// Create a function whose body receives `context` on every call.
    pub fn with_context(name: impl Into<String>, code: NativeFn, context: Object) -> Self {
        Self(Arc::new(Inner {
            name: name.into(),
            code,
            context,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn context(&self) -> &Object {
        &self.0.context
    }

    /// Call the function. Holding a guard is the proof that this thread owns
    /// the runtime.
    pub fn call(&self, guard: &RuntimeGuard<'_>, args: &[Object]) -> Result<Object, Exception> {
        (self.0.code)(guard, &self.0.context, args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.0.name)
    }
}

/// Fetch positional argument `index` or raise a `TypeError` naming `function`.
pub fn required_arg<'a>(
    args: &'a [Object],
    index: usize,
    function: &str,
) -> Result<&'a Object, Exception> {
    args.get(index).ok_or_else(|| {
        Exception::type_error(format!(
            "{}() missing required positional argument {}",
            function, index
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    fn add_context(
        _: &RuntimeGuard<'_>,
        context: &Object,
        args: &[Object],
    ) -> Result<Object, Exception> {
        let base = context.as_int().unwrap_or_default();
        let n = required_arg(args, 0, "add")?
            .as_int()
            .ok_or_else(|| Exception::type_error("expected int"))?;
        Ok(Object::Int(base + n))
    }

    #[test]
    fn context_is_passed_to_body() {
        let runtime = Runtime::new();
        let guard = runtime.enter();
        let add_ten = Function::with_context("add", add_context, Object::Int(10));
        assert_eq!(add_ten.call(&guard, &[Object::Int(5)]).unwrap(), Object::Int(15));
        assert_eq!(add_ten.context(), &Object::Int(10));
        assert_eq!(add_ten.name(), "add");
    }

    #[test]
    fn missing_argument_raises_type_error() {
        let runtime = Runtime::new();
        let guard = runtime.enter();
        let f = Function::new("add", add_context);
        let err = f.call(&guard, &[]).unwrap_err();
        assert_eq!(err.name, "TypeError");
        assert!(err.value.contains("add()"));
    }

    #[test]
    fn clones_share_identity() {
        let f = Function::new("add", add_context);
        let g = Function::new("add", add_context);
        assert!(f.ptr_eq(&f.clone()));
        assert!(!f.ptr_eq(&g));
        assert_eq!(format!("{:?}", f), "<function add>");
    }
}
