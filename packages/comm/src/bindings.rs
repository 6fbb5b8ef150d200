//! Comm functions for runtime code.
//!
//! [`install`] binds these globals:
//!
//! | name | arguments |
//! |------|-----------|
//! | `comm_open` | `target_name, data=None, metadata=None, buffers=None, comm_id=None` |
//! | `comm_send` | `comm, data=None, metadata=None, buffers=None` |
//! | `comm_close` | `comm, data=None, metadata=None, buffers=None` |
//! | `comm_on_msg` | `comm, callback` |
//! | `comm_on_close` | `comm, callback` |
//! | `comm_id` | `comm` |
//! | `comm_weak` | `comm` |
//! | `register_target` | `target_name, factory` |
//!
//! Arguments are positional; a missing or `None` payload argument means an
//! empty dict (or an empty buffer list). Every function taking a `comm`
//! also accepts the weak reference `comm_weak` returns, which is what a
//! callback should capture to talk back on its own comm.

use std::sync::Weak;

use embedkern_runtime::{required_arg, Exception, Function, NativeFn, Object, RuntimeGuard};

use crate::comm::{Comm, CommId, CommOptions, Payload};
use crate::manager::{CommManager, Shared};

/// Bind the comm functions as globals of the runtime `guard` belongs to.
pub fn install(guard: &RuntimeGuard<'_>, manager: &CommManager) {
    let functions: [(&str, NativeFn); 8] = [
        ("comm_open", comm_open),
        ("comm_send", comm_send),
        ("comm_close", comm_close),
        ("comm_on_msg", comm_on_msg),
        ("comm_on_close", comm_on_close),
        ("comm_id", comm_id),
        ("comm_weak", comm_weak),
        ("register_target", register_target),
    ];
    for (name, code) in functions {
        let context = Object::handle("CommManager", manager.downgrade());
        guard.set_global(name, Function::with_context(name, code, context));
    }
}

fn manager(context: &Object) -> Result<CommManager, Exception> {
    context
        .as_handle()
        .and_then(|handle| handle.downcast_ref::<Weak<Shared>>())
        .and_then(Weak::upgrade)
        .map(CommManager::from_shared)
        .ok_or_else(|| Exception::runtime_error("comm manager is no longer available"))
}

fn comm_arg(args: &[Object], function: &str) -> Result<Comm, Exception> {
    let value = required_arg(args, 0, function)?;
    Comm::from_object(value).ok_or_else(|| {
        Exception::type_error(format!(
            "{}() argument 0 must be a Comm, not {}",
            function,
            value.type_name()
        ))
    })
}

fn function_arg(args: &[Object], function: &str) -> Result<Function, Exception> {
    let value = required_arg(args, 1, function)?;
    value.as_function().cloned().ok_or_else(|| {
        Exception::type_error(format!(
            "{}() argument 1 must be callable, not {}",
            function,
            value.type_name()
        ))
    })
}

/// Read `data, metadata, buffers` starting at `first`.
fn payload_args(args: &[Object], first: usize) -> Payload {
    let mut payload = Payload::default();
    let present = |i: usize| args.get(first + i).filter(|value| !value.is_none()).cloned();
    if let Some(data) = present(0) {
        payload.data = data;
    }
    if let Some(metadata) = present(1) {
        payload.metadata = metadata;
    }
    if let Some(buffers) = present(2) {
        payload.buffers = buffers;
    }
    payload
}

fn comm_open(
    guard: &RuntimeGuard<'_>,
    context: &Object,
    args: &[Object],
) -> Result<Object, Exception> {
    let manager = manager(context)?;
    let target_name = required_arg(args, 0, "comm_open")?;
    let target_name = target_name.as_str().ok_or_else(|| {
        Exception::type_error(format!(
            "comm_open() target_name must be str, not {}",
            target_name.type_name()
        ))
    })?;

    let payload = payload_args(args, 1);
    let mut options = CommOptions::new(target_name);
    options.data = payload.data;
    options.metadata = payload.metadata;
    options.buffers = payload.buffers;
    match args.get(4) {
        Some(Object::Str(id)) => options.comm_id = Some(CommId::from(id.as_str())),
        Some(Object::None) | None => {}
        Some(other) => {
            return Err(Exception::type_error(format!(
                "comm_open() comm_id must be str, not {}",
                other.type_name()
            )))
        }
    }

    let comm = manager.new_comm(guard, options)?;
    Ok(comm.to_object())
}

fn comm_send(guard: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let comm = comm_arg(args, "comm_send")?;
    comm.send(guard, payload_args(args, 1))?;
    Ok(Object::None)
}

fn comm_close(guard: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let comm = comm_arg(args, "comm_close")?;
    comm.close(guard, payload_args(args, 1))?;
    Ok(Object::None)
}

fn comm_on_msg(_: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let comm = comm_arg(args, "comm_on_msg")?;
    comm.set_on_message(function_arg(args, "comm_on_msg")?);
    Ok(Object::None)
}

fn comm_on_close(_: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let comm = comm_arg(args, "comm_on_close")?;
    comm.set_on_close(function_arg(args, "comm_on_close")?);
    Ok(Object::None)
}

fn comm_id(_: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let comm = comm_arg(args, "comm_id")?;
    Ok(Object::from(comm.id().as_str()))
}

fn comm_weak(_: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let comm = comm_arg(args, "comm_weak")?;
    Ok(comm.downgrade().to_object())
}

fn register_target(
    _: &RuntimeGuard<'_>,
    context: &Object,
    args: &[Object],
) -> Result<Object, Exception> {
    let manager = manager(context)?;
    let target_name = required_arg(args, 0, "register_target")?;
    let target_name = target_name.as_str().ok_or_else(|| {
        Exception::type_error(format!(
            "register_target() target_name must be str, not {}",
            target_name.type_name()
        ))
    })?;
    manager.register_target(target_name, function_arg(args, "register_target")?);
    Ok(Object::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::LogReporter;
    use crate::manager::CommConfig;
    use crate::transport::ChannelTransport;
    use embedkern_runtime::{Dict, Runtime};
    use serde_json::json;
    use std::sync::Arc;

    fn global(guard: &RuntimeGuard<'_>, name: &str) -> Function {
        guard.get_global(name).unwrap().as_function().cloned().unwrap()
    }

    #[test]
    fn open_send_close_from_runtime_code() {
        let runtime = Arc::new(Runtime::new());
        let (transport, mut outbox) = ChannelTransport::pair();
        let manager = CommManager::new(
            Arc::clone(&runtime),
            Arc::new(transport),
            Arc::new(LogReporter),
            CommConfig::default(),
        );
        let guard = runtime.enter();
        install(&guard, &manager);

        let data: Dict = [("x", 1)].into_iter().collect();
        let comm = guard
            .call(
                &global(&guard, "comm_open"),
                &[
                    Object::from("t"),
                    Object::Dict(data),
                    Object::None,
                    Object::None,
                    Object::from("k1"),
                ],
            )
            .unwrap();
        let open = outbox.try_recv().unwrap();
        assert_eq!(open.content, json!({"comm_id": "k1", "target_name": "t", "data": {"x": 1}}));

        let id = guard.call(&global(&guard, "comm_id"), &[comm.clone()]).unwrap();
        assert_eq!(id, Object::from("k1"));

        guard
            .call(
                &global(&guard, "comm_send"),
                &[
                    comm.clone(),
                    Object::None,
                    Object::None,
                    Object::from(vec![Object::from(vec![0u8, 255])]),
                ],
            )
            .unwrap();
        let msg = outbox.try_recv().unwrap();
        assert_eq!(msg.content, json!({"comm_id": "k1", "data": {}}));
        assert_eq!(msg.buffers[0].as_ref(), &[0u8, 255]);

        guard.call(&global(&guard, "comm_close"), &[comm.clone()]).unwrap();
        assert_eq!(outbox.try_recv().unwrap().header.msg_type, "comm_close");

        let err = guard.call(&global(&guard, "comm_send"), &[comm]).unwrap_err();
        assert_eq!(err.name, "ChannelClosedError");
    }

    #[test]
    fn weak_reference_works_until_the_comm_is_dropped() {
        let runtime = Arc::new(Runtime::new());
        let (transport, mut outbox) = ChannelTransport::pair();
        let manager = CommManager::new(
            Arc::clone(&runtime),
            Arc::new(transport),
            Arc::new(LogReporter),
            CommConfig::default(),
        );
        let guard = runtime.enter();
        install(&guard, &manager);

        let comm = guard
            .call(&global(&guard, "comm_open"), &[Object::from("t")])
            .unwrap();
        let weak = guard
            .call(&global(&guard, "comm_weak"), &[comm.clone()])
            .unwrap();
        assert_eq!(weak.type_name(), "WeakComm");
        guard.call(&global(&guard, "comm_send"), &[weak.clone()]).unwrap();

        drop(comm);
        assert!(manager.is_empty());
        let sent: Vec<String> = outbox.drain().into_iter().map(|m| m.header.msg_type).collect();
        assert_eq!(sent, vec!["comm_open", "comm_msg", "comm_close"]);

        let err = guard.call(&global(&guard, "comm_send"), &[weak]).unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[test]
    fn argument_errors_are_type_errors() {
        let runtime = Arc::new(Runtime::new());
        let (transport, _outbox) = ChannelTransport::pair();
        let manager = CommManager::new(
            Arc::clone(&runtime),
            Arc::new(transport),
            Arc::new(LogReporter),
            CommConfig::default(),
        );
        let guard = runtime.enter();
        install(&guard, &manager);

        let err = guard.call(&global(&guard, "comm_send"), &[Object::Int(1)]).unwrap_err();
        assert_eq!(err.name, "TypeError");
        let err = guard.call(&global(&guard, "comm_open"), &[]).unwrap_err();
        assert_eq!(err.name, "TypeError");
        let err = guard
            .call(&global(&guard, "register_target"), &[Object::from("t"), Object::Int(1)])
            .unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[test]
    fn functions_outliving_the_manager_raise() {
        let runtime = Arc::new(Runtime::new());
        let (transport, _outbox) = ChannelTransport::pair();
        let manager = CommManager::new(
            Arc::clone(&runtime),
            Arc::new(transport),
            Arc::new(LogReporter),
            CommConfig::default(),
        );
        let guard = runtime.enter();
        install(&guard, &manager);
        drop(manager);

        let err = guard.call(&global(&guard, "comm_open"), &[Object::from("t")]).unwrap_err();
        assert_eq!(err.name, "RuntimeError");
    }
}
