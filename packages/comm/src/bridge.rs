//! Calling runtime callbacks from host-side events.
//!
//! Every callback registered from runtime code is wrapped in a
//! [`BridgedCallback`]. Invoking one enters the runtime first, then turns the
//! wire message into a runtime record, then calls the function. Exceptions
//! stop here: they are converted to an [`ExecutionError`], handed to the
//! [`ErrorReporter`] and returned to the host caller as a value.

use std::fmt;
use std::sync::Arc;

use embedkern_runtime::{Dict, Function, Object, Runtime, RuntimeGuard};
use embedkern_wire::{BufferCodec, JsonMap, Message, WireCodec};
use tracing::{error, trace};

use crate::error::ExecutionError;

/// Receives errors raised by callbacks, for display to the user.
pub trait ErrorReporter: Send + Sync {
    /// `parent_header` is the header of the message whose dispatch failed.
    fn report(&self, parent_header: &JsonMap, error: &ExecutionError);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, parent_header: &JsonMap, err: &ExecutionError) {
        error!(
            ename = %err.ename,
            evalue = %err.evalue,
            parent_msg_id = ?parent_header.get("msg_id"),
            "comm callback raised"
        );
    }
}

/// Marshals inbound messages into runtime calls.
#[derive(Clone)]
pub struct CallbackBridge {
    runtime: Arc<Runtime>,
    reporter: Arc<dyn ErrorReporter>,
    codec: WireCodec,
    buffers: BufferCodec,
}

impl CallbackBridge {
    pub fn new(runtime: Arc<Runtime>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            runtime,
            reporter,
            codec: WireCodec::new(),
            buffers: BufferCodec::new(),
        }
    }

    pub fn with_codec(mut self, codec: WireCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    pub fn buffer_codec(&self) -> &BufferCodec {
        &self.buffers
    }

    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    /// Wrap a runtime function so host code can only call it through the
    /// bridge.
    pub fn wrap(&self, function: Function) -> BridgedCallback {
        BridgedCallback {
            function,
            bridge: self.clone(),
        }
    }

    /// Flatten a message into the record callbacks receive:
    /// `{header, parent_header, metadata, content, buffers}`.
    pub fn message_to_object(&self, guard: &RuntimeGuard<'_>, message: &Message) -> Object {
        let record = Dict::new();
        record.insert(
            "header",
            self.codec.decode_map(guard, &message.header.to_map()),
        );
        record.insert(
            "parent_header",
            self.codec.decode_map(guard, &message.parent_header),
        );
        record.insert("metadata", self.codec.decode_map(guard, &message.metadata));
        record.insert("content", self.codec.decode(guard, &message.content));
        record.insert("buffers", self.buffers.encode(guard, &message.buffers));
        Object::Dict(record)
    }

    /// Call `function(*leading, record)` inside the runtime.
    ///
    /// A raised exception is reported and returned, never propagated as a
    /// panic.
    pub fn call(
        &self,
        function: &Function,
        leading: &[Object],
        message: &Message,
    ) -> Result<Object, ExecutionError> {
        let guard = self.runtime.enter();
        let mut args = leading.to_vec();
        args.push(self.message_to_object(&guard, message));

        trace!(
            function = function.name(),
            msg_type = %message.header.msg_type,
            "invoking callback"
        );
        guard.call(function, &args).map_err(|exception| {
            let err = ExecutionError::from(exception);
            self.reporter.report(&message.header.to_map(), &err);
            err
        })
    }
}

impl fmt::Debug for CallbackBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackBridge")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

/// A runtime function that can only be invoked through the bridge.
#[derive(Clone)]
pub struct BridgedCallback {
    function: Function,
    bridge: CallbackBridge,
}

impl BridgedCallback {
    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Call with the message record as the sole argument.
    pub fn invoke(&self, message: &Message) -> Result<Object, ExecutionError> {
        self.bridge.call(&self.function, &[], message)
    }
}

impl fmt::Debug for BridgedCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BridgedCallback({:?})", self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedkern_runtime::{required_arg, Bytes, Exception};
    use embedkern_wire::{Header, MessageType};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(JsonMap, ExecutionError)>>);

    impl ErrorReporter for Collect {
        fn report(&self, parent_header: &JsonMap, err: &ExecutionError) {
            self.0.lock().unwrap().push((parent_header.clone(), err.clone()));
        }
    }

    fn record_depth(
        guard: &RuntimeGuard<'_>,
        _: &Object,
        args: &[Object],
    ) -> Result<Object, Exception> {
        let record = required_arg(args, 0, "record_depth")?;
        guard.set_global("last", record.clone());
        Ok(Object::Int(guard.depth() as i64))
    }

    fn fail(_: &RuntimeGuard<'_>, _: &Object, _: &[Object]) -> Result<Object, Exception> {
        Err(Exception::value_error("bad payload"))
    }

    fn message() -> Message {
        Message::new(
            Header::new(&MessageType::CommMsg, "s", "u"),
            json!({"comm_id": "c1", "data": {"n": 1}}),
        )
        .with_metadata(json!({"k": "v"}).as_object().cloned().unwrap())
        .with_buffers(vec![Bytes::from_static(b"\x00ab")])
    }

    #[test]
    fn invoke_enters_runtime_and_passes_record() {
        let runtime = Arc::new(Runtime::new());
        let bridge = CallbackBridge::new(Arc::clone(&runtime), Arc::new(LogReporter));
        let callback = bridge.wrap(Function::new("record_depth", record_depth));

        assert!(!runtime.is_entered());
        let msg = message();
        assert_eq!(callback.invoke(&msg).unwrap(), Object::Int(1));
        assert!(!runtime.is_entered());

        let guard = runtime.enter();
        let record = guard.get_global("last").unwrap();
        let content = record.get_item("content").unwrap();
        assert_eq!(
            content.get_item("data").unwrap().get_item("n"),
            Some(Object::Int(1))
        );
        assert_eq!(
            record.get_item("metadata").unwrap().get_item("k"),
            Some(Object::from("v"))
        );
        assert_eq!(
            record.get_item("header").unwrap().get_item("msg_id"),
            Some(Object::from(msg.header.msg_id.as_str()))
        );
        assert_eq!(
            record.get_item("buffers"),
            Some(Object::from(vec![Object::Bytes(Bytes::from_static(b"\x00ab"))]))
        );
        assert!(record.get_item("parent_header").unwrap().as_dict().unwrap().is_empty());
    }

    #[test]
    fn invoke_reuses_held_lock() {
        let runtime = Arc::new(Runtime::new());
        let bridge = CallbackBridge::new(Arc::clone(&runtime), Arc::new(LogReporter));
        let callback = bridge.wrap(Function::new("record_depth", record_depth));

        let _outer = runtime.enter();
        assert_eq!(callback.invoke(&message()).unwrap(), Object::Int(2));
    }

    #[test]
    fn exceptions_are_reported_not_raised() {
        let runtime = Arc::new(Runtime::new());
        let reporter = Arc::new(Collect::default());
        let bridge = CallbackBridge::new(runtime, reporter.clone());
        let callback = bridge.wrap(Function::new("fail", fail));

        let msg = message();
        let err = callback.invoke(&msg).unwrap_err();
        assert_eq!(err.ename, "ValueError");
        assert_eq!(err.traceback, vec!["ValueError: bad payload".to_string()]);

        let reports = reporter.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0.get("msg_id"), Some(&json!(msg.header.msg_id)));
        assert_eq!(reports[0].1, err);
    }
}
