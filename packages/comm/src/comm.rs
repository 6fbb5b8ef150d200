//! Comm channels and their lifecycle.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use embedkern_runtime::{Function, Object, RuntimeGuard};
use embedkern_wire::{JsonMap, Message, MessageType, WireError};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::{BridgedCallback, CallbackBridge};
use crate::error::{CommError, Result};
use crate::manager::Shared;

/// Unique identifier for a comm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommId(String);

impl CommId {
    /// Create a new random CommId.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CommId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CommId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for CommId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a comm. Open is initial; Closed is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommState {
    Open,
    Closed,
}

/// What a comm message carries, as runtime objects.
///
/// `metadata` and `data` must be dicts (or `None`, read as `{}`); `buffers`
/// must be a list of bytes.
#[derive(Debug, Clone)]
pub struct Payload {
    pub metadata: Object,
    pub data: Object,
    pub buffers: Object,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            metadata: Object::dict(),
            data: Object::dict(),
            buffers: Object::list(),
        }
    }
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, data: impl Into<Object>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<Object>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn with_buffers(mut self, buffers: impl Into<Object>) -> Self {
        self.buffers = buffers.into();
        self
    }

    pub(crate) fn encode(
        &self,
        guard: &RuntimeGuard<'_>,
        bridge: &CallbackBridge,
    ) -> std::result::Result<Encoded, WireError> {
        Ok(Encoded {
            metadata: bridge.codec().encode_map(guard, &self.metadata, "metadata")?,
            data: bridge.codec().encode_map(guard, &self.data, "data")?,
            buffers: bridge.buffer_codec().decode(guard, &self.buffers)?,
        })
    }
}

/// A payload after it went through the codecs.
#[derive(Debug, Clone, Default)]
pub(crate) struct Encoded {
    pub(crate) metadata: JsonMap,
    pub(crate) data: JsonMap,
    pub(crate) buffers: Vec<Bytes>,
}

/// Everything needed to open a comm from the local side.
#[derive(Debug, Clone)]
pub struct CommOptions {
    pub target_name: String,
    /// Explicit id; a fresh one is generated when absent.
    pub comm_id: Option<CommId>,
    pub metadata: Object,
    pub data: Object,
    pub buffers: Object,
}

impl CommOptions {
    pub fn new(target_name: impl Into<String>) -> Self {
        let payload = Payload::default();
        Self {
            target_name: target_name.into(),
            comm_id: None,
            metadata: payload.metadata,
            data: payload.data,
            buffers: payload.buffers,
        }
    }

    pub fn with_id(mut self, comm_id: impl Into<CommId>) -> Self {
        self.comm_id = Some(comm_id.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<Object>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<Object>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn with_buffers(mut self, buffers: impl Into<Object>) -> Self {
        self.buffers = buffers.into();
        self
    }

    pub fn payload(&self) -> Payload {
        Payload {
            metadata: self.metadata.clone(),
            data: self.data.clone(),
            buffers: self.buffers.clone(),
        }
    }
}

/// A close that arrived while a message was being dispatched to this comm.
enum PendingClose {
    /// Requested locally: the message still has to be sent.
    Local(Message),
    /// Requested by the peer.
    Remote(Message),
}

impl PendingClose {
    fn message(&self) -> &Message {
        match self {
            PendingClose::Local(m) | PendingClose::Remote(m) => m,
        }
    }
}

struct Lifecycle {
    state: CommState,
    /// Inbound messages currently being dispatched to this comm.
    dispatching: usize,
    pending: Option<PendingClose>,
}

impl Lifecycle {
    fn accepts_sends(&self) -> bool {
        self.state == CommState::Open && self.pending.is_none()
    }
}

#[derive(Default)]
struct Callbacks {
    on_msg: Option<BridgedCallback>,
    on_close: Option<BridgedCallback>,
}

pub(crate) struct CommInner {
    id: CommId,
    target_name: String,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    callbacks: Mutex<Callbacks>,
}

impl CommInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_message(&self, encoded: Encoded) -> Message {
        self.shared.message(
            MessageType::CommClose,
            json!({"comm_id": self.id.as_str(), "data": encoded.data}),
            encoded.metadata,
            encoded.buffers,
        )
    }

    fn send_close(&self, message: Message) -> Message {
        if let Err(e) = self.shared.send(message.clone()) {
            warn!(comm_id = %self.id, error = %e, "failed to send comm_close");
        }
        message
    }

    /// Run `on_close` once, drop both callbacks, leave the table.
    ///
    /// Callers have already moved the state to Closed.
    fn finish_close(&self, record: &Message) {
        let callbacks = std::mem::take(&mut *self.callbacks());
        if let Some(on_close) = &callbacks.on_close {
            // Failures are reported by the bridge.
            let _ = on_close.invoke(record);
        }
        self.shared.unregister(&self.id, self as *const CommInner);
        debug!(comm_id = %self.id, target = %self.target_name, "comm closed");
        drop(callbacks);
    }

    fn end_dispatch(&self) {
        let pending = {
            let mut lifecycle = self.lifecycle();
            lifecycle.dispatching = lifecycle.dispatching.saturating_sub(1);
            if lifecycle.dispatching > 0 {
                return;
            }
            let Some(pending) = lifecycle.pending.take() else {
                return;
            };
            lifecycle.state = CommState::Closed;
            if let PendingClose::Local(message) = &pending {
                self.send_close(message.clone());
            }
            pending
        };
        self.finish_close(pending.message());
    }
}

impl Drop for CommInner {
    fn drop(&mut self) {
        let pending = {
            let lifecycle = self
                .lifecycle
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner);
            if lifecycle.state == CommState::Closed {
                return;
            }
            lifecycle.state = CommState::Closed;
            lifecycle.pending.take()
        };

        debug!(comm_id = %self.id, "last handle dropped; closing comm");
        let record = match pending {
            Some(PendingClose::Remote(message)) => message,
            Some(PendingClose::Local(message)) => self.send_close(message),
            None => self.send_close(self.close_message(Encoded::default())),
        };
        self.finish_close(&record);
    }
}

/// A handle to one comm channel.
///
/// Cloning is cheap; all clones refer to the same channel. When the last
/// handle to an open comm is dropped, the comm closes itself.
///
/// A callback that needs its own comm should capture a [`WeakComm`]: a
/// strong handle stored in the comm's own callback keeps it open until it
/// is closed explicitly.
#[derive(Clone)]
pub struct Comm {
    inner: Arc<CommInner>,
}

impl Comm {
    /// Build an open comm. Not registered and nothing sent yet.
    pub(crate) fn create(shared: Arc<Shared>, id: CommId, target_name: String) -> Self {
        Self {
            inner: Arc::new(CommInner {
                id,
                target_name,
                shared,
                lifecycle: Mutex::new(Lifecycle {
                    state: CommState::Open,
                    dispatching: 0,
                    pending: None,
                }),
                callbacks: Mutex::new(Callbacks::default()),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<CommInner> {
        &self.inner
    }

    pub(crate) fn from_inner(inner: Arc<CommInner>) -> Self {
        Self { inner }
    }

    /// Send the initial `comm_open` for a locally created comm.
    pub(crate) fn open(&self, encoded: Encoded) -> Result<()> {
        let message = self.inner.shared.message(
            MessageType::CommOpen,
            json!({
                "comm_id": self.inner.id.as_str(),
                "target_name": self.inner.target_name,
                "data": encoded.data,
            }),
            encoded.metadata,
            encoded.buffers,
        );
        self.inner.shared.send(message)?;
        debug!(comm_id = %self.inner.id, target = %self.inner.target_name, "comm opened");
        Ok(())
    }

    /// Mark closed without sending anything or running callbacks. Used when
    /// construction fails before the comm became visible.
    pub(crate) fn discard(&self) {
        self.inner.lifecycle().state = CommState::Closed;
    }

    pub fn id(&self) -> &CommId {
        &self.inner.id
    }

    pub fn target_name(&self) -> &str {
        &self.inner.target_name
    }

    pub fn state(&self) -> CommState {
        self.inner.lifecycle().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CommState::Open
    }

    /// Send a `comm_msg`.
    ///
    /// Fails with [`CommError::ChannelClosed`] once the comm is closed or a
    /// close is pending; nothing is sent in that case.
    pub fn send(&self, guard: &RuntimeGuard<'_>, payload: Payload) -> Result<()> {
        let lifecycle = self.inner.lifecycle();
        if !lifecycle.accepts_sends() {
            return Err(CommError::ChannelClosed(self.inner.id.clone()));
        }
        let encoded = payload.encode(guard, &self.inner.shared.bridge)?;
        let message = self.inner.shared.message(
            MessageType::CommMsg,
            json!({"comm_id": self.inner.id.as_str(), "data": encoded.data}),
            encoded.metadata,
            encoded.buffers,
        );
        self.inner.shared.send(message)?;
        Ok(())
    }

    /// Close the comm, sending `comm_close` and running `on_close`.
    ///
    /// Closing a closed comm does nothing. A close requested while a message
    /// is being dispatched to this comm takes effect when that dispatch
    /// returns.
    pub fn close(&self, guard: &RuntimeGuard<'_>, payload: Payload) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle();
        if !lifecycle.accepts_sends() {
            return Ok(());
        }
        let encoded = payload.encode(guard, &self.inner.shared.bridge)?;
        let message = self.inner.close_message(encoded);

        if lifecycle.dispatching > 0 {
            debug!(comm_id = %self.inner.id, "close deferred until dispatch completes");
            lifecycle.pending = Some(PendingClose::Local(message));
            return Ok(());
        }

        lifecycle.state = CommState::Closed;
        let sent = self.inner.shared.send(message.clone());
        drop(lifecycle);

        self.inner.finish_close(&message);
        sent.map_err(CommError::from)
    }

    /// Set the callback run for each inbound `comm_msg`. Replaces any
    /// previous one. Ignored once the comm is closed.
    pub fn set_on_message(&self, callback: Function) {
        self.replace_callback(|callbacks| &mut callbacks.on_msg, callback);
    }

    /// Set the callback run when the comm closes. Replaces any previous one.
    /// Ignored once the comm is closed.
    pub fn set_on_close(&self, callback: Function) {
        self.replace_callback(|callbacks| &mut callbacks.on_close, callback);
    }

    fn replace_callback(
        &self,
        slot: fn(&mut Callbacks) -> &mut Option<BridgedCallback>,
        callback: Function,
    ) {
        let lifecycle = self.inner.lifecycle();
        if lifecycle.state == CommState::Closed {
            debug!(comm_id = %self.inner.id, "ignoring callback on closed comm");
            return;
        }
        let bridged = self.inner.shared.bridge.wrap(callback);
        let previous = slot(&mut *self.inner.callbacks()).replace(bridged);
        drop(lifecycle);
        // The old callback may own the last handle to some comm.
        drop(previous);
    }

    /// Dispatch an inbound `comm_msg` to `on_message`.
    ///
    /// Messages for a closed comm, or with no callback set, are dropped.
    pub(crate) fn dispatch_message(&self, message: &Message) {
        {
            let mut lifecycle = self.inner.lifecycle();
            if !lifecycle.accepts_sends() {
                warn!(comm_id = %self.inner.id, "comm_msg for closed comm; discarding");
                return;
            }
            lifecycle.dispatching += 1;
        }

        let on_msg = self.inner.callbacks().on_msg.clone();
        match on_msg {
            Some(callback) => {
                // Failures are reported by the bridge.
                let _ = callback.invoke(message);
            }
            None => {
                debug!(comm_id = %self.inner.id, "no message callback set; discarding comm_msg")
            }
        }

        self.inner.end_dispatch();
    }

    /// Apply a `comm_close` received from the peer.
    pub(crate) fn close_remote(&self, message: &Message) {
        {
            let mut lifecycle = self.inner.lifecycle();
            if !lifecycle.accepts_sends() {
                debug!(comm_id = %self.inner.id, "comm already closing; ignoring comm_close");
                return;
            }
            if lifecycle.dispatching > 0 {
                lifecycle.pending = Some(PendingClose::Remote(message.clone()));
                return;
            }
            lifecycle.state = CommState::Closed;
        }
        self.inner.finish_close(message);
    }

    /// Expose this comm to runtime code.
    pub fn to_object(&self) -> Object {
        Object::handle("Comm", self.clone())
    }

    /// Recover a comm from a [`Comm`] or [`WeakComm`] handle object.
    ///
    /// A weak handle whose comm is gone yields `None`.
    pub fn from_object(value: &Object) -> Option<Comm> {
        let handle = value.as_handle()?;
        if let Some(comm) = handle.downcast_ref::<Comm>() {
            return Some(comm.clone());
        }
        handle.downcast_ref::<WeakComm>()?.upgrade()
    }

    /// A handle that does not keep the comm alive.
    pub fn downgrade(&self) -> WeakComm {
        WeakComm {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Comm) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A non-owning reference to a comm, for callbacks that talk back on the
/// comm they are attached to.
#[derive(Clone)]
pub struct WeakComm {
    inner: Weak<CommInner>,
}

impl WeakComm {
    pub fn upgrade(&self) -> Option<Comm> {
        self.inner.upgrade().map(Comm::from_inner)
    }

    /// Expose this reference to runtime code. [`Comm::from_object`]
    /// accepts it while the comm is alive.
    pub fn to_object(&self) -> Object {
        Object::handle("WeakComm", self.clone())
    }
}

impl fmt::Debug for WeakComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(comm) => f.debug_tuple("WeakComm").field(comm.id()).finish(),
            None => f.write_str("WeakComm(<dropped>)"),
        }
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("id", &self.inner.id)
            .field("target_name", &self.inner.target_name)
            .field("state", &self.state())
            .finish()
    }
}
