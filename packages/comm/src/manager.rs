//! The comm manager: live comm table, inbound dispatch, local construction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use embedkern_runtime::{Function, Runtime, RuntimeGuard};
use embedkern_wire::{
    new_id, CommCloseContent, CommMsgContent, CommOpenContent, Header, JsonMap, JsonValue,
    Message, MessageType,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bridge::{CallbackBridge, ErrorReporter};
use crate::comm::{Comm, CommId, CommInner, CommOptions, Payload};
use crate::error::{CommError, Result, TransportError};
use crate::registry::TargetRegistry;
use crate::transport::Transport;

/// Configuration for the comm layer.
#[derive(Debug, Clone)]
pub struct CommConfig {
    /// Session id stamped on outbound headers.
    pub session: String,
    /// User name stamped on outbound headers.
    pub username: String,
    /// Maximum number of live comms.
    pub max_comms: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            session: new_id(),
            username: "kernel".to_string(),
            max_comms: 65536,
        }
    }
}

/// Table entry for a live comm.
enum Slot {
    /// Opened by the peer: kept alive here until closed.
    Owned(Arc<CommInner>),
    /// Opened locally: alive as long as runtime code holds a handle.
    Tracked(Weak<CommInner>),
}

impl Slot {
    fn upgrade(&self) -> Option<Arc<CommInner>> {
        match self {
            Slot::Owned(inner) => Some(Arc::clone(inner)),
            Slot::Tracked(weak) => weak.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Slot::Owned(_) => true,
            Slot::Tracked(weak) => weak.strong_count() > 0,
        }
    }

    fn as_ptr(&self) -> *const CommInner {
        match self {
            Slot::Owned(inner) => Arc::as_ptr(inner),
            Slot::Tracked(weak) => weak.as_ptr(),
        }
    }
}

/// State shared by the manager and every comm it created.
pub(crate) struct Shared {
    pub(crate) bridge: CallbackBridge,
    transport: Arc<dyn Transport>,
    targets: TargetRegistry,
    config: CommConfig,
    comms: Mutex<HashMap<CommId, Slot>>,
    /// Headers of the inbound messages being dispatched, innermost last.
    parents: Mutex<Vec<JsonMap>>,
}

impl Shared {
    fn comms(&self) -> MutexGuard<'_, HashMap<CommId, Slot>> {
        self.comms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parents(&self) -> MutexGuard<'_, Vec<JsonMap>> {
        self.parents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build an outbound message parented to the message being dispatched.
    pub(crate) fn message(
        &self,
        msg_type: MessageType,
        content: JsonValue,
        metadata: JsonMap,
        buffers: Vec<Bytes>,
    ) -> Message {
        let header = Header::new(&msg_type, &self.config.session, &self.config.username);
        let parent = self.parents().last().cloned().unwrap_or_default();
        Message::new(header, content)
            .with_parent(parent)
            .with_metadata(metadata)
            .with_buffers(buffers)
    }

    pub(crate) fn send(&self, message: Message) -> std::result::Result<(), TransportError> {
        self.transport.send(message)
    }

    fn insert(&self, comm: &Comm, owned: bool) -> Result<()> {
        let slot = if owned {
            Slot::Owned(Arc::clone(comm.inner()))
        } else {
            Slot::Tracked(Arc::downgrade(comm.inner()))
        };
        let mut comms = self.comms();
        if comms.get(comm.id()).is_some_and(Slot::is_live) {
            return Err(CommError::DuplicateCommId(comm.id().clone()));
        }
        if comms.values().filter(|slot| slot.is_live()).count() >= self.config.max_comms {
            return Err(CommError::TooManyComms(self.config.max_comms));
        }
        let replaced = comms.insert(comm.id().clone(), slot);
        drop(comms);
        drop(replaced);
        Ok(())
    }

    fn lookup(&self, id: &CommId) -> Option<Comm> {
        let inner = self.comms().get(id).and_then(Slot::upgrade)?;
        Some(Comm::from_inner(inner))
    }

    /// Remove the entry for `id` if it still belongs to the comm at `ptr`.
    pub(crate) fn unregister(&self, id: &CommId, ptr: *const CommInner) {
        let removed = {
            let mut comms = self.comms();
            match comms.get(id) {
                Some(slot) if std::ptr::eq(slot.as_ptr(), ptr) => comms.remove(id),
                _ => None,
            }
        };
        // Dropping an owned entry may drop the comm itself.
        drop(removed);
    }

    fn live(&self) -> Vec<Comm> {
        let inners: Vec<Arc<CommInner>> = self.comms().values().filter_map(Slot::upgrade).collect();
        inners.into_iter().map(Comm::from_inner).collect()
    }
}

/// Pops the parent header pushed for a dispatch.
struct ParentScope<'a> {
    shared: &'a Shared,
}

impl<'a> ParentScope<'a> {
    fn enter(shared: &'a Shared, parent: JsonMap) -> Self {
        shared.parents().push(parent);
        Self { shared }
    }
}

impl Drop for ParentScope<'_> {
    fn drop(&mut self) {
        self.shared.parents().pop();
    }
}

/// Owns the comm table and routes comm traffic.
///
/// Cloning is cheap; clones share the same table.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use embedkern_comm::{ChannelTransport, CommConfig, CommManager, CommOptions, LogReporter};
/// use embedkern_runtime::Runtime;
///
/// let runtime = Arc::new(Runtime::new());
/// let (transport, mut outbox) = ChannelTransport::pair();
/// let manager = CommManager::new(
///     Arc::clone(&runtime),
///     Arc::new(transport),
///     Arc::new(LogReporter),
///     CommConfig::default(),
/// );
///
/// let guard = runtime.enter();
/// let comm = manager.new_comm(&guard, CommOptions::new("widgets").with_id("w1")).unwrap();
/// let open = outbox.try_recv().unwrap();
/// assert_eq!(open.header.msg_type, "comm_open");
/// assert_eq!(open.content["comm_id"], "w1");
/// assert!(comm.is_open());
/// ```
#[derive(Clone)]
pub struct CommManager {
    shared: Arc<Shared>,
}

impl CommManager {
    pub fn new(
        runtime: Arc<Runtime>,
        transport: Arc<dyn Transport>,
        reporter: Arc<dyn ErrorReporter>,
        config: CommConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                bridge: CallbackBridge::new(runtime, reporter),
                transport,
                targets: TargetRegistry::new(),
                config,
                comms: Mutex::new(HashMap::new()),
                parents: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    pub fn config(&self) -> &CommConfig {
        &self.shared.config
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        self.shared.bridge.runtime()
    }

    pub fn bridge(&self) -> &CallbackBridge {
        &self.shared.bridge
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.shared.targets
    }

    /// Register the factory for `target_name`, returning the one replaced.
    pub fn register_target(
        &self,
        target_name: impl Into<String>,
        factory: Function,
    ) -> Option<Function> {
        let target_name = target_name.into();
        debug!(target = %target_name, factory = factory.name(), "registering comm target");
        self.shared.targets.register(target_name, factory)
    }

    pub fn unregister_target(&self, target_name: &str) -> Option<Function> {
        self.shared.targets.unregister(target_name)
    }

    /// Open a comm from the local side and send its `comm_open`.
    ///
    /// The payload is encoded before anything is registered or sent, so a
    /// failure leaves no trace.
    pub fn new_comm(&self, guard: &RuntimeGuard<'_>, options: CommOptions) -> Result<Comm> {
        let encoded = options.payload().encode(guard, &self.shared.bridge)?;
        let id = options.comm_id.unwrap_or_default();
        let comm = Comm::create(Arc::clone(&self.shared), id, options.target_name);

        if let Err(e) = self.shared.insert(&comm, false) {
            comm.discard();
            return Err(e);
        }
        if let Err(e) = comm.open(encoded) {
            comm.discard();
            self.shared.unregister(comm.id(), Arc::as_ptr(comm.inner()));
            return Err(e);
        }
        Ok(comm)
    }

    /// Look up a live comm.
    pub fn get(&self, id: &CommId) -> Option<Comm> {
        self.shared.lookup(id).filter(Comm::is_open)
    }

    /// Number of live comms.
    pub fn len(&self) -> usize {
        self.shared.comms().values().filter(|slot| slot.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live comms as id → target name, optionally for one target only.
    pub fn comm_info(&self, target_name: Option<&str>) -> BTreeMap<CommId, String> {
        self.shared
            .live()
            .into_iter()
            .filter(|comm| comm.is_open())
            .filter(|comm| target_name.map_or(true, |t| comm.target_name() == t))
            .map(|comm| (comm.id().clone(), comm.target_name().to_string()))
            .collect()
    }

    /// The parent header outbound messages get right now.
    pub fn current_parent(&self) -> JsonMap {
        self.shared.parents().last().cloned().unwrap_or_default()
    }

    /// Run `f` with `parent` as the parent header of outbound comm messages.
    ///
    /// The parent stack is only touched under the runtime guard, like
    /// every other dispatch entry point.
    pub fn with_parent<R>(
        &self,
        _guard: &RuntimeGuard<'_>,
        parent: JsonMap,
        f: impl FnOnce() -> R,
    ) -> R {
        let _scope = ParentScope::enter(&self.shared, parent);
        f()
    }

    /// Route an inbound comm message. Other message types are ignored.
    ///
    /// The runtime is entered for the whole message, so messages are
    /// handled one at a time and in arrival order.
    pub fn handle_message(&self, message: &Message) -> Result<()> {
        let msg_type = message.msg_type();
        if !matches!(
            msg_type,
            MessageType::CommOpen | MessageType::CommMsg | MessageType::CommClose
        ) {
            debug!(msg_type = %msg_type, "not a comm message; ignoring");
            return Ok(());
        }

        let runtime = Arc::clone(self.runtime());
        let guard = runtime.enter();
        match msg_type {
            MessageType::CommOpen => self.dispatch_open(&guard, message),
            MessageType::CommMsg => self.dispatch_msg(&guard, message),
            _ => self.dispatch_close(&guard, message),
        }
    }

    /// Handle an inbound `comm_open`: create the comm and run the factory.
    ///
    /// An unknown target is answered with `comm_close` and reported as
    /// [`CommError::UnknownTarget`]; nothing is registered. A factory that
    /// raises is reported and its comm closed.
    pub fn dispatch_open(&self, guard: &RuntimeGuard<'_>, message: &Message) -> Result<()> {
        let content: CommOpenContent = message.content_as()?;
        let _scope = ParentScope::enter(&self.shared, message.header.to_map());
        let id = CommId::from(content.comm_id);

        let factory = match self.shared.targets.resolve(&content.target_name) {
            Ok(factory) => factory,
            Err(e) => {
                warn!(comm_id = %id, target = %content.target_name, "no such comm target");
                let close = self.shared.message(
                    MessageType::CommClose,
                    json!({"comm_id": id.as_str(), "data": {}}),
                    JsonMap::new(),
                    Vec::new(),
                );
                if let Err(send_err) = self.shared.send(close) {
                    warn!(comm_id = %id, error = %send_err, "failed to refuse comm_open");
                }
                return Err(e);
            }
        };

        let comm = Comm::create(Arc::clone(&self.shared), id, content.target_name);
        if let Err(e) = self.shared.insert(&comm, true) {
            comm.discard();
            warn!(comm_id = %comm.id(), error = %e, "rejecting comm_open");
            return Err(e);
        }
        info!(comm_id = %comm.id(), target = %comm.target_name(), "comm opened by peer");

        let opened = self
            .shared
            .bridge
            .call(&factory, &[comm.to_object()], message);
        if opened.is_err() {
            warn!(comm_id = %comm.id(), "comm factory raised; closing comm");
            comm.close(guard, Payload::default())?;
        }
        Ok(())
    }

    /// Handle an inbound `comm_msg`. Unknown or closed ids are dropped.
    pub fn dispatch_msg(&self, _guard: &RuntimeGuard<'_>, message: &Message) -> Result<()> {
        let content: CommMsgContent = message.content_as()?;
        let _scope = ParentScope::enter(&self.shared, message.header.to_map());
        match self.shared.lookup(&CommId::from(content.comm_id.as_str())) {
            Some(comm) => comm.dispatch_message(message),
            None => warn!(comm_id = %content.comm_id, "comm_msg for unknown comm; discarding"),
        }
        Ok(())
    }

    /// Handle an inbound `comm_close`. Unknown or closed ids are dropped.
    pub fn dispatch_close(&self, _guard: &RuntimeGuard<'_>, message: &Message) -> Result<()> {
        let content: CommCloseContent = message.content_as()?;
        let _scope = ParentScope::enter(&self.shared, message.header.to_map());
        match self.shared.lookup(&CommId::from(content.comm_id.as_str())) {
            Some(comm) => comm.close_remote(message),
            None => debug!(comm_id = %content.comm_id, "comm_close for unknown comm; discarding"),
        }
        Ok(())
    }

    /// Close every live comm, e.g. at shutdown.
    pub fn close_all(&self, guard: &RuntimeGuard<'_>) {
        for comm in self.shared.live() {
            if let Err(e) = comm.close(guard, Payload::default()) {
                warn!(comm_id = %comm.id(), error = %e, "failed to close comm");
            }
        }
    }
}

impl std::fmt::Debug for CommManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommManager")
            .field("config", &self.shared.config)
            .field("comms", &self.len())
            .finish()
    }
}
