//! embedkern comm layer: named bidirectional channels between the embedded
//! runtime and the kernel protocol peer.
//!
//! - [`Comm`]: one channel, with its open → closed lifecycle and callbacks
//! - [`TargetRegistry`]: target name → factory for comms the peer opens
//! - [`CallbackBridge`]: runs runtime callbacks for inbound messages, under
//!   the runtime lock, reporting what they raise
//! - [`CommManager`]: the live comm table and inbound dispatch
//! - [`Transport`]: where outbound messages go
//!
//! Runtime code reaches all of this through the functions [`bindings::install`]
//! binds, or through [`Comm::to_object`] handles.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use embedkern_comm::{ChannelTransport, Comm, CommConfig, CommManager, LogReporter, Payload};
//! use embedkern_runtime::{Exception, Function, Object, Runtime, RuntimeGuard};
//! use embedkern_wire::{Header, Message, MessageType};
//! use serde_json::json;
//!
//! // factory(comm, message): keep the comm where runtime code can find it.
//! fn keep(guard: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
//!     guard.set_global("comm", args[0].clone());
//!     Ok(Object::None)
//! }
//!
//! let runtime = Arc::new(Runtime::new());
//! let (transport, mut outbox) = ChannelTransport::pair();
//! let manager = CommManager::new(
//!     Arc::clone(&runtime),
//!     Arc::new(transport),
//!     Arc::new(LogReporter),
//!     CommConfig::default(),
//! );
//! manager.register_target("echo", Function::new("keep", keep));
//!
//! let open = Message::new(
//!     Header::new(&MessageType::CommOpen, "frontend", "user"),
//!     json!({"comm_id": "c1", "target_name": "echo", "data": {}}),
//! );
//! manager.handle_message(&open).unwrap();
//!
//! let guard = runtime.enter();
//! let comm = Comm::from_object(&guard.get_global("comm").unwrap()).unwrap();
//! comm.send(&guard, Payload::new()).unwrap();
//! assert_eq!(outbox.try_recv().unwrap().content, json!({"comm_id": "c1", "data": {}}));
//! ```

pub mod bindings;
mod bridge;
mod comm;
mod error;
mod manager;
mod registry;
mod transport;

pub use bridge::{BridgedCallback, CallbackBridge, ErrorReporter, LogReporter};
pub use comm::{Comm, CommId, CommOptions, CommState, Payload, WeakComm};
pub use error::{CommError, ExecutionError, Result, TransportError};
pub use manager::{CommConfig, CommManager};
pub use registry::TargetRegistry;
pub use transport::{ChannelTransport, Outbox, Transport};
