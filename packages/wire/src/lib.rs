//! embedkern wire layer.
//!
//! This layer sits between the kernel protocol and the embedded runtime:
//! - `Message` / `Header` / `MessageType`: the protocol envelope
//! - `CommOpenContent` and friends: typed comm payloads
//! - `WireCodec`: runtime `Object` ⇄ canonical JSON value (`serde_json::Value`)
//! - `BufferCodec`: raw wire buffers ⇄ runtime bytes objects
//!
//! Codec operations that read or build runtime objects take a
//! `&RuntimeGuard`, so they can only run inside the runtime.
//!
//! # Example
//!
//! ```rust
//! use embedkern_runtime::{Object, Runtime};
//! use embedkern_wire::WireCodec;
//!
//! let runtime = Runtime::new();
//! let guard = runtime.enter();
//! let codec = WireCodec::new();
//!
//! let value = codec.decode_text(&guard, r#"{"n": 1}"#).unwrap();
//! assert_eq!(value.get_item("n"), Some(Object::Int(1)));
//! assert_eq!(codec.encode_text(&guard, &value).unwrap(), r#"{"n":1}"#);
//! ```

pub use bytes::Bytes;

mod buffers;
mod codec;
mod content;
mod error;
mod message;

pub use buffers::BufferCodec;
pub use codec::{WireCodec, DEFAULT_MAX_DEPTH};
pub use content::{CommCloseContent, CommInfoRequestContent, CommMsgContent, CommOpenContent};
pub use error::{Result, WireError};
pub use message::{
    new_id, Channel, Header, JsonMap, JsonValue, Message, MessageType, PROTOCOL_VERSION,
};
