//! Kernel driver for the embedkern comm layer.
//!
//! A [`Kernel`] owns one embedded runtime and answers the shell requests a
//! frontend sends: comm traffic, `comm_info`, `kernel_info`, `execute`, and
//! the completion and inspection family. Code runs through an [`Executor`];
//! cells starting with `%` go to the [`MagicRegistry`] instead.
//!
//! ```
//! use std::sync::Arc;
//!
//! use embedkern_comm::ChannelTransport;
//! use embedkern_kernel::{Flow, Kernel, KernelConfig, LineExecutor};
//! use embedkern_runtime::Runtime;
//! use embedkern_wire::{Header, Message, MessageType};
//! use serde_json::json;
//!
//! let (transport, mut outbox) = ChannelTransport::pair();
//! let mut kernel = Kernel::new(
//!     KernelConfig::default(),
//!     Arc::new(Runtime::new()),
//!     Arc::new(transport),
//!     Box::new(LineExecutor::new()),
//! );
//!
//! let request = Message::new(
//!     Header::new(&MessageType::ExecuteRequest, "frontend", "user"),
//!     json!({"code": "x = 40\nx"}),
//! );
//! assert_eq!(kernel.handle(&request).unwrap(), Flow::Continue);
//!
//! let types: Vec<String> = outbox.drain().into_iter().map(|m| m.header.msg_type).collect();
//! assert_eq!(
//!     types,
//!     ["status", "execute_input", "execute_result", "execute_reply", "status"]
//! );
//! ```

mod config;
mod error;
mod executor;
mod kernel;
pub mod logging;
mod magics;
mod publisher;

pub use config::{HelpLink, KernelConfig, LanguageInfo};
pub use error::{KernelError, Result};
pub use executor::{ExecutionContext, Executor, LineExecutor};
pub use kernel::{Flow, Kernel};
pub use magics::{CellMagic, Invocation, LineMagic, Magic, MagicError, MagicRegistry};
pub use publisher::Publisher;
