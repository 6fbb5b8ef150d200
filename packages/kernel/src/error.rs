//! Error types for the kernel driver.

use embedkern_comm::{CommError, TransportError};
use embedkern_wire::WireError;
use thiserror::Error;

/// Errors that can occur while handling a kernel message.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A request's content did not match its schema.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The comm layer refused a comm message.
    #[error("comm error: {0}")]
    Comm(#[from] CommError),

    /// A reply or broadcast could not be sent.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration could not be read or applied.
    #[error("config error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;
