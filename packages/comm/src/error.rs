//! Error types for the comm layer.

use embedkern_runtime::Exception;
use embedkern_wire::{JsonMap, JsonValue, WireError};
use thiserror::Error;

use crate::comm::CommId;

/// Errors raised synchronously to code driving a comm.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommError {
    /// A payload could not be encoded, or an inbound message was malformed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The comm is closed (or closing) and cannot send.
    #[error("comm {0} is closed")]
    ChannelClosed(CommId),

    /// No factory is registered for the target name.
    #[error("no comm target registered for {0:?}")]
    UnknownTarget(String),

    /// A live comm already uses the requested id.
    #[error("comm id already in use: {0}")]
    DuplicateCommId(CommId),

    /// The live comm table is full.
    #[error("too many open comms (limit {0})")]
    TooManyComms(usize),

    /// The outbound message could not be handed to the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CommError {
    /// The error kind name reported to runtime code.
    pub fn kind(&self) -> &'static str {
        match self {
            CommError::Wire(e) => e.kind(),
            CommError::ChannelClosed(_) => "ChannelClosedError",
            CommError::UnknownTarget(_) => "UnknownTargetError",
            CommError::DuplicateCommId(_) => "DuplicateCommIdError",
            CommError::TooManyComms(_) => "TooManyCommsError",
            CommError::Transport(_) => "TransportError",
        }
    }
}

impl From<CommError> for Exception {
    fn from(error: CommError) -> Self {
        let value = match &error {
            CommError::Wire(WireError::Serialization(m) | WireError::MalformedWireData(m)) => {
                m.clone()
            }
            other => other.to_string(),
        };
        Exception::new(error.kind(), value)
    }
}

/// Errors from the outer message transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The receiving side has gone away.
    #[error("transport closed")]
    Closed,

    #[error("transport error: {0}")]
    Other(String),
}

/// An exception raised inside a dispatched callback, in reportable form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{ename}: {evalue}")]
pub struct ExecutionError {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

impl ExecutionError {
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        let ename = ename.into();
        let evalue = evalue.into();
        let traceback = vec![format!("{ename}: {evalue}")];
        Self {
            ename,
            evalue,
            traceback,
        }
    }

    /// Content for an `error` message or an error reply.
    pub fn to_content(&self) -> JsonMap {
        let mut content = JsonMap::new();
        content.insert("ename".to_string(), JsonValue::from(self.ename.clone()));
        content.insert("evalue".to_string(), JsonValue::from(self.evalue.clone()));
        content.insert(
            "traceback".to_string(),
            JsonValue::from(self.traceback.clone()),
        );
        content
    }
}

impl From<Exception> for ExecutionError {
    fn from(exception: Exception) -> Self {
        let traceback = if exception.traceback.is_empty() {
            vec![format!("{}: {}", exception.name, exception.value)]
        } else {
            exception.traceback
        };
        Self {
            ename: exception.name,
            evalue: exception.value,
            traceback,
        }
    }
}

impl From<WireError> for ExecutionError {
    fn from(error: WireError) -> Self {
        let value = match &error {
            WireError::Serialization(m) | WireError::MalformedWireData(m) => m.clone(),
            other => other.to_string(),
        };
        ExecutionError::new(error.kind(), value)
    }
}

/// Result type alias for comm operations.
pub type Result<T> = std::result::Result<T, CommError>;
