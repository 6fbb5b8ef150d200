//! The protocol message envelope.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Result, WireError};

pub use serde_json::Value as JsonValue;

/// A JSON object: string keys to wire values.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// Protocol version stamped on headers created here.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Create a fresh message or channel identifier (random UUIDv4).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Which socket a message the kernel sends belongs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Replies to requests.
    Shell,
    /// Broadcast side effects: status, output, comm traffic.
    IoPub,
}

/// Message kinds known to the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    CommOpen,
    CommMsg,
    CommClose,
    CommInfoRequest,
    CommInfoReply,
    KernelInfoRequest,
    KernelInfoReply,
    ExecuteRequest,
    ExecuteReply,
    CompleteRequest,
    CompleteReply,
    InspectRequest,
    InspectReply,
    IsCompleteRequest,
    IsCompleteReply,
    HistoryRequest,
    HistoryReply,
    ShutdownRequest,
    ShutdownReply,
    Status,
    Stream,
    DisplayData,
    ExecuteInput,
    ExecuteResult,
    Error,
    /// Anything else, kept verbatim.
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::CommOpen => "comm_open",
            MessageType::CommMsg => "comm_msg",
            MessageType::CommClose => "comm_close",
            MessageType::CommInfoRequest => "comm_info_request",
            MessageType::CommInfoReply => "comm_info_reply",
            MessageType::KernelInfoRequest => "kernel_info_request",
            MessageType::KernelInfoReply => "kernel_info_reply",
            MessageType::ExecuteRequest => "execute_request",
            MessageType::ExecuteReply => "execute_reply",
            MessageType::CompleteRequest => "complete_request",
            MessageType::CompleteReply => "complete_reply",
            MessageType::InspectRequest => "inspect_request",
            MessageType::InspectReply => "inspect_reply",
            MessageType::IsCompleteRequest => "is_complete_request",
            MessageType::IsCompleteReply => "is_complete_reply",
            MessageType::HistoryRequest => "history_request",
            MessageType::HistoryReply => "history_reply",
            MessageType::ShutdownRequest => "shutdown_request",
            MessageType::ShutdownReply => "shutdown_reply",
            MessageType::Status => "status",
            MessageType::Stream => "stream",
            MessageType::DisplayData => "display_data",
            MessageType::ExecuteInput => "execute_input",
            MessageType::ExecuteResult => "execute_result",
            MessageType::Error => "error",
            MessageType::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "comm_open" => MessageType::CommOpen,
            "comm_msg" => MessageType::CommMsg,
            "comm_close" => MessageType::CommClose,
            "comm_info_request" => MessageType::CommInfoRequest,
            "comm_info_reply" => MessageType::CommInfoReply,
            "kernel_info_request" => MessageType::KernelInfoRequest,
            "kernel_info_reply" => MessageType::KernelInfoReply,
            "execute_request" => MessageType::ExecuteRequest,
            "execute_reply" => MessageType::ExecuteReply,
            "complete_request" => MessageType::CompleteRequest,
            "complete_reply" => MessageType::CompleteReply,
            "inspect_request" => MessageType::InspectRequest,
            "inspect_reply" => MessageType::InspectReply,
            "is_complete_request" => MessageType::IsCompleteRequest,
            "is_complete_reply" => MessageType::IsCompleteReply,
            "history_request" => MessageType::HistoryRequest,
            "history_reply" => MessageType::HistoryReply,
            "shutdown_request" => MessageType::ShutdownRequest,
            "shutdown_reply" => MessageType::ShutdownReply,
            "status" => MessageType::Status,
            "stream" => MessageType::Stream,
            "display_data" => MessageType::DisplayData,
            "execute_input" => MessageType::ExecuteInput,
            "execute_result" => MessageType::ExecuteResult,
            "error" => MessageType::Error,
            other => MessageType::Other(other.to_string()),
        }
    }

    /// The reply type for a request type.
    pub fn reply_type(&self) -> Option<MessageType> {
        let reply = match self {
            MessageType::CommInfoRequest => MessageType::CommInfoReply,
            MessageType::KernelInfoRequest => MessageType::KernelInfoReply,
            MessageType::ExecuteRequest => MessageType::ExecuteReply,
            MessageType::CompleteRequest => MessageType::CompleteReply,
            MessageType::InspectRequest => MessageType::InspectReply,
            MessageType::IsCompleteRequest => MessageType::IsCompleteReply,
            MessageType::HistoryRequest => MessageType::HistoryReply,
            MessageType::ShutdownRequest => MessageType::ShutdownReply,
            _ => return None,
        };
        Some(reply)
    }

    /// Channel for a message of this type sent by the kernel.
    pub fn channel(&self) -> Channel {
        if self.as_str().ends_with("_reply") {
            Channel::Shell
        } else {
            Channel::IoPub
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        MessageType::parse(s)
    }
}

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// Message provenance record.
///
/// Headers are normally stamped by the transport; the core only reads
/// `msg_type` and passes the rest through. Unknown fields survive in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub msg_type: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Header {
    /// Stamp a new header with a fresh id and the current time.
    pub fn new(msg_type: &MessageType, session: &str, username: &str) -> Self {
        Self {
            msg_id: new_id(),
            msg_type: msg_type.as_str().to_string(),
            session: session.to_string(),
            username: username.to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            version: default_version(),
            extra: JsonMap::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::parse(&self.msg_type)
    }

    /// The header as a JSON object, e.g. to use as a `parent_header`.
    pub fn to_map(&self) -> JsonMap {
        match serde_json::to_value(self) {
            Ok(JsonValue::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }
}

fn empty_object() -> JsonValue {
    JsonValue::Object(JsonMap::new())
}

/// Accept `null` wherever an object is expected and read it as `{}`.
pub(crate) fn map_or_null<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<JsonMap, D::Error> {
    Ok(Option::<JsonMap>::deserialize(deserializer)?.unwrap_or_default())
}

/// One protocol message.
///
/// Buffers travel out of band: they are not part of the serialized form and
/// are never re-encoded. Their order is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    #[serde(default, deserialize_with = "map_or_null")]
    pub parent_header: JsonMap,
    #[serde(default, deserialize_with = "map_or_null")]
    pub metadata: JsonMap,
    #[serde(default = "empty_object")]
    pub content: JsonValue,
    #[serde(skip)]
    pub buffers: Vec<Bytes>,
}

impl Message {
    /// Create a message with no parent, metadata or buffers.
    pub fn new(header: Header, content: JsonValue) -> Self {
        Self {
            header,
            parent_header: JsonMap::new(),
            metadata: JsonMap::new(),
            content,
            buffers: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_header: JsonMap) -> Self {
        self.parent_header = parent_header;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_buffers(mut self, buffers: Vec<Bytes>) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn msg_type(&self) -> MessageType {
        self.header.message_type()
    }

    /// Parse the content into a typed record.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.content).map_err(|e| {
            WireError::MalformedWireData(format!("{} content: {}", self.header.msg_type, e))
        })
    }

    /// Everything but the buffers as one JSON object.
    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        map.insert("header".to_string(), JsonValue::Object(self.header.to_map()));
        map.insert(
            "parent_header".to_string(),
            JsonValue::Object(self.parent_header.clone()),
        );
        map.insert(
            "metadata".to_string(),
            JsonValue::Object(self.metadata.clone()),
        );
        map.insert("content".to_string(), self.content.clone());
        JsonValue::Object(map)
    }
}
