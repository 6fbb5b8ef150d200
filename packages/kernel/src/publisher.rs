//! Outbound kernel messages: replies and iopub broadcasts.

use std::fmt;
use std::sync::Arc;

use embedkern_comm::{ErrorReporter, ExecutionError, Transport, TransportError};
use embedkern_wire::{Header, JsonMap, JsonValue, Message, MessageType};
use serde_json::json;
use tracing::warn;

/// Builds and sends everything the kernel says on its own behalf.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    session: String,
    username: String,
}

type Result<T> = std::result::Result<T, TransportError>;

impl Publisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            session: session.into(),
            username: username.into(),
        }
    }

    /// Send a message of `msg_type` parented to `parent`.
    pub fn publish(
        &self,
        msg_type: MessageType,
        parent: &JsonMap,
        content: JsonValue,
    ) -> Result<()> {
        let header = Header::new(&msg_type, &self.session, &self.username);
        self.transport
            .send(Message::new(header, content).with_parent(parent.clone()))
    }

    /// Answer `request` with its reply type.
    pub fn reply(&self, request: &Message, content: JsonValue) -> Result<()> {
        let msg_type = request
            .msg_type()
            .reply_type()
            .unwrap_or_else(|| MessageType::Other(format!("{}_reply", request.header.msg_type)));
        self.publish(msg_type, &request.header.to_map(), content)
    }

    pub fn status(&self, parent: &JsonMap, execution_state: &str) -> Result<()> {
        self.publish(
            MessageType::Status,
            parent,
            json!({"execution_state": execution_state}),
        )
    }

    pub fn stream(&self, parent: &JsonMap, name: &str, text: &str) -> Result<()> {
        self.publish(
            MessageType::Stream,
            parent,
            json!({"name": name, "text": text}),
        )
    }

    pub fn display_data(&self, parent: &JsonMap, data: JsonMap, metadata: JsonMap) -> Result<()> {
        self.publish(
            MessageType::DisplayData,
            parent,
            json!({"data": data, "metadata": metadata, "transient": {}}),
        )
    }

    pub fn execute_input(&self, parent: &JsonMap, code: &str, execution_count: u64) -> Result<()> {
        self.publish(
            MessageType::ExecuteInput,
            parent,
            json!({"code": code, "execution_count": execution_count}),
        )
    }

    pub fn execute_result(
        &self,
        parent: &JsonMap,
        execution_count: u64,
        data: JsonMap,
        metadata: JsonMap,
    ) -> Result<()> {
        self.publish(
            MessageType::ExecuteResult,
            parent,
            json!({"execution_count": execution_count, "data": data, "metadata": metadata}),
        )
    }

    pub fn error(&self, parent: &JsonMap, error: &ExecutionError) -> Result<()> {
        self.publish(
            MessageType::Error,
            parent,
            JsonValue::Object(error.to_content()),
        )
    }
}

impl ErrorReporter for Publisher {
    fn report(&self, parent_header: &JsonMap, error: &ExecutionError) {
        if let Err(e) = self.error(parent_header, error) {
            warn!(ename = %error.ename, error = %e, "failed to publish callback error");
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("session", &self.session)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
