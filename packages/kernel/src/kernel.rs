//! The kernel message loop.

use std::sync::Arc;

use embedkern_comm::{bindings, CommManager, ExecutionError, Transport};
use embedkern_runtime::{Exception, Object, Runtime};
use embedkern_wire::{
    CommInfoRequestContent, JsonMap, JsonValue, Message, MessageType, PROTOCOL_VERSION,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::KernelConfig;
use crate::error::Result;
use crate::executor::{ExecutionContext, Executor};
use crate::magics::{Invocation, MagicRegistry};
use crate::publisher::Publisher;

/// What the loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    code: String,
    #[serde(default)]
    silent: bool,
    #[serde(default = "yes")]
    store_history: bool,
}

#[derive(Debug, Deserialize)]
struct CursorRequest {
    code: String,
    #[serde(default)]
    cursor_pos: usize,
    #[serde(default)]
    detail_level: u8,
}

#[derive(Debug, Deserialize)]
struct IsCompleteRequest {
    code: String,
}

#[derive(Debug, Default, Deserialize)]
struct ShutdownRequest {
    #[serde(default)]
    restart: bool,
}

fn yes() -> bool {
    true
}

/// A kernel: one runtime, its comms, and an executor for code.
///
/// [`handle`](Kernel::handle) processes one inbound shell message,
/// bracketed by `busy` and `idle` status broadcasts.
pub struct Kernel {
    config: KernelConfig,
    runtime: Arc<Runtime>,
    comms: CommManager,
    publisher: Publisher,
    magics: MagicRegistry,
    executor: Box<dyn Executor>,
    execution_count: u64,
}

impl Kernel {
    /// Create a kernel and install the comm functions into `runtime`.
    pub fn new(
        config: KernelConfig,
        runtime: Arc<Runtime>,
        transport: Arc<dyn Transport>,
        executor: Box<dyn Executor>,
    ) -> Self {
        let publisher = Publisher::new(Arc::clone(&transport), &config.session, &config.username);
        let comms = CommManager::new(
            Arc::clone(&runtime),
            transport,
            Arc::new(publisher.clone()),
            config.comm_config(),
        );
        bindings::install(&runtime.enter(), &comms);

        Self {
            config,
            runtime,
            comms,
            publisher,
            magics: MagicRegistry::with_builtins(),
            executor,
            execution_count: 0,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn comms(&self) -> &CommManager {
        &self.comms
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn magics_mut(&mut self) -> &mut MagicRegistry {
        &mut self.magics
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Handle one inbound message.
    pub fn handle(&mut self, message: &Message) -> Result<Flow> {
        let parent = message.header.to_map();
        self.publisher.status(&parent, "busy")?;
        let flow = self.dispatch(message);
        self.publisher.status(&parent, "idle")?;
        flow
    }

    /// Handle messages until a shutdown request or until every sender is gone.
    pub fn run(&mut self, inbox: &mut UnboundedReceiver<Message>) {
        info!(session = %self.config.session, "kernel started");
        while let Some(message) = inbox.blocking_recv() {
            match self.handle(&message) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Shutdown) => break,
                Err(e) => warn!(
                    msg_type = %message.header.msg_type,
                    error = %e,
                    "failed to handle message"
                ),
            }
        }
        info!("kernel stopped");
    }

    fn dispatch(&mut self, message: &Message) -> Result<Flow> {
        let msg_type = message.msg_type();
        debug!(msg_type = %msg_type, msg_id = %message.header.msg_id, "handling message");
        match msg_type {
            MessageType::CommOpen | MessageType::CommMsg | MessageType::CommClose => {
                self.comms.handle_message(message)?;
            }
            MessageType::CommInfoRequest => self.comm_info(message)?,
            MessageType::KernelInfoRequest => self.publisher.reply(message, self.kernel_info())?,
            MessageType::ExecuteRequest => self.execute(message)?,
            MessageType::CompleteRequest | MessageType::InspectRequest => {
                self.cursor_request(message, &msg_type)?
            }
            MessageType::IsCompleteRequest => {
                let request: IsCompleteRequest = message.content_as()?;
                let reply = self.executor.is_complete(&request.code);
                self.publisher.reply(message, JsonValue::Object(reply))?;
            }
            MessageType::HistoryRequest => {
                let request = match &message.content {
                    JsonValue::Object(map) => map.clone(),
                    _ => JsonMap::new(),
                };
                let reply = self.executor.history(&request);
                self.publisher.reply(message, JsonValue::Object(reply))?;
            }
            MessageType::ShutdownRequest => return self.shutdown(message),
            other => debug!(msg_type = %other, "unhandled message type; ignoring"),
        }
        Ok(Flow::Continue)
    }

    fn comm_info(&self, message: &Message) -> Result<()> {
        let request: CommInfoRequestContent = message.content_as()?;
        let comms: JsonMap = self
            .comms
            .comm_info(request.target_name.as_deref())
            .into_iter()
            .map(|(id, target_name)| (id.to_string(), json!({"target_name": target_name})))
            .collect();
        self.publisher
            .reply(message, json!({"status": "ok", "comms": comms}))?;
        Ok(())
    }

    fn kernel_info(&self) -> JsonValue {
        json!({
            "status": "ok",
            "protocol_version": PROTOCOL_VERSION,
            "implementation": "embedkern",
            "implementation_version": env!("CARGO_PKG_VERSION"),
            "language_info": self.config.language_info,
            "banner": self.config.banner,
            "help_links": self.config.help_links,
        })
    }

    fn execute(&mut self, message: &Message) -> Result<()> {
        let request: ExecuteRequest = message.content_as()?;
        let parent = message.header.to_map();
        if !request.silent && request.store_history {
            self.execution_count += 1;
        }
        let count = self.execution_count;
        if !request.silent {
            self.publisher.execute_input(&parent, &request.code, count)?;
        }

        if request.code.trim() == "?" {
            let payload = match &self.config.pager_url {
                Some(url) => vec![pager_payload(url)],
                None => Vec::new(),
            };
            let reply = json!({
                "status": "ok",
                "execution_count": count,
                "payload": payload,
                "user_expressions": {},
            });
            self.publisher.reply(message, reply)?;
            return Ok(());
        }

        let runtime = Arc::clone(&self.runtime);
        let guard = runtime.enter();
        let comms = &self.comms;
        let magics = &self.magics;
        let executor = &mut self.executor;
        let outcome = comms.with_parent(&guard, parent.clone(), || {
            let ctx = ExecutionContext {
                guard: &guard,
                comms,
                publisher: &self.publisher,
                magics,
                parent: &parent,
                execution_count: count,
                silent: request.silent,
            };
            match Invocation::parse(&request.code) {
                Some(invocation) => magics.run(&ctx, &invocation).map_err(Exception::from),
                None => executor.execute(&ctx, &request.code),
            }
        });
        drop(guard);

        let reply = match outcome.map_err(ExecutionError::from) {
            Ok(value) => {
                if let Some(value) = value.filter(|_| !request.silent) {
                    self.publish_result(&parent, count, &value)?;
                }
                json!({
                    "status": "ok",
                    "execution_count": count,
                    "payload": [],
                    "user_expressions": {},
                })
            }
            Err(error) => {
                debug!(ename = %error.ename, "execution failed");
                if !request.silent {
                    self.publisher.error(&parent, &error)?;
                }
                let mut content = error.to_content();
                content.insert("status".to_string(), json!("error"));
                content.insert("execution_count".to_string(), json!(count));
                JsonValue::Object(content)
            }
        };
        self.publisher.reply(message, reply)?;
        Ok(())
    }

    fn publish_result(&self, parent: &JsonMap, count: u64, value: &Object) -> Result<()> {
        let mut data = JsonMap::new();
        data.insert("text/plain".to_string(), json!(value.repr()));
        self.publisher
            .execute_result(parent, count, data, JsonMap::new())?;
        Ok(())
    }

    fn cursor_request(&mut self, message: &Message, msg_type: &MessageType) -> Result<()> {
        let request: CursorRequest = message.content_as()?;
        let runtime = Arc::clone(&self.runtime);
        let guard = runtime.enter();
        let parent = message.header.to_map();
        let ctx = ExecutionContext {
            guard: &guard,
            comms: &self.comms,
            publisher: &self.publisher,
            magics: &self.magics,
            parent: &parent,
            execution_count: self.execution_count,
            silent: true,
        };
        let reply = if *msg_type == MessageType::CompleteRequest {
            self.executor.complete(&ctx, &request.code, request.cursor_pos)
        } else {
            self.executor
                .inspect(&ctx, &request.code, request.cursor_pos, request.detail_level)
        };
        drop(guard);
        self.publisher.reply(message, JsonValue::Object(reply))?;
        Ok(())
    }

    fn shutdown(&mut self, message: &Message) -> Result<Flow> {
        let request: ShutdownRequest = message.content_as().unwrap_or_default();
        info!(restart = request.restart, "shutdown requested");
        {
            let runtime = Arc::clone(&self.runtime);
            let guard = runtime.enter();
            self.comms.with_parent(&guard, message.header.to_map(), || {
                self.comms.close_all(&guard)
            });
        }
        self.publisher
            .reply(message, json!({"status": "ok", "restart": request.restart}))?;
        Ok(Flow::Shutdown)
    }
}

/// The pager payload answering a bare `?`.
fn pager_payload(url: &str) -> JsonValue {
    let html = format!(
        "<style>\n\
         #pager-container {{\n    padding: 0;\n    margin: 0;\n    width: 100%;\n\
         \x20   height: 100%;\n}}\n\
         .embedkern-iframe-pager {{\n    padding: 0;\n    margin: 0;\n    width: 100%;\n\
         \x20   height: 100%;\n    border: none;\n}}\n</style>\n\
         <iframe class=\"embedkern-iframe-pager\" src=\"{}\"></iframe>",
        url
    );
    json!({
        "source": "page",
        "data": {"text/plain": url, "text/html": html},
        "start": 0,
    })
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("session", &self.config.session)
            .field("execution_count", &self.execution_count)
            .field("comms", &self.comms)
            .field("magics", &self.magics)
            .finish_non_exhaustive()
    }
}
