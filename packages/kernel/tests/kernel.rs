//! End-to-end kernel behavior over an in-memory transport.

use std::sync::Arc;
use std::thread;

use embedkern_comm::{ChannelTransport, Comm, CommError, Outbox, Payload};
use embedkern_kernel::{
    ExecutionContext, Flow, Kernel, KernelConfig, KernelError, LineExecutor, Magic, MagicError,
};
use embedkern_runtime::{Exception, Function, Object, Runtime, RuntimeGuard};
use embedkern_wire::{Header, JsonValue, Message, MessageType};
use serde_json::json;

fn kernel_with(config: KernelConfig) -> (Kernel, Outbox) {
    let (transport, outbox) = ChannelTransport::pair();
    let kernel = Kernel::new(
        config,
        Arc::new(Runtime::new()),
        Arc::new(transport),
        Box::new(LineExecutor::new()),
    );
    (kernel, outbox)
}

fn kernel() -> (Kernel, Outbox) {
    kernel_with(KernelConfig::default())
}

fn request(msg_type: MessageType, content: JsonValue) -> Message {
    Message::new(Header::new(&msg_type, "frontend", "user"), content)
}

fn execute(kernel: &mut Kernel, code: &str) -> Message {
    let request = request(MessageType::ExecuteRequest, json!({"code": code}));
    assert_eq!(kernel.handle(&request).unwrap(), Flow::Continue);
    request
}

fn types(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.header.msg_type.as_str()).collect()
}

fn find<'a>(messages: &'a [Message], msg_type: &str) -> &'a Message {
    messages
        .iter()
        .find(|m| m.header.msg_type == msg_type)
        .unwrap_or_else(|| panic!("no {} in {:?}", msg_type, types(messages)))
}

/// on_msg: send the inbound data back on the comm stored in global `c`.
fn echo(guard: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let msg = embedkern_runtime::required_arg(args, 0, "echo")?;
    let data = msg
        .get_item("content")
        .and_then(|c| c.get_item("data"))
        .unwrap_or_else(Object::dict);
    let comm = guard
        .get_global("c")
        .and_then(|c| Comm::from_object(&c))
        .ok_or_else(|| Exception::runtime_error("no comm"))?;
    comm.send(guard, Payload::new().with_data(data))?;
    Ok(Object::None)
}

/// `%hello`: greet on stdout.
fn hello(ctx: &ExecutionContext<'_, '_>, _: &str) -> Result<Option<Object>, MagicError> {
    ctx.stream("stdout", "hello\n");
    Ok(None)
}

fn fail(_: &RuntimeGuard<'_>, _: &Object, _: &[Object]) -> Result<Object, Exception> {
    Err(Exception::key_error("'missing'"))
}

#[test]
fn kernel_info_describes_the_kernel() {
    let config =
        KernelConfig::from_json(r#"{"banner": "hello", "language_info": {"name": "calc"}}"#)
            .unwrap();
    let (mut kernel, mut outbox) = kernel_with(config);

    let info = request(MessageType::KernelInfoRequest, json!({}));
    kernel.handle(&info).unwrap();

    let sent = outbox.drain();
    assert_eq!(types(&sent), ["status", "kernel_info_reply", "status"]);
    assert_eq!(sent[0].content, json!({"execution_state": "busy"}));
    assert_eq!(sent[2].content, json!({"execution_state": "idle"}));

    let reply = &sent[1];
    assert_eq!(reply.parent_header["msg_id"], json!(info.header.msg_id));
    assert_eq!(reply.content["implementation"], "embedkern");
    assert_eq!(reply.content["protocol_version"], "5.3");
    assert_eq!(reply.content["banner"], "hello");
    assert_eq!(reply.content["language_info"]["name"], "calc");
}

#[test]
fn comm_opened_by_code_carries_the_execute_parent() {
    let (mut kernel, mut outbox) = kernel();
    let exec = execute(&mut kernel, r#"c = comm_open("widget", {"value": 1})"#);

    let sent = outbox.drain();
    assert_eq!(
        types(&sent),
        ["status", "execute_input", "comm_open", "execute_reply", "status"]
    );
    let open = &sent[2];
    assert_eq!(open.content["target_name"], "widget");
    assert_eq!(open.content["data"], json!({"value": 1}));
    assert_eq!(open.parent_header["msg_id"], json!(exec.header.msg_id));
    let comm_id = open.content["comm_id"].clone();

    kernel
        .handle(&request(MessageType::CommInfoRequest, json!({"target_name": "widget"})))
        .unwrap();
    let reply = find(&outbox.drain(), "comm_info_reply").content.clone();
    assert_eq!(reply["status"], "ok");
    assert_eq!(
        reply["comms"][comm_id.as_str().unwrap()],
        json!({"target_name": "widget"})
    );
}

#[test]
fn inbound_comm_msg_reaches_the_callback() {
    let (mut kernel, mut outbox) = kernel();
    kernel
        .runtime()
        .enter()
        .set_global("echo", Function::new("echo", echo));
    execute(&mut kernel, "c = comm_open(\"echo\", null, null, null, \"e1\")\ncomm_on_msg(c, echo)");
    outbox.drain();

    let msg = request(
        MessageType::CommMsg,
        json!({"comm_id": "e1", "data": {"n": 1}}),
    );
    kernel.handle(&msg).unwrap();

    let sent = outbox.drain();
    assert_eq!(types(&sent), ["status", "comm_msg", "status"]);
    assert_eq!(sent[1].content, json!({"comm_id": "e1", "data": {"n": 1}}));
    assert_eq!(sent[1].parent_header["msg_id"], json!(msg.header.msg_id));
}

#[test]
fn raising_callback_is_published_as_error() {
    let (mut kernel, mut outbox) = kernel();
    kernel
        .runtime()
        .enter()
        .set_global("fail", Function::new("fail", fail));
    execute(&mut kernel, "c = comm_open(\"t\", null, null, null, \"f1\")\ncomm_on_msg(c, fail)");
    outbox.drain();

    let msg = request(MessageType::CommMsg, json!({"comm_id": "f1", "data": {}}));
    kernel.handle(&msg).unwrap();

    let sent = outbox.drain();
    let error = find(&sent, "error");
    assert_eq!(error.content["ename"], "KeyError");
    assert_eq!(error.parent_header["msg_id"], json!(msg.header.msg_id));
}

#[test]
fn unknown_target_still_goes_idle() {
    let (mut kernel, mut outbox) = kernel();
    let open = request(
        MessageType::CommOpen,
        json!({"comm_id": "x", "target_name": "missing", "data": {}}),
    );

    let err = kernel.handle(&open).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Comm(CommError::UnknownTarget(ref t)) if t == "missing"
    ));
    assert_eq!(
        types(&outbox.drain()),
        ["status", "comm_close", "status"]
    );
}

#[test]
fn execution_errors_reply_with_error_status() {
    let (mut kernel, mut outbox) = kernel();
    execute(&mut kernel, "undefined_name");

    let sent = outbox.drain();
    assert_eq!(
        types(&sent),
        ["status", "execute_input", "error", "execute_reply", "status"]
    );
    let reply = &sent[3].content;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["ename"], "NameError");
    assert_eq!(reply["execution_count"], 1);
    assert_eq!(
        reply["traceback"],
        json!(["NameError: name 'undefined_name' is not defined"])
    );
}

#[test]
fn silent_execution_publishes_nothing() {
    let (mut kernel, mut outbox) = kernel();
    let silent = request(
        MessageType::ExecuteRequest,
        json!({"code": "x = 1\nx", "silent": true}),
    );
    kernel.handle(&silent).unwrap();

    let sent = outbox.drain();
    assert_eq!(types(&sent), ["status", "execute_reply", "status"]);
    assert_eq!(kernel.execution_count(), 0);
    assert_eq!(kernel.runtime().enter().get_global("x"), Some(Object::Int(1)));
}

#[test]
fn question_mark_pages_the_help_url() {
    let config = KernelConfig::from_json(r#"{"pager_url": "https://example.org/docs"}"#).unwrap();
    let (mut kernel, mut outbox) = kernel_with(config);
    execute(&mut kernel, "?");

    let sent = outbox.drain();
    let reply = &find(&sent, "execute_reply").content;
    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["payload"][0]["source"], "page");
    assert_eq!(reply["payload"][0]["data"]["text/plain"], "https://example.org/docs");
}

#[test]
fn magics_run_and_unknown_magics_fail() {
    let (mut kernel, mut outbox) = kernel();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cell.txt");

    execute(&mut kernel, &format!("%%writefile {}\nfirst\nsecond", path.display()));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond");
    let sent = outbox.drain();
    assert!(find(&sent, "stream").content["text"]
        .as_str()
        .unwrap()
        .starts_with("Writing "));

    execute(&mut kernel, "%nosuchmagic");
    let sent = outbox.drain();
    let reply = &find(&sent, "execute_reply").content;
    assert_eq!(reply["ename"], "UsageError");
    assert_eq!(reply["evalue"], "Line magic function `%nosuchmagic` not found.");
}

#[test]
fn lsmagic_lists_registered_magics() {
    let (mut kernel, mut outbox) = kernel();
    kernel.magics_mut().register("hello", Magic::Line(hello));

    execute(&mut kernel, "%hello");
    let sent = outbox.drain();
    assert_eq!(find(&sent, "stream").content["text"], "hello\n");

    execute(&mut kernel, "%lsmagic");
    let sent = outbox.drain();
    let listing = find(&sent, "stream").content["text"].as_str().unwrap().to_string();
    assert!(listing.contains("%hello"));
    assert!(listing.contains("%lsmagic"));
    assert!(listing.contains("%%writefile"));
}

#[test]
fn complete_and_is_complete() {
    let (mut kernel, mut outbox) = kernel();
    execute(&mut kernel, "counter = 1");
    outbox.drain();

    kernel
        .handle(&request(
            MessageType::CompleteRequest,
            json!({"code": "coun", "cursor_pos": 4}),
        ))
        .unwrap();
    kernel
        .handle(&request(MessageType::IsCompleteRequest, json!({"code": "f(1,"})))
        .unwrap();
    kernel
        .handle(&request(MessageType::HistoryRequest, json!({"hist_access_type": "tail"})))
        .unwrap();

    let sent = outbox.drain();
    assert_eq!(find(&sent, "complete_reply").content["matches"], json!(["counter"]));
    assert_eq!(find(&sent, "is_complete_reply").content["status"], "incomplete");
    assert_eq!(find(&sent, "history_reply").content["history"], json!([]));
}

#[test]
fn shutdown_closes_comms_and_stops_the_loop() {
    let (mut kernel, mut outbox) = kernel();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    tx.send(request(
        MessageType::ExecuteRequest,
        json!({"code": "c = comm_open(\"t\", null, null, null, \"s1\")"}),
    ))
    .unwrap();
    tx.send(request(MessageType::ShutdownRequest, json!({"restart": false})))
        .unwrap();
    tx.send(request(MessageType::KernelInfoRequest, json!({}))).unwrap();

    let handle = thread::spawn(move || {
        kernel.run(&mut rx);
        kernel
    });
    let kernel = handle.join().unwrap();

    let sent = outbox.drain();
    let close = find(&sent, "comm_close");
    assert_eq!(close.content["comm_id"], "s1");
    assert_eq!(find(&sent, "shutdown_reply").content, json!({"status": "ok", "restart": false}));
    assert!(!types(&sent).contains(&"kernel_info_reply"));
    assert!(kernel.comms().is_empty());
}
