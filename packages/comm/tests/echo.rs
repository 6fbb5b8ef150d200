//! End-to-end: the peer opens an echo comm and talks to it.

use std::sync::Arc;

use embedkern_comm::{ChannelTransport, Comm, CommConfig, CommManager, LogReporter, Outbox, Payload};
use embedkern_runtime::{required_arg, Dict, Exception, Function, Object, Runtime, RuntimeGuard};
use embedkern_wire::{Bytes, Header, JsonValue, Message, MessageType};
use serde_json::json;

fn bump(guard: &RuntimeGuard<'_>, name: &str) {
    let n = guard.get_global(name).and_then(|v| v.as_int()).unwrap_or(0);
    guard.set_global(name, n + 1);
}

/// on_msg: reply with `{"n": n + 1}`. The context is a weak handle to the comm.
fn echo_reply(
    guard: &RuntimeGuard<'_>,
    context: &Object,
    args: &[Object],
) -> Result<Object, Exception> {
    let comm = Comm::from_object(context)
        .ok_or_else(|| Exception::type_error("echo_reply needs a comm"))?;
    let record = required_arg(args, 0, "echo_reply")?;
    let n = record
        .get_item("content")
        .and_then(|content| content.get_item("data"))
        .and_then(|data| data.get_item("n"))
        .and_then(|n| n.as_int())
        .ok_or_else(|| Exception::key_error("'n'"))?;

    let data: Dict = [("n", n + 1)].into_iter().collect();
    comm.send(guard, Payload::new().with_data(data))?;
    Ok(Object::None)
}

/// factory(comm, message)
fn echo_factory(
    guard: &RuntimeGuard<'_>,
    _: &Object,
    args: &[Object],
) -> Result<Object, Exception> {
    let comm = Comm::from_object(required_arg(args, 0, "echo_factory")?)
        .ok_or_else(|| Exception::type_error("echo_factory needs a comm"))?;
    let record = required_arg(args, 1, "echo_factory")?;

    bump(guard, "factory_calls");
    guard.set_global("factory_saw_open", comm.is_open());
    guard.set_global("factory_comm_id", comm.id().as_str());
    guard.set_global(
        "factory_open_data",
        record.get_item("content").and_then(|c| c.get_item("data")),
    );

    comm.set_on_message(Function::with_context(
        "echo_reply",
        echo_reply,
        comm.downgrade().to_object(),
    ));
    Ok(Object::None)
}

/// on_msg: append the record's buffers to the `seen_buffers` global.
fn collect_buffers(
    guard: &RuntimeGuard<'_>,
    _: &Object,
    args: &[Object],
) -> Result<Object, Exception> {
    let record = required_arg(args, 0, "collect_buffers")?;
    guard.set_global("seen_buffers", record.get_item("buffers"));
    Ok(Object::None)
}

fn buffer_factory(_: &RuntimeGuard<'_>, _: &Object, args: &[Object]) -> Result<Object, Exception> {
    let comm = Comm::from_object(required_arg(args, 0, "buffer_factory")?)
        .ok_or_else(|| Exception::type_error("buffer_factory needs a comm"))?;
    comm.set_on_message(Function::new("collect_buffers", collect_buffers));
    Ok(Object::None)
}

fn setup() -> (Arc<Runtime>, CommManager, Outbox) {
    let runtime = Arc::new(Runtime::new());
    let (transport, outbox) = ChannelTransport::pair();
    let manager = CommManager::new(
        Arc::clone(&runtime),
        Arc::new(transport),
        Arc::new(LogReporter),
        CommConfig::default(),
    );
    (runtime, manager, outbox)
}

fn inbound(msg_type: MessageType, content: JsonValue) -> Message {
    Message::new(Header::new(&msg_type, "frontend", "user"), content)
}

#[test]
fn echo_roundtrip() {
    let (runtime, manager, mut outbox) = setup();
    manager.register_target("echo", Function::new("echo_factory", echo_factory));

    let open = inbound(
        MessageType::CommOpen,
        json!({"comm_id": "c1", "target_name": "echo", "data": {"n": 1}}),
    );
    manager.handle_message(&open).unwrap();
    assert!(outbox.try_recv().is_none());

    {
        let guard = runtime.enter();
        assert_eq!(guard.get_global("factory_calls"), Some(Object::Int(1)));
        assert_eq!(guard.get_global("factory_saw_open"), Some(Object::Bool(true)));
        assert_eq!(guard.get_global("factory_comm_id"), Some(Object::from("c1")));
        assert_eq!(
            guard.get_global("factory_open_data").unwrap().get_item("n"),
            Some(Object::Int(1))
        );
    }

    let msg = inbound(MessageType::CommMsg, json!({"comm_id": "c1", "data": {"n": 1}}));
    manager.handle_message(&msg).unwrap();

    let reply = outbox.try_recv().unwrap();
    assert_eq!(reply.msg_type(), MessageType::CommMsg);
    assert_eq!(reply.content, json!({"comm_id": "c1", "data": {"n": 2}}));
    assert!(reply.buffers.is_empty());
    assert_eq!(reply.parent_header["msg_id"], json!(msg.header.msg_id));
    assert!(outbox.try_recv().is_none());
}

#[test]
fn echo_keeps_per_comm_order() {
    let (_runtime, manager, mut outbox) = setup();
    manager.register_target("echo", Function::new("echo_factory", echo_factory));

    for id in ["a", "b"] {
        let open = inbound(
            MessageType::CommOpen,
            json!({"comm_id": id, "target_name": "echo", "data": {}}),
        );
        manager.handle_message(&open).unwrap();
    }
    for n in 0..10 {
        for id in ["a", "b"] {
            let msg = inbound(MessageType::CommMsg, json!({"comm_id": id, "data": {"n": n}}));
            manager.handle_message(&msg).unwrap();
        }
    }

    let replies = outbox.drain();
    assert_eq!(replies.len(), 20);
    for id in ["a", "b"] {
        let seen: Vec<i64> = replies
            .iter()
            .filter(|m| m.content["comm_id"] == id)
            .map(|m| m.content["data"]["n"].as_i64().unwrap())
            .collect();
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }
}

#[test]
fn inbound_buffers_reach_callback_in_order() {
    let (runtime, manager, _outbox) = setup();
    manager.register_target("bufs", Function::new("buffer_factory", buffer_factory));
    manager
        .handle_message(&inbound(
            MessageType::CommOpen,
            json!({"comm_id": "b1", "target_name": "bufs"}),
        ))
        .unwrap();

    let buffers = vec![
        Bytes::from_static(b"first"),
        Bytes::new(),
        Bytes::from_static(b"\x00\x00\xff"),
    ];
    let msg = inbound(MessageType::CommMsg, json!({"comm_id": "b1", "data": {}}))
        .with_buffers(buffers.clone());
    manager.handle_message(&msg).unwrap();

    let guard = runtime.enter();
    let seen = guard.get_global("seen_buffers").unwrap();
    let expected: Vec<Object> = buffers.into_iter().map(Object::Bytes).collect();
    assert_eq!(seen, Object::from(expected));
}
