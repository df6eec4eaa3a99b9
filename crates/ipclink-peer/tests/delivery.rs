use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ipclink_frame::{
    DataMessage, EnvelopeConfig, FormatError, FrameError, Int32Array, Text, NO_REF,
};
use ipclink_peer::{
    MessageClass, MessageDef, ModuleConfig, ModuleContext, Outcome, PeerError, SendRequest,
};
use ipclink_transport::{wait_readable, Connection};

fn pair() -> (Connection, Connection) {
    let (a, b) = UnixStream::pair().expect("socket pair should open");
    (
        Connection::from_socket(a.into(), "pair:near").expect("connection should wrap"),
        Connection::from_socket(b.into(), "pair:far").expect("connection should wrap"),
    )
}

fn ints(values: &[i32]) -> Bytes {
    values
        .iter()
        .flat_map(|v| v.to_ne_bytes())
        .collect::<Vec<u8>>()
        .into()
}

fn recv(conn: &Connection) -> DataMessage {
    DataMessage::recv_on(conn, &EnvelopeConfig::default()).expect("envelope should arrive")
}

fn is_quiet(conn: &Connection) -> bool {
    wait_readable(&[conn.read_fd()], Some(Duration::from_millis(50)))
        .expect("poll should succeed")
        .is_none()
}

fn context_with_router() -> (ModuleContext, Connection) {
    let ctx = ModuleContext::new(ModuleConfig::new("tester"));
    let (near, far) = pair();
    ctx.attach_router(near);
    (ctx, far)
}

#[test]
fn router_delivery_uses_message_id_as_intent() {
    let (ctx, router) = context_with_router();
    ctx.register_message(
        MessageDef::new("position", 17, MessageClass::Inform).with_msg_format(Arc::new(Int32Array)),
    );

    let payload = ints(&[4, 5, 6]);
    let msg_ref = ctx
        .send_message(SendRequest::new("position").payload(&payload))
        .expect("send should succeed");

    let envelope = recv(&router);
    assert_eq!(envelope.intent(), 17);
    assert_eq!(envelope.msg_ref(), msg_ref);
    assert_eq!(envelope.dispatch_ref(), NO_REF);
    assert_eq!(envelope.class_id(), MessageClass::Inform.id());
    assert_eq!(
        envelope
            .decode_payload(&Int32Array)
            .expect("decode should succeed"),
        Some(payload)
    );
}

#[test]
fn reference_id_goes_out_as_dispatch_ref() {
    let (ctx, router) = context_with_router();
    ctx.register_message(MessageDef::new("goal", 2, MessageClass::Goal));
    let handle = ctx.create_reference(None, Some("goal"), 55);

    ctx.send_message(SendRequest::new("goal").reference(handle).preallocated_ref(900))
        .expect("send should succeed");

    let envelope = recv(&router);
    assert_eq!(envelope.dispatch_ref(), 55);
    assert_eq!(envelope.msg_ref(), 900);
    assert!(!envelope.has_payload());
}

#[test]
fn parent_ref_goes_out_on_every_send() {
    let (ctx, router) = context_with_router();
    ctx.register_message(MessageDef::new("goal", 2, MessageClass::Goal));
    assert_eq!(ctx.parent_ref(), NO_REF);

    ctx.send_message(SendRequest::new("goal"))
        .expect("send should succeed");
    assert_eq!(recv(&router).parent_ref(), NO_REF);

    ctx.set_parent_ref(314);
    assert_eq!(ctx.parent_ref(), 314);
    ctx.send_message(SendRequest::new("goal"))
        .expect("send should succeed");
    assert_eq!(recv(&router).parent_ref(), 314);
}

#[test]
fn class_format_applies_to_its_class_only() {
    let (ctx, router) = context_with_router();
    ctx.register_message(MessageDef::new("position", 17, MessageClass::Inform));
    ctx.register_message(MessageDef::new("goal", 2, MessageClass::Goal));
    ctx.set_class_format(MessageClass::Inform, Arc::new(Text));

    let class = Bytes::from_static(b"arm");
    ctx.send_message(SendRequest::new("position").class_data(&class))
        .expect("send should succeed");
    let formatted = recv(&router);
    assert_eq!(formatted.header().class_total, 4 + 3);
    assert_eq!(&formatted.class_data()[..4], &3u32.to_ne_bytes());
    let decoded = formatted
        .decode_class(&Text)
        .expect("class should decode")
        .expect("class should be present");
    assert_eq!(&decoded[..], b"arm");

    ctx.send_message(SendRequest::new("goal").class_data(&class))
        .expect("send should succeed");
    let raw = recv(&router);
    assert_eq!(&raw.class_data()[..], b"arm");
}

#[test]
fn send_without_router_fails() {
    let ctx = ModuleContext::new(ModuleConfig::default());
    ctx.register_message(MessageDef::new("goal", 2, MessageClass::Goal));
    let result = ctx.send_message(SendRequest::new("goal"));
    assert!(matches!(result, Err(PeerError::NotConnected)));
    assert_eq!(Outcome::of(&result), Outcome::Failure);
}

#[test]
fn undefined_message_is_reported() {
    let (ctx, router) = context_with_router();
    let result = ctx.send_message(SendRequest::new("nobody"));
    assert_eq!(Outcome::of(&result), Outcome::MsgUndefined);
    assert!(is_quiet(&router));
}

#[test]
fn encode_failure_writes_nothing() {
    let (ctx, router) = context_with_router();
    ctx.register_message(
        MessageDef::new("ints", 8, MessageClass::Command).with_msg_format(Arc::new(Int32Array)),
    );

    let bad = Bytes::from_static(b"12345");
    let err = ctx
        .send_message(SendRequest::new("ints").payload(&bad))
        .unwrap_err();
    assert!(matches!(
        err,
        PeerError::Frame(FrameError::Format(FormatError::Misaligned { len: 5, unit: 4 }))
    ));
    assert!(is_quiet(&router));
}

#[test]
fn broken_pipe_skips_only_the_dead_handler() {
    let (ctx, router) = context_with_router();
    ctx.register_message(MessageDef::new("tick", 30, MessageClass::Broadcast).with_direct(true));

    let (live_near, live_far) = pair();
    let (dead_near, dead_far) = pair();
    let live = ctx.add_connection(live_near);
    let dead = ctx.add_connection(dead_near);
    drop(dead_far);

    ctx.add_direct_handler("tick", live.clone(), 10)
        .expect("handler should register");
    ctx.add_direct_handler("tick", dead.clone(), 11)
        .expect("handler should register");
    ctx.add_direct_handler("tick", live.clone(), 12)
        .expect("handler should register");

    let payload = Bytes::from_static(b"beat");
    let result = ctx.send_message(SendRequest::new("tick").payload(&payload));
    assert_eq!(Outcome::of(&result), Outcome::Success);

    // Last registered first.
    assert_eq!(recv(&live_far).intent(), 12);
    assert_eq!(recv(&live_far).intent(), 10);

    assert!(!dead.is_open());
    assert!(ctx.connection(dead.id()).is_none());
    assert!(ctx.connection(live.id()).is_some());
    assert!(is_quiet(&router));

    // The dead handler is skipped from now on.
    ctx.send_message(SendRequest::new("tick").payload(&payload))
        .expect("second send should succeed");
    assert_eq!(recv(&live_far).intent(), 12);
    assert_eq!(recv(&live_far).intent(), 10);
}

#[test]
fn untracked_broken_connection_fails_the_send() {
    let (ctx, _router) = context_with_router();
    ctx.register_message(MessageDef::new("tick", 30, MessageClass::Broadcast).with_direct(true));

    let (near, far) = pair();
    drop(far);
    // Never added to the connection table.
    ctx.add_direct_handler("tick", Arc::new(near), 10)
        .expect("handler should register");

    let err = ctx.send_message(SendRequest::new("tick")).unwrap_err();
    assert!(err.is_broken_pipe());
}

#[test]
fn all_handlers_dead_falls_back_to_router() {
    let (ctx, router) = context_with_router();
    ctx.register_message(MessageDef::new("tick", 30, MessageClass::Broadcast).with_direct(true));

    let (near, far) = pair();
    let conn = ctx.add_connection(near);
    drop(far);
    ctx.add_direct_handler("tick", conn, 10)
        .expect("handler should register");

    ctx.send_message(SendRequest::new("tick"))
        .expect("send should succeed");
    assert!(is_quiet(&router));

    ctx.send_message(SendRequest::new("tick"))
        .expect("send should succeed");
    assert_eq!(recv(&router).intent(), 30);
}
