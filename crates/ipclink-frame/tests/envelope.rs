use std::io::Cursor;
use std::net::TcpListener;
use std::os::unix::net::UnixStream;

use bytes::Bytes;
use ipclink_frame::{
    Alignment, ByteOrder, Classifier, DataMessage, EnvelopeConfig, Header, Int32Array, Opaque,
    Text, HEADER_SIZE, INTENT_UNSPECIFIED, NO_REF,
};
use ipclink_transport::{connect_tcp, io, ConnectConfig, Connection, StreamKind};
use proptest::prelude::*;

fn put_u32(out: &mut Vec<u8>, value: u32, order: ByteOrder) {
    match order {
        ByteOrder::Big => out.extend_from_slice(&value.to_be_bytes()),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// Wire bytes as a sender with byte order `order` would produce them.
fn foreign_wire(order: ByteOrder, class_id: u16, text: &str, ints: &[i32], msg_ref: i32) -> Vec<u8> {
    let mut class = Vec::new();
    put_u32(&mut class, text.len() as u32, order);
    class.extend_from_slice(text.as_bytes());

    let mut payload = Vec::new();
    for value in ints {
        put_u32(&mut payload, *value as u32, order);
    }

    let header = Header {
        class_total: class.len() as u32,
        msg_total: payload.len() as u32,
        parent_ref: 9,
        intent: INTENT_UNSPECIFIED,
        classifier: Classifier {
            class_id,
            data_order: order,
            class_order: order,
            alignment: Alignment::Packed,
        }
        .pack(),
        dispatch_ref: NO_REF,
        msg_ref,
    };

    let mut wire = header.to_bytes().to_vec();
    wire.extend_from_slice(&class);
    wire.extend_from_slice(&payload);
    wire
}

fn native_ints(values: &[i32]) -> Bytes {
    values
        .iter()
        .flat_map(|v| v.to_ne_bytes())
        .collect::<Vec<u8>>()
        .into()
}

#[test]
fn tcp_scenario_header_then_payload() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let port = listener
        .local_addr()
        .expect("listener should have an address")
        .port();

    let client = std::thread::spawn(move || {
        let conn = connect_tcp("127.0.0.1", port, &ConnectConfig::default())
            .expect("client should connect");
        assert_eq!(conn.kind(), StreamKind::Tcp);
        let payload = Bytes::from_static(b"ten bytes!");
        let msg = DataMessage::builder(42)
            .intent(INTENT_UNSPECIFIED)
            .payload(&Opaque, &payload)
            .build()
            .expect("build should succeed");
        msg.send_on(&conn).expect("send should succeed");
        msg.send_on(&conn).expect("second send should succeed");
    });

    let (mut stream, _) = listener.accept().expect("accept should succeed");

    let mut raw = [0u8; HEADER_SIZE];
    io::read_exact(&mut stream, &mut raw).expect("header should arrive");
    let header = Header::decode(&raw);
    assert_eq!(header.class_total, 0);
    assert_eq!(header.msg_total, 10);
    assert_eq!(header.intent, -1);
    assert_eq!(header.classifier as u32 & 0xFFFF, 42);

    let mut payload = vec![0u8; header.msg_total as usize];
    io::read_exact(&mut stream, &mut payload).expect("payload should arrive");
    assert_eq!(&payload, b"ten bytes!");

    let second = DataMessage::recv(&mut stream, &EnvelopeConfig::default())
        .expect("second envelope should decode");
    assert_eq!(second.class_id(), 42);
    assert_eq!(
        second
            .decode_payload(&Opaque)
            .expect("decode should succeed")
            .expect("payload should be present"),
        Bytes::from_static(b"ten bytes!")
    );

    client.join().expect("client thread should not panic");
}

#[test]
fn connection_round_trip_over_socket_pair() {
    let (a, b) = UnixStream::pair().expect("socket pair should open");
    let a = Connection::from_socket(a.into(), "pair:a").expect("connection should wrap");
    let b = Connection::from_socket(b.into(), "pair:b").expect("connection should wrap");

    let payload = native_ints(&[7, 8, 9]);
    let class = Bytes::from_static(b"ipc_ref_status_query");
    let msg = DataMessage::builder(13)
        .parent_ref(1)
        .dispatch_ref(2)
        .msg_ref(3)
        .payload(&Int32Array, &payload)
        .class_data(&Text, &class)
        .build()
        .expect("build should succeed");
    msg.send_on(&a).expect("send should succeed");

    let received = DataMessage::recv_on(&b, &EnvelopeConfig::default()).expect("recv should succeed");
    assert_eq!(received, msg);
}

#[test]
fn foreign_sender_decodes_to_host_values() {
    let foreign = match ByteOrder::host() {
        ByteOrder::Little => ByteOrder::Big,
        _ => ByteOrder::Little,
    };
    let wire = foreign_wire(foreign, 77, "route", &[1, -1, 0x0102_0304], 5);
    let msg = DataMessage::recv(&mut Cursor::new(wire), &EnvelopeConfig::default())
        .expect("recv should succeed");

    assert_eq!(msg.wire_format().byte_order, foreign);
    let ints = msg
        .decode_payload(&Int32Array)
        .expect("decode should succeed")
        .expect("payload should be present");
    assert_eq!(ints, native_ints(&[1, -1, 0x0102_0304]));
    let class = msg
        .decode_class(&Text)
        .expect("decode should succeed")
        .expect("class should be present");
    assert_eq!(&class[..], b"route");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn envelope_round_trip_any_sizes(
        text in "[a-z_]{0,3000}",
        ints in proptest::collection::vec(any::<i32>(), 0..20_000),
        big_sender in any::<bool>(),
        class_id in any::<u16>(),
        msg_ref in any::<i32>(),
    ) {
        let order = if big_sender { ByteOrder::Big } else { ByteOrder::Little };
        let wire = foreign_wire(order, class_id, &text, &ints, msg_ref);
        let msg = DataMessage::recv(&mut Cursor::new(wire), &EnvelopeConfig::default())
            .expect("recv should succeed");

        prop_assert_eq!(msg.class_id(), class_id);
        prop_assert_eq!(msg.msg_ref(), msg_ref);
        prop_assert_eq!(msg.parent_ref(), 9);
        prop_assert_eq!(msg.header().class_total as usize, 4 + text.len());
        prop_assert_eq!(msg.header().msg_total as usize, ints.len() * 4);

        let decoded = msg.decode_payload(&Int32Array).expect("decode should succeed");
        prop_assert_eq!(decoded.unwrap_or_default(), native_ints(&ints));
        let class = msg
            .decode_class(&Text)
            .expect("decode should succeed")
            .expect("class should be present");
        prop_assert_eq!(&class[..], text.as_bytes());
    }
}
