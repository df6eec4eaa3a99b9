use std::net::TcpListener;
use std::thread;

use bytes::Bytes;
use ipclink_frame::{DataMessage, EnvelopeConfig, Opaque};
use ipclink_peer::{MessageClass, ModuleConfig, ModuleContext, ROUTER_ENV};
use ipclink_transport::{ConnectConfig, StreamKind, Target, TransportError, DEFAULT_PORT};

fn tcp_only() -> ConnectConfig {
    ConnectConfig {
        prefer_local: false,
        ..ConnectConfig::default()
    }
}

#[test]
fn connect_module_tracks_direct_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral bind should succeed");
    let port = listener
        .local_addr()
        .expect("bound socket should have an address")
        .port();

    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept should succeed");
        let payload = Bytes::from_static(b"hi");
        DataMessage::builder(MessageClass::Inform.id())
            .intent(9)
            .msg_ref(1)
            .payload(&Opaque, &payload)
            .build()
            .expect("envelope should build")
            .send(&mut stream)
            .expect("send should succeed");
    });

    let ctx = ModuleContext::new(ModuleConfig::new("tester").with_connect_config(tcp_only()));
    let conn = ctx
        .connect_module(&Target::new("127.0.0.1", port))
        .expect("connect should succeed");
    assert_eq!(conn.kind(), StreamKind::Tcp);
    assert_eq!(ctx.connection_count(), 1);
    assert!(ctx.connection(conn.id()).is_some());
    assert!(!ctx.is_connected(), "a direct peer is not the router");

    let envelope =
        DataMessage::recv_on(&conn, &EnvelopeConfig::default()).expect("envelope should arrive");
    assert_eq!(envelope.intent(), 9);
    assert_eq!(&envelope.payload()[..], b"hi");
    peer.join().expect("peer thread should not panic");

    assert!(ctx.handle_closed_connection(conn.id()));
    assert_eq!(ctx.connection_count(), 0);
    assert!(!conn.is_open());
}

#[test]
fn connect_module_refused() {
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("ephemeral bind should succeed")
        .local_addr()
        .expect("bound socket should have an address")
        .port();

    let ctx = ModuleContext::new(ModuleConfig::new("tester").with_connect_config(tcp_only()));
    let err = ctx
        .connect_module(&Target::new("127.0.0.1", port))
        .unwrap_err();
    assert!(matches!(
        err,
        ipclink_peer::PeerError::Transport(TransportError::Connect { .. })
    ));
    assert_eq!(ctx.connection_count(), 0);
}

// The only test in this binary touching the environment.
#[test]
fn router_comes_from_environment() {
    std::env::set_var(ROUTER_ENV, "central.lab:4000");
    let config = ModuleConfig::new("tester")
        .with_router_from_env()
        .expect("target should parse");
    assert_eq!(config.router, Target::new("central.lab", 4000));

    std::env::set_var(ROUTER_ENV, "central.lab");
    let config = ModuleConfig::new("tester")
        .with_router_from_env()
        .expect("target should parse");
    assert_eq!(config.router, Target::new("central.lab", DEFAULT_PORT));

    std::env::set_var(ROUTER_ENV, "central.lab:notaport");
    assert!(matches!(
        ModuleConfig::new("tester").with_router_from_env(),
        Err(TransportError::InvalidTarget(_))
    ));

    std::env::set_var(ROUTER_ENV, "  ");
    let config = ModuleConfig::new("tester")
        .with_router_from_env()
        .expect("blank value should be ignored");
    assert_eq!(config.router, Target::new("localhost", DEFAULT_PORT));

    std::env::remove_var(ROUTER_ENV);
    let config = ModuleConfig::new("tester")
        .with_router_from_env()
        .expect("unset value should be ignored");
    assert_eq!(config.router, Target::new("localhost", DEFAULT_PORT));
}
