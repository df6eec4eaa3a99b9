use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info};

use crate::config::{ConnectConfig, ListenConfig};
use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Resolve `host` to a socket address.
///
/// A host starting with a digit is parsed as a dotted IPv4 address without
/// any lookup. Otherwise the system resolver is asked, preferring IPv4.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let resolve_err = |source: std::io::Error| TransportError::Resolve {
        host: host.to_string(),
        source,
    };

    if host.starts_with(|c: char| c.is_ascii_digit()) {
        let ip: Ipv4Addr = host.parse().map_err(|_| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid numeric address",
            ))
        })?;
        return Ok(SocketAddr::from((ip, port)));
    }

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses for host",
            ))
        })
}

/// Open a TCP connection with `TCP_NODELAY` and tuned buffers.
///
/// The options are applied before `connect`. Any failure drops the socket,
/// so no half-configured connection escapes.
pub fn connect_tcp(host: &str, port: u16, config: &ConnectConfig) -> Result<Connection> {
    let addr = resolve(host, port)?;
    let connect_err = |source: std::io::Error| TransportError::Connect {
        target: format!("{host}:{port}"),
        source,
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(connect_err)?;
    socket.set_reuse_address(true).map_err(connect_err)?;
    socket.set_tcp_nodelay(true).map_err(connect_err)?;
    socket
        .set_send_buffer_size(config.tcp_buffer_size)
        .map_err(connect_err)?;
    socket
        .set_recv_buffer_size(config.tcp_buffer_size)
        .map_err(connect_err)?;
    socket.connect(&SockAddr::from(addr)).map_err(connect_err)?;

    let stream = TcpStream::from(socket);
    debug!(%addr, "connected over tcp");
    Connection::from_socket(IpcStream::from_tcp(stream), format!("tcp://{addr}"))
}

/// Bind a TCP listener on all interfaces.
///
/// Port 0 picks an ephemeral port; read it back with `local_addr`.
pub fn listen_tcp(port: u16, config: &ListenConfig) -> Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let bind_err = |source: std::io::Error| TransportError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket =
        Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_tcp_nodelay(true).map_err(bind_err)?;
    socket
        .set_send_buffer_size(config.tcp_buffer_size)
        .map_err(bind_err)?;
    socket
        .set_recv_buffer_size(config.tcp_buffer_size)
        .map_err(bind_err)?;
    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
    socket.listen(config.backlog).map_err(bind_err)?;

    let listener = TcpListener::from(socket);
    let bound = listener.local_addr()?;
    info!(port = bound.port(), "listening on tcp");
    Ok(listener)
}

/// Accept one TCP connection and wrap it.
pub fn accept_tcp(listener: &TcpListener) -> Result<Connection> {
    let (stream, peer) = listener.accept().map_err(TransportError::Accept)?;
    stream.set_nodelay(true)?;
    debug!(%peer, "accepted tcp connection");
    Connection::from_socket(IpcStream::from_tcp(stream), format!("tcp://{peer}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_host_skips_lookup() {
        let addr = resolve("127.0.0.1", 9999).expect("numeric address should parse");
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9999)));
    }

    #[test]
    fn bad_numeric_host_is_resolve_error() {
        let err = resolve("10.0.0.999", 1).unwrap_err();
        assert!(matches!(err, TransportError::Resolve { .. }));
    }

    #[test]
    fn ephemeral_port_is_read_back() {
        let listener = listen_tcp(0, &ListenConfig::default()).expect("listener should bind");
        let port = listener.local_addr().expect("addr should exist").port();
        assert_ne!(port, 0);

        let client = std::thread::spawn(move || {
            connect_tcp("127.0.0.1", port, &ConnectConfig::default())
        });
        let server = accept_tcp(&listener).expect("accept should succeed");
        let client = client
            .join()
            .expect("client thread should not panic")
            .expect("client should connect");

        client.write_all(b"ping").expect("write should succeed");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).expect("read should succeed");
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let listener = listen_tcp(0, &ListenConfig::default()).expect("listener should bind");
        let port = listener.local_addr().expect("addr should exist").port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port, &ConnectConfig::default()).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
