//! Connection establishment and socket I/O for ipclink.
//!
//! A [`Connection`] is a duplex channel over TCP, a Unix domain socket, or
//! a pair of named pipes. [`connect`] prefers a same-host channel when the
//! target names this machine and falls back to TCP. [`ModuleListener`]
//! accepts on both at once.
//!
//! The [`io`] helpers move whole buffers through streams that return
//! short counts, and report a vanished peer as [`TransportError::BrokenPipe`]
//! or [`TransportError::Eof`].
//!
//! Unix platforms only.

pub mod config;
pub mod connect;
pub mod connection;
pub mod error;
pub mod fifo;
pub mod io;
pub mod listener;
pub mod poll;
pub mod stream;
pub mod tcp;
pub mod uds;

pub use config::{
    ConnectConfig, ListenConfig, LocalTransport, DEFAULT_LOCAL_DIR, DEFAULT_PORT,
    DEFAULT_SOCKET_BUFFER,
};
pub use connect::{connect, connect_local, hostname, is_local_host, Target};
pub use connection::{Connection, ConnectionId};
pub use error::{Result, TransportError};
pub use listener::ModuleListener;
pub use poll::wait_readable;
pub use stream::{IpcStream, StreamKind};
pub use tcp::connect_tcp;
pub use uds::UnixDomainSocket;
