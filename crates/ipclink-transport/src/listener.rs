use std::net::TcpListener;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::{ListenConfig, LocalTransport};
use crate::connection::Connection;
use crate::error::Result;
use crate::fifo::FifoListener;
use crate::poll::wait_readable;
use crate::tcp::{accept_tcp, listen_tcp};
use crate::uds::UnixDomainSocket;

enum LocalListener {
    Unix(UnixDomainSocket),
    Fifo(FifoListener),
}

/// Accepts module connections on one port, over TCP and (optionally) the
/// same-host channel published for that port.
pub struct ModuleListener {
    tcp: TcpListener,
    local: Option<LocalListener>,
    port: u16,
}

impl ModuleListener {
    /// Bind `port` (0 for an ephemeral port).
    ///
    /// The same-host endpoint is published for the port actually bound. If
    /// it cannot be created the listener stays TCP-only; clients then fall
    /// back to TCP on their own.
    pub fn bind(port: u16, config: &ListenConfig) -> Result<Self> {
        let tcp = listen_tcp(port, config)?;
        let port = tcp.local_addr()?.port();

        let local = if config.local {
            let bound = match config.local_transport {
                LocalTransport::UnixSocket => {
                    UnixDomainSocket::bind_port(port, config).map(LocalListener::Unix)
                }
                LocalTransport::Fifo => FifoListener::bind_port(port, config).map(LocalListener::Fifo),
            };
            match bound {
                Ok(local) => Some(local),
                Err(err) => {
                    warn!(port, %err, "same-host endpoint unavailable; tcp only");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self { tcp, local, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path of the same-host endpoint, if one was published.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.local {
            Some(LocalListener::Unix(uds)) => Some(uds.path()),
            Some(LocalListener::Fifo(fifo)) => Some(fifo.path()),
            None => None,
        }
    }

    /// Accept the next connection from either endpoint (blocking).
    pub fn accept(&self) -> Result<Connection> {
        loop {
            if let Some(conn) = self.accept_timeout(None)? {
                return Ok(conn);
            }
        }
    }

    /// Accept the next connection, giving up after `timeout`.
    pub fn accept_timeout(&self, timeout: Option<Duration>) -> Result<Option<Connection>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut fds = vec![self.tcp.as_raw_fd()];
        match &self.local {
            Some(LocalListener::Unix(uds)) => fds.push(uds.listener().as_raw_fd()),
            Some(LocalListener::Fifo(fifo)) => fds.push(fifo.accept_file().as_raw_fd()),
            None => {}
        }

        loop {
            // Requests already buffered from the accept pipe no longer wake poll.
            if let Some(LocalListener::Fifo(fifo)) = &self.local {
                if let Some(conn) = accept_pipe(fifo) {
                    return Ok(Some(conn));
                }
            }

            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match wait_readable(&fds, left)? {
                None => return Ok(None),
                Some(0) => return accept_tcp(&self.tcp).map(Some),
                Some(_) => match &self.local {
                    Some(LocalListener::Unix(uds)) => return uds.accept().map(Some),
                    Some(LocalListener::Fifo(_)) => {
                        if deadline.is_some_and(|d| Instant::now() >= d) {
                            return Ok(None);
                        }
                    }
                    None => return Ok(None),
                },
            }
        }
    }
}

/// One failed pipe handshake must not take the listener down.
fn accept_pipe(fifo: &FifoListener) -> Option<Connection> {
    match fifo.try_accept() {
        Ok(conn) => conn,
        Err(err) => {
            warn!(path = ?fifo.path(), %err, "pipe handshake failed");
            None
        }
    }
}
