use std::io::IoSlice;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::io;
use crate::stream::{IpcStream, StreamKind};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A duplex channel with separate read and write descriptors.
///
/// The read side and the write side are guarded by independent locks, so a
/// long write never stalls a concurrent reader. Holding a guard from
/// [`Connection::reader`] or [`Connection::writer`] keeps a multi-part
/// message contiguous on the wire.
///
/// Once [`invalidate`](Connection::invalidate)d, a connection refuses all
/// further I/O and a fresh one has to be established. Socket readers blocked
/// at that moment wake up. Pipes cannot be shut down, so a thread blocked
/// reading a pipe connection stays blocked until the peer closes its end.
pub struct Connection {
    id: ConnectionId,
    kind: StreamKind,
    peer: String,
    read_fd: RawFd,
    write_fd: RawFd,
    reader: Mutex<IpcStream>,
    writer: Mutex<IpcStream>,
    /// Unlocked handle on the socket, used to shut it down under a blocked reader.
    control: Option<IpcStream>,
    open: AtomicBool,
}

impl Connection {
    /// Wrap a bidirectional socket. The write side gets a duplicated descriptor.
    pub fn from_socket(stream: IpcStream, peer: impl Into<String>) -> Result<Self> {
        let writer = stream.try_clone()?;
        let control = stream.try_clone()?;
        let mut conn = Self::from_halves(stream, writer, peer);
        conn.control = Some(control);
        Ok(conn)
    }

    /// Build a connection from distinct read and write streams (pipe pairs).
    pub fn from_halves(reader: IpcStream, writer: IpcStream, peer: impl Into<String>) -> Self {
        let conn = Self {
            id: ConnectionId::next(),
            kind: reader.kind(),
            peer: peer.into(),
            read_fd: reader.as_raw_fd(),
            write_fd: writer.as_raw_fd(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            control: None,
            open: AtomicBool::new(true),
        };
        debug!(
            connection = %conn.id,
            kind = conn.kind.as_str(),
            peer = %conn.peer,
            "connection established"
        );
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Human-readable description of the remote end.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Lock the read side for the duration of one logical message.
    pub fn reader(&self) -> Result<MutexGuard<'_, IpcStream>> {
        self.ensure_open()?;
        Ok(self.reader.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Like [`reader`](Self::reader), but `None` while another thread holds
    /// the read side.
    pub fn try_reader(&self) -> Result<Option<MutexGuard<'_, IpcStream>>> {
        self.ensure_open()?;
        match self.reader.try_lock() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::Poisoned(poisoned)) => Ok(Some(poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => Ok(None),
        }
    }

    /// Lock the write side for the duration of one logical message.
    pub fn writer(&self) -> Result<MutexGuard<'_, IpcStream>> {
        self.ensure_open()?;
        Ok(self.writer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        io::read_exact(&mut *self.reader()?, buf)
    }

    pub fn read_exact_scattered(&self, first: &mut [u8], second: &mut [u8]) -> Result<()> {
        io::read_exact_scattered(&mut *self.reader()?, first, second)
    }

    pub fn write_all(&self, buf: &[u8]) -> Result<()> {
        io::write_all(&mut *self.writer()?, buf)
    }

    pub fn write_vectored(&self, segments: Vec<IoSlice<'_>>, expected: usize) -> Result<()> {
        io::write_vectored(&mut *self.writer()?, segments, expected)
    }

    /// Mark the connection dead and shut its socket down.
    ///
    /// Blocked socket readers wake with end-of-stream; pipe readers do not.
    /// Returns `false` if the connection had already been invalidated.
    pub fn invalidate(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(control) = &self.control {
            if let Err(err) = control.shutdown() {
                debug!(connection = %self.id, %err, "socket shutdown failed");
            }
        }
        debug!(connection = %self.id, "connection invalidated");
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TransportError::Closed(self.id.to_string()))
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("peer", &self.peer)
            .field("read_fd", &self.read_fd)
            .field("write_fd", &self.write_fd)
            .field("open", &self.is_open())
            .finish()
    }
}
