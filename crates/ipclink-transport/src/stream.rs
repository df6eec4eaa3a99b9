use std::fs::File;
use std::io::{IoSlice, IoSliceMut, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use crate::error::Result;

/// Which kind of descriptor backs an [`IpcStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Tcp,
    Unix,
    /// One direction of a named pipe pair.
    Pipe,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Tcp => "tcp",
            StreamKind::Unix => "unix",
            StreamKind::Pipe => "pipe",
        }
    }
}

/// A connected byte stream: TCP, Unix domain socket, or one end of a FIFO.
///
/// Sockets are bidirectional. A pipe stream is only readable or only
/// writable, depending on how it was opened.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    Tcp(TcpStream),
    Unix(UnixStream),
    Pipe(File),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.read(buf),
            IpcStreamInner::Unix(stream) => stream.read(buf),
            IpcStreamInner::Pipe(file) => file.read(buf),
        }
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.read_vectored(bufs),
            IpcStreamInner::Unix(stream) => stream.read_vectored(bufs),
            IpcStreamInner::Pipe(file) => file.read_vectored(bufs),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.write(buf),
            IpcStreamInner::Unix(stream) => stream.write(buf),
            IpcStreamInner::Pipe(file) => file.write(buf),
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> std::io::Result<usize> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.write_vectored(bufs),
            IpcStreamInner::Unix(stream) => stream.write_vectored(bufs),
            IpcStreamInner::Pipe(file) => file.write_vectored(bufs),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            IpcStreamInner::Tcp(stream) => stream.flush(),
            IpcStreamInner::Unix(stream) => stream.flush(),
            IpcStreamInner::Pipe(file) => file.flush(),
        }
    }
}

impl IpcStream {
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: IpcStreamInner::Tcp(stream),
        }
    }

    pub fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    pub fn from_pipe(file: File) -> Self {
        Self {
            inner: IpcStreamInner::Pipe(file),
        }
    }

    pub fn kind(&self) -> StreamKind {
        match &self.inner {
            IpcStreamInner::Tcp(_) => StreamKind::Tcp,
            IpcStreamInner::Unix(_) => StreamKind::Unix,
            IpcStreamInner::Pipe(_) => StreamKind::Pipe,
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            IpcStreamInner::Tcp(stream) => IpcStreamInner::Tcp(stream.try_clone()?),
            IpcStreamInner::Unix(stream) => IpcStreamInner::Unix(stream.try_clone()?),
            IpcStreamInner::Pipe(file) => IpcStreamInner::Pipe(file.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Shut down both directions of a socket, waking any blocked reader.
    ///
    /// Pipes have no shutdown; the descriptor closes when the stream drops.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            IpcStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both),
            IpcStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both),
            IpcStreamInner::Pipe(_) => Ok(()),
        };
        match result {
            Err(err) if err.kind() != std::io::ErrorKind::NotConnected => Err(err.into()),
            _ => Ok(()),
        }
    }
}

impl AsRawFd for IpcStream {
    fn as_raw_fd(&self) -> RawFd {
        match &self.inner {
            IpcStreamInner::Tcp(stream) => stream.as_raw_fd(),
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
            IpcStreamInner::Pipe(file) => file.as_raw_fd(),
        }
    }
}

impl From<TcpStream> for IpcStream {
    fn from(stream: TcpStream) -> Self {
        Self::from_tcp(stream)
    }
}

impl From<UnixStream> for IpcStream {
    fn from(stream: UnixStream) -> Self {
        Self::from_unix(stream)
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.kind().as_str())
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}
