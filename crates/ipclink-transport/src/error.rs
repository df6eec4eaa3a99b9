use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a listener.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to establish a connection to the given target.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// Host name resolution failed.
    #[error("failed to resolve host {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    /// A `host` or `host:port` target could not be parsed.
    #[error("invalid target {0:?} (expected host or host:port)")]
    InvalidTarget(String),

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The peer closed the stream before the requested bytes arrived.
    #[error("connection closed after {received} of {expected} bytes")]
    Eof { expected: usize, received: usize },

    /// A read deadline passed before the requested bytes arrived.
    #[error("timed out after {received} of {expected} bytes")]
    TimedOut { expected: usize, received: usize },

    /// The peer went away while we were writing.
    #[error("pipe broken")]
    BrokenPipe,

    /// The stream accepted zero bytes on a non-empty write.
    #[error("stream accepted no bytes")]
    WriteZero,

    /// Segment lengths handed to a vectored write disagree with the expected total.
    #[error("internal error: segment lengths sum to {actual}, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The connection has been invalidated and can no longer be used.
    #[error("connection {0} is closed")]
    Closed(String),
}

impl TransportError {
    /// True when the error means the peer is gone (clean close or broken pipe).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Eof { .. } | Self::BrokenPipe | Self::WriteZero | Self::Closed(_)
        )
    }

    /// True when a read gave up at its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
