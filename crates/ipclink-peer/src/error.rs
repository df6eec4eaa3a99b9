use std::time::Duration;

use crate::reference::RefHandle;

/// Errors that can occur in module operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ipclink_transport::TransportError),

    /// Envelope encode/decode error.
    #[error("frame error: {0}")]
    Frame(#[from] ipclink_frame::FrameError),

    /// No connection to the router has been established.
    #[error("not connected to the router")]
    NotConnected,

    /// A message name with no registered definition.
    #[error("message {0:?} is not defined")]
    UndefinedMessage(String),

    /// The handle was released, or never issued by this context.
    #[error("reference {0:?} has been released")]
    StaleReference(RefHandle),

    /// A reference with neither a bound message nor a name.
    #[error("badly formed reference {0}")]
    BadReference(i32),

    /// The message definition carries no format for the requested data.
    #[error("message {0:?} has no data format")]
    NoFormat(String),

    /// No reply arrived before the deadline.
    #[error("no reply after {0:?}")]
    Timeout(Duration),

    /// The reply arrived with an empty payload.
    #[error("null reply")]
    NullReply,
}

impl PeerError {
    /// True for a write that failed because the peer is gone.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            Self::Transport(err) => matches!(err, ipclink_transport::TransportError::BrokenPipe),
            Self::Frame(err) => err.is_broken_pipe(),
            _ => false,
        }
    }

    /// True when the peer closed or vanished.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_disconnect(),
            Self::Frame(err) => err.is_disconnect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;

/// What a caller is told about an operation.
///
/// The detailed [`PeerError`] goes to the log; callers that only need to
/// decide what to do next match on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    TimedOut,
    NullReply,
    MsgUndefined,
}

impl Outcome {
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(PeerError::Timeout(_)) => Self::TimedOut,
            Err(PeerError::NullReply) => Self::NullReply,
            Err(PeerError::UndefinedMessage(_)) => Self::MsgUndefined,
            Err(_) => Self::Failure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::TimedOut => "timed out",
            Self::NullReply => "null reply",
            Self::MsgUndefined => "message undefined",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
