use crate::classifier::ByteOrder;

/// Errors reported by a [`Formatter`](crate::formatter::Formatter).
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Data length is not a whole number of elements.
    #[error("{len} bytes is not a multiple of the {unit}-byte element size")]
    Misaligned { len: usize, unit: usize },

    /// Encoded data ends before the declared content.
    #[error("truncated data: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Text payload is not valid UTF-8.
    #[error("text is not valid UTF-8")]
    InvalidText,

    /// A formatter wrote a different number of bytes than it sized.
    #[error("formatter {formatter} produced {actual} bytes but sized {expected}")]
    SizeMismatch {
        formatter: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The sender's byte order cannot be translated.
    #[error("cannot decode data written in {0:?} byte order")]
    UnsupportedByteOrder(ByteOrder),
}

/// Errors that can occur while building, sending or receiving envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The envelope carries data laid out with a non-packed alignment.
    #[error("unsupported alignment {0:#04x} (only packed data is accepted)")]
    UnsupportedAlignment(u8),

    /// A header announces a segment larger than the configured limit.
    #[error("{segment} segment too large ({size} bytes, max {max})")]
    SegmentTooLarge {
        segment: &'static str,
        size: usize,
        max: usize,
    },

    /// Encoding or decoding a segment failed.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ipclink_transport::TransportError),
}

impl FrameError {
    /// True when the peer closed the stream or went away mid-write.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_disconnect())
    }

    /// True when a read stopped at its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_timeout())
    }

    /// True for a write that failed because the peer is gone.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(
            self,
            Self::Transport(ipclink_transport::TransportError::BrokenPipe)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
