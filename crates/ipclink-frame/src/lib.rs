//! Wire envelopes for ipclink.
//!
//! Every message travels as a [`DataMessage`]:
//! - a 28-byte header of seven big-endian 32-bit integers
//! - an optional class segment (routing or metadata)
//! - an optional payload segment
//!
//! The header's classifier word carries the class id together with the byte
//! order and alignment the sender used. Only byte-packed data is accepted;
//! byte order is reconciled by the [`Formatter`] at decode time.

pub mod classifier;
pub mod datamsg;
pub mod error;
pub mod formatter;
pub mod header;

pub use classifier::{Alignment, ByteOrder, Classifier, WireFormat};
pub use datamsg::{DataMessage, DataMessageBuilder, EnvelopeConfig, ReplyBuffer, DEFAULT_MAX_SEGMENT};
pub use error::{FormatError, FrameError, Result};
pub use formatter::{Formatter, Int32Array, Opaque, Text};
pub use header::{Header, HEADER_SIZE, INTENT_UNSPECIFIED, NO_REF, QUERY_REPLY_INTENT};
