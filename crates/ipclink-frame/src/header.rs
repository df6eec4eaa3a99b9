use bytes::{Buf, BufMut};

use crate::classifier::Classifier;

/// Fixed header: seven big-endian 32-bit integers.
pub const HEADER_SIZE: usize = 28;

/// Correlation id meaning "no reference".
pub const NO_REF: i32 = -1;

/// Intent for messages that carry no specific delivery intent.
pub const INTENT_UNSPECIFIED: i32 = -1;

/// Intent marking a reply to a directly delivered query.
pub const QUERY_REPLY_INTENT: i32 = -4;

/// Envelope header in host representation.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬────────────┬────────┬────────────┬──────────────┬─────────┐
/// │ class_total│ msg_total │ parent_ref │ intent │ classifier │ dispatch_ref │ msg_ref │
/// │ (4B BE)    │ (4B BE)   │ (4B BE)    │ (4B BE)│ (4B BE)    │ (4B BE)      │ (4B BE) │
/// └────────────┴───────────┴────────────┴────────┴────────────┴──────────────┴─────────┘
/// ```
/// followed by `class_total` class bytes, then `msg_total` payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub class_total: u32,
    pub msg_total: u32,
    pub parent_ref: i32,
    pub intent: i32,
    pub classifier: i32,
    pub dispatch_ref: i32,
    pub msg_ref: i32,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut dst = &mut out[..];
        dst.put_u32(self.class_total);
        dst.put_u32(self.msg_total);
        dst.put_i32(self.parent_ref);
        dst.put_i32(self.intent);
        dst.put_i32(self.classifier);
        dst.put_i32(self.dispatch_ref);
        dst.put_i32(self.msg_ref);
        out
    }

    pub fn decode(src: &[u8; HEADER_SIZE]) -> Self {
        let mut src = &src[..];
        Self {
            class_total: src.get_u32(),
            msg_total: src.get_u32(),
            parent_ref: src.get_i32(),
            intent: src.get_i32(),
            classifier: src.get_i32(),
            dispatch_ref: src.get_i32(),
            msg_ref: src.get_i32(),
        }
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::unpack(self.classifier)
    }

    /// Header plus both segments.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.class_total as usize + self.msg_total as usize
    }
}
