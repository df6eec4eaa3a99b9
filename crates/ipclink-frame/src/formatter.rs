//! Pluggable payload marshalling.
//!
//! A [`Formatter`] converts between a value's in-memory bytes and the packed
//! bytes that travel in an envelope segment. Envelopes only call it at their
//! boundary; they never look inside the formatted bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::classifier::ByteOrder;
use crate::error::FormatError;

type Result<T> = std::result::Result<T, FormatError>;

/// Sizes, encodes and decodes one kind of value.
pub trait Formatter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Exact number of bytes [`encode`](Formatter::encode) will produce.
    fn wire_size(&self, value: &Bytes) -> Result<usize>;

    /// Produce packed wire bytes in this host's byte order.
    fn encode(&self, value: &Bytes) -> Result<Bytes>;

    /// Translate wire bytes written in `order` back to the in-memory form.
    fn decode(&self, wire: Bytes, order: ByteOrder) -> Result<Bytes>;

    /// In-memory and packed wire forms are identical.
    ///
    /// Encoding then shares the caller's buffer, and decoding data that is
    /// already in host order returns the received buffer untouched.
    fn is_fixed_flat(&self) -> bool {
        false
    }
}

/// Uninterpreted bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Opaque;

impl Formatter for Opaque {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn wire_size(&self, value: &Bytes) -> Result<usize> {
        Ok(value.len())
    }

    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn decode(&self, wire: Bytes, _order: ByteOrder) -> Result<Bytes> {
        Ok(wire)
    }

    fn is_fixed_flat(&self) -> bool {
        true
    }
}

/// A packed array of 32-bit integers in native layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int32Array;

impl Formatter for Int32Array {
    fn name(&self) -> &'static str {
        "int32[]"
    }

    fn wire_size(&self, value: &Bytes) -> Result<usize> {
        check_elements(value.len(), 4)?;
        Ok(value.len())
    }

    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        check_elements(value.len(), 4)?;
        Ok(value.clone())
    }

    fn decode(&self, wire: Bytes, order: ByteOrder) -> Result<Bytes> {
        check_elements(wire.len(), 4)?;
        if order == ByteOrder::host() {
            return Ok(wire);
        }
        let mut out = BytesMut::with_capacity(wire.len());
        for chunk in wire.chunks_exact(4) {
            out.put_slice(&read_u32(chunk, order)?.to_ne_bytes());
        }
        Ok(out.freeze())
    }

    fn is_fixed_flat(&self) -> bool {
        true
    }
}

/// A UTF-8 string, sent as a 32-bit length followed by its bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl Formatter for Text {
    fn name(&self) -> &'static str {
        "string"
    }

    fn wire_size(&self, value: &Bytes) -> Result<usize> {
        Ok(4 + value.len())
    }

    fn encode(&self, value: &Bytes) -> Result<Bytes> {
        std::str::from_utf8(value).map_err(|_| FormatError::InvalidText)?;
        let len = u32::try_from(value.len()).map_err(|_| FormatError::Truncated {
            needed: value.len(),
            available: u32::MAX as usize,
        })?;
        let mut out = BytesMut::with_capacity(4 + value.len());
        out.put_slice(&len.to_ne_bytes());
        out.put_slice(value);
        Ok(out.freeze())
    }

    fn decode(&self, wire: Bytes, order: ByteOrder) -> Result<Bytes> {
        if wire.len() < 4 {
            return Err(FormatError::Truncated {
                needed: 4,
                available: wire.len(),
            });
        }
        let len = read_u32(&wire[..4], order)? as usize;
        let end = 4usize.saturating_add(len);
        if wire.len() < end {
            return Err(FormatError::Truncated {
                needed: end,
                available: wire.len(),
            });
        }
        let text = wire.slice(4..end);
        std::str::from_utf8(&text).map_err(|_| FormatError::InvalidText)?;
        Ok(text)
    }
}

fn check_elements(len: usize, unit: usize) -> Result<()> {
    if len % unit == 0 {
        Ok(())
    } else {
        Err(FormatError::Misaligned { len, unit })
    }
}

/// Read a 32-bit value stored in `order`.
fn read_u32(bytes: &[u8], order: ByteOrder) -> Result<u32> {
    let b: [u8; 4] = bytes.try_into().map_err(|_| FormatError::Truncated {
        needed: 4,
        available: bytes.len(),
    })?;
    match order {
        ByteOrder::Big => Ok(u32::from_be_bytes(b)),
        ByteOrder::Little => Ok(u32::from_le_bytes(b)),
        // Two little-endian 16-bit halves, high half first.
        ByteOrder::Pdp => Ok(u32::from_le_bytes([b[2], b[3], b[0], b[1]])),
        ByteOrder::Unknown => Err(FormatError::UnsupportedByteOrder(order)),
    }
}
