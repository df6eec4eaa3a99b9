//! The classifier word: class id plus the layout the sender used.
//!
//! ```text
//!  31    28 27    24 23            16 15                      0
//! ┌────────┬────────┬────────────────┬─────────────────────────┐
//! │ class  │ data   │ alignment      │ class id                │
//! │ order  │ order  │                │                         │
//! └────────┴────────┴────────────────┴─────────────────────────┘
//! ```

use crate::error::{FrameError, Result};

const CLASS_ID_MASK: u32 = 0x0000_FFFF;
const ALIGNMENT_MASK: u32 = 0x00FF_0000;
const ALIGNMENT_SHIFT: u32 = 16;
const DATA_ORDER_MASK: u32 = 0x0F00_0000;
const DATA_ORDER_SHIFT: u32 = 24;
const CLASS_ORDER_MASK: u32 = 0xF000_0000;
const CLASS_ORDER_SHIFT: u32 = 28;

/// Byte order a segment was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Unknown,
    Big,
    Little,
    /// Middle-endian 16-bit word swapped layout.
    Pdp,
}

impl ByteOrder {
    pub fn host() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Big => 1,
            Self::Little => 2,
            Self::Pdp => 3,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Big,
            2 => Self::Little,
            3 => Self::Pdp,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Big => "big",
            Self::Little => "little",
            Self::Pdp => "pdp",
        }
    }
}

/// Field alignment rule a segment was laid out with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    /// No padding between fields. The only layout that goes on the wire.
    Packed,
    Word,
    Longest,
    Int,
    MacPpc,
    Arm,
    Other(u8),
}

impl Alignment {
    /// Natural layout of structs on this machine.
    pub fn host() -> Self {
        if cfg!(target_arch = "x86_64") {
            Self::Longest
        } else if cfg!(target_arch = "x86") {
            Self::Int
        } else if cfg!(any(target_arch = "arm", target_arch = "aarch64")) {
            Self::Arm
        } else if cfg!(any(target_arch = "powerpc", target_arch = "powerpc64")) {
            Self::MacPpc
        } else {
            Self::Word
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Packed => 0x00,
            Self::Word => 0x01,
            Self::Longest => 0x02,
            Self::Int => 0x04,
            Self::MacPpc => 0x10,
            Self::Arm => 0x20,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Packed,
            0x01 => Self::Word,
            0x02 => Self::Longest,
            0x04 => Self::Int,
            0x10 => Self::MacPpc,
            0x20 => Self::Arm,
            other => Self::Other(other),
        }
    }
}

/// Byte order and alignment of received data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub byte_order: ByteOrder,
    pub alignment: Alignment,
}

impl WireFormat {
    /// What this process puts on the wire: host byte order, packed.
    pub fn outgoing() -> Self {
        Self {
            byte_order: ByteOrder::host(),
            alignment: Alignment::Packed,
        }
    }
}

impl Default for WireFormat {
    fn default() -> Self {
        Self::outgoing()
    }
}

/// Unpacked form of the classifier word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    pub class_id: u16,
    pub data_order: ByteOrder,
    pub class_order: ByteOrder,
    pub alignment: Alignment,
}

impl Classifier {
    /// Classifier for data produced by this process.
    pub fn outgoing(class_id: u16) -> Self {
        Self {
            class_id,
            data_order: ByteOrder::host(),
            class_order: ByteOrder::host(),
            alignment: Alignment::Packed,
        }
    }

    pub fn pack(self) -> i32 {
        let word = u32::from(self.class_id)
            | (u32::from(self.alignment.code()) << ALIGNMENT_SHIFT)
            | ((self.data_order.code() << DATA_ORDER_SHIFT) & DATA_ORDER_MASK)
            | ((self.class_order.code() << CLASS_ORDER_SHIFT) & CLASS_ORDER_MASK);
        word as i32
    }

    pub fn unpack(raw: i32) -> Self {
        let word = raw as u32;
        Self {
            class_id: (word & CLASS_ID_MASK) as u16,
            alignment: Alignment::from_code(((word & ALIGNMENT_MASK) >> ALIGNMENT_SHIFT) as u8),
            data_order: ByteOrder::from_code((word & DATA_ORDER_MASK) >> DATA_ORDER_SHIFT),
            class_order: ByteOrder::from_code((word & CLASS_ORDER_MASK) >> CLASS_ORDER_SHIFT),
        }
    }

    /// Fail unless the data is byte-packed.
    pub fn ensure_packed(&self) -> Result<()> {
        match self.alignment {
            Alignment::Packed => Ok(()),
            other => Err(FrameError::UnsupportedAlignment(other.code())),
        }
    }

    pub fn data_format(&self) -> WireFormat {
        WireFormat {
            byte_order: self.data_order,
            alignment: self.alignment,
        }
    }
}
