//! Process-to-process message transport.
//!
//! ipclink moves typed envelopes between modules over TCP, Unix domain
//! sockets or named pipes. Each envelope carries a class segment and a
//! payload, both tagged with the sender's byte order and alignment so the
//! receiver can decode them without a shared memory layout.
//!
//! # Crate Structure
//!
//! - [`transport`]: connection establishment, listeners and vectored socket I/O
//! - [`frame`]: the wire envelope, byte-order classifier and formatters
//! - [`peer`]: module context, routed and direct delivery, references and
//!   replies (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use ipclink_transport::*;
}

/// Re-export envelope types.
pub mod frame {
    pub use ipclink_frame::*;
}

/// Re-export module-level messaging types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ipclink_peer::*;
}
