//! Module-level messaging for ipclink.
//!
//! A [`ModuleContext`] holds everything one participating process needs:
//! the router connection and direct connections, registered message
//! definitions with their direct handler lists, and the reference table
//! that correlates queries with replies.
//!
//! Sends go to the router unless a message has direct handlers, in which
//! case each live handler gets its own copy, last registered first.

pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod reference;
pub mod reply;
pub mod sender;

pub use config::{ModuleConfig, ROUTER_ENV};
pub use context::{ModuleContext, RouterLostHook};
pub use error::{Outcome, PeerError, Result};
pub use message::{DirectHandler, MessageClass, MessageDef};
pub use reference::{RefHandle, RefTable, Reference, ResponseState};
pub use reply::{REF_DATA_QUERY, REF_RELEASE_INFORM, REF_STATUS_QUERY};
pub use sender::{Response, SendRequest};
