use std::sync::Arc;

use ipclink_frame::Formatter;
use ipclink_transport::{Connection, ConnectionId};

/// Logical class carried in the classifier word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Unknown,
    Query,
    Goal,
    Command,
    Inform,
    Exception,
    Kill,
    Reply,
    Success,
    Failure,
    FireDemon,
    Broadcast,
    MultiQuery,
    /// Response re-labelled with another message's name.
    ExecHnd,
}

impl MessageClass {
    pub fn id(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Query => 1,
            Self::Goal => 2,
            Self::Command => 3,
            Self::Inform => 4,
            Self::Exception => 5,
            Self::Kill => 6,
            Self::Reply => 7,
            Self::Success => 8,
            Self::Failure => 9,
            Self::FireDemon => 10,
            Self::Broadcast => 11,
            Self::MultiQuery => 12,
            Self::ExecHnd => 13,
        }
    }

    pub fn from_id(id: u16) -> Self {
        match id {
            1 => Self::Query,
            2 => Self::Goal,
            3 => Self::Command,
            4 => Self::Inform,
            5 => Self::Exception,
            6 => Self::Kill,
            7 => Self::Reply,
            8 => Self::Success,
            9 => Self::Failure,
            10 => Self::FireDemon,
            11 => Self::Broadcast,
            12 => Self::MultiQuery,
            13 => Self::ExecHnd,
            _ => Self::Unknown,
        }
    }
}

/// A point-to-point recipient that bypasses the router.
#[derive(Debug, Clone)]
pub struct DirectHandler {
    connection: Option<Arc<Connection>>,
    intent: i32,
}

impl DirectHandler {
    pub fn new(connection: Arc<Connection>, intent: i32) -> Self {
        Self {
            connection: Some(connection),
            intent,
        }
    }

    pub fn intent(&self) -> i32 {
        self.intent
    }

    /// The connection, while it can still be written to.
    pub fn live_connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref().filter(|conn| conn.is_open())
    }

    fn uses(&self, id: ConnectionId) -> bool {
        self.connection.as_ref().is_some_and(|conn| conn.id() == id)
    }
}

/// A registered message type.
#[derive(Debug, Clone)]
pub struct MessageDef {
    pub name: String,
    /// Router-assigned id, sent as the intent of router deliveries.
    pub id: i32,
    pub class: MessageClass,
    pub msg_format: Option<Arc<dyn Formatter>>,
    pub res_format: Option<Arc<dyn Formatter>>,
    /// Replies travel directly rather than through the router.
    pub direct: bool,
    handlers: Vec<DirectHandler>,
}

impl MessageDef {
    pub fn new(name: impl Into<String>, id: i32, class: MessageClass) -> Self {
        Self {
            name: name.into(),
            id,
            class,
            msg_format: None,
            res_format: None,
            direct: false,
            handlers: Vec::new(),
        }
    }

    pub fn with_msg_format(mut self, format: Arc<dyn Formatter>) -> Self {
        self.msg_format = Some(format);
        self
    }

    pub fn with_res_format(mut self, format: Arc<dyn Formatter>) -> Self {
        self.res_format = Some(format);
        self
    }

    pub fn with_direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    /// Direct handlers in registration order.
    pub fn handlers(&self) -> &[DirectHandler] {
        &self.handlers
    }

    pub fn add_handler(&mut self, handler: DirectHandler) {
        self.handlers.push(handler);
    }

    /// Whether sends go point-to-point instead of to the router.
    pub fn delivers_directly(&self) -> bool {
        self.direct && !self.handlers.is_empty()
    }

    /// Detach handlers that use `id`. Returns true if anything changed.
    ///
    /// Once every handler is detached the list is dropped, so the next send
    /// goes through the router again.
    pub(crate) fn reset_direct(&mut self, id: ConnectionId) -> bool {
        if !self.handlers.iter().any(|h| h.uses(id)) {
            return false;
        }
        for handler in &mut self.handlers {
            if handler.uses(id) {
                handler.connection = None;
            }
        }
        if self.handlers.iter().all(|h| h.connection.is_none()) {
            self.handlers.clear();
        }
        true
    }
}
