use std::sync::Arc;

use bytes::Bytes;
use ipclink_frame::{
    DataMessage, Formatter, Opaque, Text, INTENT_UNSPECIFIED, NO_REF, QUERY_REPLY_INTENT,
};
use ipclink_transport::{Connection, ConnectionId};
use tracing::{debug, warn};

use crate::context::{lock, ModuleContext};
use crate::error::{PeerError, Result};
use crate::message::MessageClass;
use crate::reference::{RefHandle, ResponseState};

/// One outgoing message.
#[derive(Debug, Clone)]
pub struct SendRequest<'a> {
    msg: &'a str,
    reference: Option<RefHandle>,
    payload: Option<&'a Bytes>,
    class_data: Option<&'a Bytes>,
    preallocated_ref: Option<i32>,
}

impl<'a> SendRequest<'a> {
    pub fn new(msg: &'a str) -> Self {
        Self {
            msg,
            reference: None,
            payload: None,
            class_data: None,
            preallocated_ref: None,
        }
    }

    /// Exchange this message belongs to; its id goes out as the dispatch ref.
    pub fn reference(mut self, handle: RefHandle) -> Self {
        self.reference = Some(handle);
        self
    }

    pub fn payload(mut self, payload: &'a Bytes) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn class_data(mut self, class_data: &'a Bytes) -> Self {
        self.class_data = Some(class_data);
        self
    }

    /// Send with a correlation id the caller already took.
    pub fn preallocated_ref(mut self, msg_ref: i32) -> Self {
        self.preallocated_ref = Some(msg_ref);
        self
    }
}

/// One response to an exchange.
#[derive(Debug, Clone)]
pub struct Response<'a> {
    reference: Option<RefHandle>,
    relabel_as: Option<&'a str>,
    class: MessageClass,
    data: Option<&'a Bytes>,
    class_data: Option<&'a Bytes>,
    to: Option<Arc<Connection>>,
}

impl<'a> Response<'a> {
    pub fn new(class: MessageClass) -> Self {
        Self {
            reference: None,
            relabel_as: None,
            class,
            data: None,
            class_data: None,
            to: None,
        }
    }

    pub fn reference(mut self, handle: RefHandle) -> Self {
        self.reference = Some(handle);
        self
    }

    /// Send `data` formatted as message `name`, carrying that name in the
    /// class segment so the receiver decodes it with the right format.
    pub fn relabel_as(mut self, name: &'a str) -> Self {
        self.relabel_as = Some(name);
        self
    }

    pub fn data(mut self, data: &'a Bytes) -> Self {
        self.data = Some(data);
        self
    }

    pub fn class_data(mut self, class_data: &'a Bytes) -> Self {
        self.class_data = Some(class_data);
        self
    }

    /// Connection to respond on. Defaults to the one the query came in on,
    /// then the router.
    pub fn to(mut self, conn: Arc<Connection>) -> Self {
        self.to = Some(conn);
        self
    }
}

impl ModuleContext {
    /// Encode and send one message.
    ///
    /// With no direct handlers the message goes once to the router with the
    /// message id as intent. Otherwise it goes to every live direct handler,
    /// last registered first, each with its own intent. A handler whose peer
    /// has gone is torn down and the remaining handlers are still served;
    /// on the router path a broken pipe is returned.
    ///
    /// Returns the correlation id the message was sent with.
    pub fn send_message(&self, request: SendRequest<'_>) -> Result<i32> {
        let router = self.router().ok_or(PeerError::NotConnected)?;
        let def = self.require_message(request.msg)?;

        let msg_ref = match request.preallocated_ref {
            Some(msg_ref) => msg_ref,
            None => self.next_send_ref(),
        };
        let dispatch_ref = match request.reference {
            Some(handle) => self.reference_id(handle)?,
            None => NO_REF,
        };
        let class_format = self.class_format(def.class);

        let mut envelope = build(
            def.class,
            self.parent_ref(),
            INTENT_UNSPECIFIED,
            dispatch_ref,
            msg_ref,
            request.payload.map(|p| (def.msg_format.as_deref(), p)),
            request.class_data.map(|c| (class_format.as_deref(), c)),
        )?;

        if !def.delivers_directly() {
            envelope.set_intent(def.id);
            envelope.send_on(&router)?;
            return Ok(msg_ref);
        }

        for handler in def.handlers().iter().rev() {
            let Some(conn) = handler.live_connection() else {
                continue;
            };
            envelope.set_intent(handler.intent());
            match envelope.send_on(conn) {
                Ok(()) => {}
                Err(err) if err.is_broken_pipe() => {
                    if !self.handle_closed_connection(conn.id()) {
                        return Err(err.into());
                    }
                    debug!(message = %def.name, connection = %conn.id(), "skipping closed direct handler");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(msg_ref)
    }

    /// Build and send a response.
    ///
    /// The intent is the query-reply intent when the referenced message
    /// replies directly, and unspecified otherwise. On success the
    /// reference is marked responded, or freed if it was detached.
    pub fn send_response(&self, response: Response<'_>) -> Result<()> {
        let reference = match response.reference {
            Some(handle) => Some((handle, self.reference(handle)?)),
            None => None,
        };
        if let Some((_, entry)) = &reference {
            if entry.response == ResponseState::Responded {
                warn!(msg_ref = entry.id, name = ?entry.name, "already responded to reference");
            }
        }

        let mut intent = INTENT_UNSPECIFIED;
        let mut msg_id = NO_REF;
        let mut format: Option<Arc<dyn Formatter>> = None;
        let mut class_format = self.class_format(response.class);
        let relabel;
        let mut class_data = response.class_data;

        if let Some((handle, entry)) = &reference {
            let ref_msg = self.resolve_reference_msg(*handle)?;
            if ref_msg.direct {
                intent = QUERY_REPLY_INTENT;
                msg_id = entry.id;
            }
            if response.data.is_some() {
                format = ref_msg.res_format.clone();
            }
        }

        if let Some(name) = response.relabel_as {
            let msg = self.require_message(name)?;
            format = msg.msg_format.clone();
            class_format = Some(Arc::new(Text));
            relabel = Bytes::copy_from_slice(msg.name.as_bytes());
            class_data = Some(&relabel);
        }

        let dispatch_ref = reference.as_ref().map_or(NO_REF, |(_, entry)| entry.id);
        let envelope = build(
            response.class,
            self.parent_ref(),
            intent,
            dispatch_ref,
            msg_id,
            response.data.map(|d| (format.as_deref(), d)),
            class_data.map(|c| (class_format.as_deref(), c)),
        )?;

        let conn = match response.to {
            Some(conn) => conn,
            None => self.reply_connection(reference.as_ref().and_then(|(_, e)| e.reply_to))?,
        };
        envelope.send_on(&conn)?;

        if let Some((handle, entry)) = reference {
            let mut refs = lock(&self.refs);
            match entry.response {
                ResponseState::Detached => {
                    refs.release(handle)?;
                }
                _ => refs.get_mut(handle)?.response = ResponseState::Responded,
            }
        }
        Ok(())
    }

    /// Answer an exchange with an empty reply of `class`.
    pub fn respond_with(&self, handle: RefHandle, class: MessageClass) -> Result<()> {
        self.send_response(Response::new(class).reference(handle))
    }

    /// Answer a query with `data` encoded in its response format.
    pub fn reply(&self, handle: RefHandle, data: &Bytes) -> Result<()> {
        self.send_response(Response::new(MessageClass::Reply).reference(handle).data(data))
    }

    fn reply_connection(&self, reply_to: Option<ConnectionId>) -> Result<Arc<Connection>> {
        if let Some(conn) = reply_to.and_then(|id| self.connection(id)) {
            return Ok(conn);
        }
        self.router().ok_or(PeerError::NotConnected)
    }
}

/// Encode an envelope. Segments without a format are sent as opaque bytes.
fn build(
    class: MessageClass,
    parent_ref: i32,
    intent: i32,
    dispatch_ref: i32,
    msg_ref: i32,
    payload: Option<(Option<&dyn Formatter>, &Bytes)>,
    class_data: Option<(Option<&dyn Formatter>, &Bytes)>,
) -> Result<DataMessage> {
    let mut builder = DataMessage::builder(class.id())
        .parent_ref(parent_ref)
        .intent(intent)
        .dispatch_ref(dispatch_ref)
        .msg_ref(msg_ref);
    if let Some((format, value)) = payload {
        builder = builder.payload(format.unwrap_or(&Opaque), value);
    }
    if let Some((format, value)) = class_data {
        builder = builder.class_data(format.unwrap_or(&Opaque), value);
    }
    Ok(builder.build()?)
}
