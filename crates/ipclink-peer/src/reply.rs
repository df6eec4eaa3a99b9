use std::time::{Duration, Instant};

use bytes::Bytes;
use ipclink_frame::{DataMessage, Int32Array, ReplyBuffer, QUERY_REPLY_INTENT};
use ipclink_transport::io::DeadlineReader;
use tracing::{debug, warn};

use crate::context::{lock, ModuleContext};
use crate::error::{PeerError, Result};
use crate::reference::RefHandle;
use crate::sender::SendRequest;

/// Query the router answers with the status of a reference.
pub const REF_STATUS_QUERY: &str = "ipc_ref_status_query";
/// Query the router answers with the data sent under a reference.
pub const REF_DATA_QUERY: &str = "ipc_ref_data_query";
/// Inform telling the router a reference has been released.
pub const REF_RELEASE_INFORM: &str = "ipc_ref_release_inform";

/// How long a waiter sleeps while another thread reads the router connection.
const READER_BUSY_PAUSE: Duration = Duration::from_millis(2);

impl ModuleContext {
    /// Block until the reply to `msg_ref` arrives on the router connection.
    ///
    /// Replies to other queries are set aside for their own waiters; any
    /// other envelope is queued for [`take_inbound`](Self::take_inbound).
    /// `None` waits forever. An empty reply is [`PeerError::NullReply`].
    ///
    /// Several threads may wait at once. Whichever holds the read side
    /// reads on behalf of all of them, and every read is bounded by the
    /// reader's own deadline. If that deadline passes in the middle of an
    /// envelope the stream can no longer be trusted, so the router
    /// connection is dropped.
    pub fn wait_for_reply(&self, msg_ref: i32, timeout: Option<Duration>) -> Result<DataMessage> {
        self.wait_for_reply_into(msg_ref, timeout, None)
    }

    /// [`wait_for_reply`](Self::wait_for_reply), reading a reply of the
    /// expected size straight into `reply`.
    pub fn wait_for_reply_into(
        &self,
        msg_ref: i32,
        timeout: Option<Duration>,
        mut reply: Option<&mut ReplyBuffer>,
    ) -> Result<DataMessage> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let timed_out = || PeerError::Timeout(timeout.unwrap_or_default());

        loop {
            if let Some(found) = self.take_pending_reply(msg_ref) {
                return finish_reply(found);
            }

            let router = self.router().ok_or(PeerError::NotConnected)?;
            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if left.is_some_and(|left| left.is_zero()) {
                return Err(timed_out());
            }

            let Some(mut stream) = router.try_reader()? else {
                // Another waiter is reading and will queue our reply.
                std::thread::sleep(left.map_or(READER_BUSY_PAUSE, |left| {
                    left.min(READER_BUSY_PAUSE)
                }));
                continue;
            };
            if let Some(found) = self.take_pending_reply(msg_ref) {
                return finish_reply(found);
            }

            let mut timed = DeadlineReader::new(&mut *stream, deadline);
            let received = match reply.as_deref_mut() {
                Some(buf) => DataMessage::recv_with_reply(&mut timed, &self.config.envelope, buf),
                None => DataMessage::recv(&mut timed, &self.config.envelope),
            };
            let consumed = timed.consumed();
            drop(stream);

            let envelope = match received {
                Ok(envelope) => envelope,
                Err(err) if err.is_timeout() => {
                    if consumed > 0 {
                        warn!(
                            connection = %router.id(),
                            consumed,
                            "reply deadline passed mid-envelope, dropping router connection"
                        );
                        self.handle_closed_connection(router.id());
                    }
                    return Err(timed_out());
                }
                Err(err) if err.is_disconnect() => {
                    self.handle_closed_connection(router.id());
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(connection = %router.id(), %err, "failed to read envelope while waiting for reply");
                    return Err(err.into());
                }
            };

            if envelope.intent() == QUERY_REPLY_INTENT {
                if envelope.msg_ref() == msg_ref {
                    return finish_reply(envelope);
                }
                debug!(msg_ref = envelope.msg_ref(), "queueing reply for another waiter");
                lock(&self.comm).pending_replies.push_back(envelope);
            } else {
                lock(&self.comm).inbound.push_back((router.id(), envelope));
            }
        }
    }

    /// Send a query and wait for its reply.
    pub fn query(&self, request: SendRequest<'_>, timeout: Option<Duration>) -> Result<DataMessage> {
        let msg_ref = self.next_send_ref();
        self.send_message(request.preallocated_ref(msg_ref))?;
        self.wait_for_reply(msg_ref, timeout)
    }

    /// Ask the router for the status of the exchange behind `handle`.
    pub fn reference_status(&self, handle: RefHandle, timeout: Option<Duration>) -> Result<i32> {
        let status_query = self.require_message(REF_STATUS_QUERY)?;
        let ref_id = ref_id_payload(self.reference_id(handle)?);
        let reply = self.query(SendRequest::new(REF_STATUS_QUERY).payload(&ref_id), timeout)?;

        let decoded = match &status_query.res_format {
            Some(format) => reply.decode_payload(format.as_ref())?,
            None => reply.decode_payload(&Int32Array)?,
        };
        let status = decoded
            .as_deref()
            .and_then(|bytes| bytes.get(..4))
            .and_then(|bytes| bytes.try_into().ok())
            .map(i32::from_ne_bytes)
            .ok_or(PeerError::NullReply)?;
        Ok(status)
    }

    /// Ask the router for the data originally sent under `handle`, decoded
    /// with the referenced message's format.
    pub fn reference_data(&self, handle: RefHandle, timeout: Option<Duration>) -> Result<Bytes> {
        self.require_message(REF_DATA_QUERY)?;
        let ref_msg = self.resolve_reference_msg(handle)?;
        let format = ref_msg
            .msg_format
            .clone()
            .ok_or_else(|| PeerError::NoFormat(ref_msg.name.clone()))?;

        let ref_id = ref_id_payload(self.reference_id(handle)?);
        let reply = self.query(SendRequest::new(REF_DATA_QUERY).payload(&ref_id), timeout)?;
        reply.decode_payload(format.as_ref())?.ok_or(PeerError::NullReply)
    }

    /// Tell the router the exchange is over, then free the reference.
    ///
    /// A failed inform is logged; the reference is freed either way.
    pub fn release_reference(&self, handle: RefHandle) -> Result<()> {
        let ref_id = self.reference_id(handle)?;
        if self.message(REF_RELEASE_INFORM).is_some() {
            let payload = ref_id_payload(ref_id);
            if let Err(err) = self.send_message(SendRequest::new(REF_RELEASE_INFORM).payload(&payload)) {
                warn!(ref_id, %err, "release inform not sent");
            }
        }
        self.free_reference(handle)
    }

    fn take_pending_reply(&self, msg_ref: i32) -> Option<DataMessage> {
        let mut comm = lock(&self.comm);
        let index = comm
            .pending_replies
            .iter()
            .position(|reply| reply.msg_ref() == msg_ref)?;
        comm.pending_replies.remove(index)
    }
}

fn ref_id_payload(ref_id: i32) -> Bytes {
    Bytes::copy_from_slice(&ref_id.to_ne_bytes())
}

fn finish_reply(envelope: DataMessage) -> Result<DataMessage> {
    if envelope.has_payload() {
        Ok(envelope)
    } else {
        Err(PeerError::NullReply)
    }
}
