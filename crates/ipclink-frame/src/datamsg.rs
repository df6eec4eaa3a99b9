use std::io::{IoSlice, Read, Write};

use bytes::{Bytes, BytesMut};
use ipclink_transport::{io, Connection};
use tracing::{debug, warn};

use crate::classifier::{ByteOrder, Classifier, WireFormat};
use crate::error::{FormatError, FrameError, Result};
use crate::formatter::Formatter;
use crate::header::{Header, HEADER_SIZE, INTENT_UNSPECIFIED, NO_REF};

/// Default limit for each received segment (16 MiB).
pub const DEFAULT_MAX_SEGMENT: usize = 16 * 1024 * 1024;

/// Limits applied to envelopes read from a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeConfig {
    pub max_class_size: usize,
    pub max_payload_size: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_class_size: DEFAULT_MAX_SEGMENT,
            max_payload_size: DEFAULT_MAX_SEGMENT,
        }
    }
}

/// Caller-supplied storage for an awaited reply payload.
///
/// Used by [`DataMessage::recv_with_reply`] when the incoming message ref
/// and payload length both match; the received payload then lives in this
/// buffer instead of a fresh allocation.
#[derive(Debug)]
pub struct ReplyBuffer {
    msg_ref: i32,
    buffer: Option<BytesMut>,
}

impl ReplyBuffer {
    /// Reserve `len` bytes for the reply to `msg_ref`.
    pub fn new(msg_ref: i32, len: usize) -> Self {
        Self {
            msg_ref,
            buffer: Some(BytesMut::zeroed(len)),
        }
    }

    pub fn msg_ref(&self) -> i32 {
        self.msg_ref
    }

    /// True once a received payload has taken the buffer.
    pub fn is_filled(&self) -> bool {
        self.buffer.is_none()
    }

    fn restore(&mut self, buffer: BytesMut) {
        self.buffer = Some(buffer);
    }

    fn take_for(&mut self, header: &Header) -> Option<BytesMut> {
        let matches = header.msg_ref == self.msg_ref
            && self
                .buffer
                .as_ref()
                .is_some_and(|buf| buf.len() == header.msg_total as usize);
        if matches {
            self.buffer.take()
        } else {
            None
        }
    }
}

/// One message in transit: header, class segment and payload segment.
///
/// Both segments are shared buffers. Cloning an envelope, or deriving one
/// with [`replace_class_data`](Self::replace_class_data), aliases the same
/// allocations; memory is released when the last holder drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    header: Header,
    class_data: Bytes,
    payload: Bytes,
}

impl DataMessage {
    pub fn builder<'a>(class_id: u16) -> DataMessageBuilder<'a> {
        DataMessageBuilder {
            class_id,
            parent_ref: NO_REF,
            intent: INTENT_UNSPECIFIED,
            dispatch_ref: NO_REF,
            msg_ref: NO_REF,
            payload: None,
            class_data: None,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn classifier(&self) -> Classifier {
        self.header.classifier()
    }

    pub fn class_id(&self) -> u16 {
        self.classifier().class_id
    }

    pub fn parent_ref(&self) -> i32 {
        self.header.parent_ref
    }

    pub fn intent(&self) -> i32 {
        self.header.intent
    }

    pub fn set_intent(&mut self, intent: i32) {
        self.header.intent = intent;
    }

    pub fn dispatch_ref(&self) -> i32 {
        self.header.dispatch_ref
    }

    pub fn msg_ref(&self) -> i32 {
        self.header.msg_ref
    }

    /// Raw class segment as received or encoded.
    pub fn class_data(&self) -> &Bytes {
        &self.class_data
    }

    /// Raw payload segment as received or encoded.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn has_payload(&self) -> bool {
        self.header.msg_total > 0
    }

    /// Byte order and alignment the payload was written with.
    pub fn wire_format(&self) -> WireFormat {
        self.classifier().data_format()
    }

    /// Total bytes this envelope occupies on the wire.
    pub fn wire_len(&self) -> usize {
        self.header.wire_len()
    }

    /// Write header, class segment and payload as one vectored write.
    pub fn send<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        let header = self.header.to_bytes();
        io::write_vectored(writer, self.segments(&header), self.wire_len())?;
        Ok(())
    }

    /// Send on a connection, holding its write lock for the whole envelope.
    pub fn send_on(&self, conn: &Connection) -> Result<()> {
        let header = self.header.to_bytes();
        conn.write_vectored(self.segments(&header), self.wire_len())?;
        debug!(
            connection = %conn.id(),
            class = self.class_id(),
            intent = self.header.intent,
            msg_ref = self.header.msg_ref,
            bytes = self.wire_len(),
            "sent envelope"
        );
        Ok(())
    }

    fn segments<'a>(&'a self, header: &'a [u8; HEADER_SIZE]) -> Vec<IoSlice<'a>> {
        let mut segments = Vec::with_capacity(3);
        segments.push(IoSlice::new(header));
        if !self.class_data.is_empty() {
            segments.push(IoSlice::new(&self.class_data));
        }
        if !self.payload.is_empty() {
            segments.push(IoSlice::new(&self.payload));
        }
        segments
    }

    /// Read one complete envelope.
    ///
    /// Data laid out with any alignment other than packed is rejected with
    /// [`FrameError::UnsupportedAlignment`]. The body is consumed first so
    /// the stream stays positioned at the next envelope.
    pub fn recv<R: Read + ?Sized>(reader: &mut R, config: &EnvelopeConfig) -> Result<Self> {
        Self::recv_into(reader, config, None)
    }

    /// Like [`recv`](Self::recv), reading a matching reply payload straight
    /// into `reply`.
    pub fn recv_with_reply<R: Read + ?Sized>(
        reader: &mut R,
        config: &EnvelopeConfig,
        reply: &mut ReplyBuffer,
    ) -> Result<Self> {
        Self::recv_into(reader, config, Some(reply))
    }

    /// Receive on a connection, holding its read lock for the whole envelope.
    pub fn recv_on(conn: &Connection, config: &EnvelopeConfig) -> Result<Self> {
        let mut reader = conn.reader()?;
        Self::recv_into(&mut *reader, config, None)
    }

    fn recv_into<R: Read + ?Sized>(
        reader: &mut R,
        config: &EnvelopeConfig,
        reply: Option<&mut ReplyBuffer>,
    ) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        io::read_exact(reader, &mut raw)?;
        let header = Header::decode(&raw);

        check_segment("class", header.class_total as usize, config.max_class_size)?;
        check_segment("payload", header.msg_total as usize, config.max_payload_size)?;

        let mut class_data = BytesMut::zeroed(header.class_total as usize);
        let payload_len = header.msg_total as usize;
        let (mut payload, lent) = match reply {
            Some(reply) => match reply.take_for(&header) {
                Some(buf) => (buf, Some(reply)),
                None => (BytesMut::zeroed(payload_len), None),
            },
            None => (BytesMut::zeroed(payload_len), None),
        };

        if let Err(err) = read_body(reader, &header, &mut class_data, &mut payload) {
            // The caller still owns its buffer when no reply was delivered.
            if let Some(reply) = lent {
                reply.restore(payload);
            }
            return Err(err);
        }

        Ok(Self {
            header,
            class_data: class_data.freeze(),
            payload: payload.freeze(),
        })
    }

    /// Decode the payload into its in-memory form.
    ///
    /// Returns `None` for an empty payload. Flat data already in host byte
    /// order comes back as the received buffer, without a copy.
    pub fn decode_payload(&self, formatter: &dyn Formatter) -> Result<Option<Bytes>> {
        let classifier = self.classifier();
        decode_segment(
            formatter,
            &self.payload,
            classifier.data_order,
            &classifier,
        )
    }

    /// Decode the class segment, written in the class byte order.
    pub fn decode_class(&self, formatter: &dyn Formatter) -> Result<Option<Bytes>> {
        let classifier = self.classifier();
        decode_segment(
            formatter,
            &self.class_data,
            classifier.class_order,
            &classifier,
        )
    }

    /// A copy of this envelope carrying a different class segment.
    ///
    /// The payload buffer is shared with `self`, not copied. The new class
    /// segment is encoded in this host's byte order.
    pub fn replace_class_data(
        &self,
        formatter: &dyn Formatter,
        value: &Bytes,
    ) -> Result<DataMessage> {
        let class_data = encode_segment("class", formatter, value)?;
        let mut classifier = self.classifier();
        classifier.class_order = ByteOrder::host();

        let mut header = self.header;
        header.class_total = class_data.len() as u32;
        header.classifier = classifier.pack();

        Ok(Self {
            header,
            class_data,
            payload: self.payload.clone(),
        })
    }
}

/// Builds an outgoing [`DataMessage`].
///
/// Segments are encoded by their formatter in [`build`](Self::build); a
/// formatter that writes a different length than it sized aborts the build.
#[derive(Debug)]
pub struct DataMessageBuilder<'a> {
    class_id: u16,
    parent_ref: i32,
    intent: i32,
    dispatch_ref: i32,
    msg_ref: i32,
    payload: Option<(&'a dyn Formatter, &'a Bytes)>,
    class_data: Option<(&'a dyn Formatter, &'a Bytes)>,
}

impl<'a> DataMessageBuilder<'a> {
    pub fn parent_ref(mut self, parent_ref: i32) -> Self {
        self.parent_ref = parent_ref;
        self
    }

    pub fn intent(mut self, intent: i32) -> Self {
        self.intent = intent;
        self
    }

    pub fn dispatch_ref(mut self, dispatch_ref: i32) -> Self {
        self.dispatch_ref = dispatch_ref;
        self
    }

    pub fn msg_ref(mut self, msg_ref: i32) -> Self {
        self.msg_ref = msg_ref;
        self
    }

    pub fn payload(mut self, formatter: &'a dyn Formatter, value: &'a Bytes) -> Self {
        self.payload = Some((formatter, value));
        self
    }

    pub fn class_data(mut self, formatter: &'a dyn Formatter, value: &'a Bytes) -> Self {
        self.class_data = Some((formatter, value));
        self
    }

    pub fn build(self) -> Result<DataMessage> {
        let class_data = match self.class_data {
            Some((formatter, value)) => encode_segment("class", formatter, value)?,
            None => Bytes::new(),
        };
        let payload = match self.payload {
            Some((formatter, value)) => encode_segment("payload", formatter, value)?,
            None => Bytes::new(),
        };

        let header = Header {
            class_total: class_data.len() as u32,
            msg_total: payload.len() as u32,
            parent_ref: self.parent_ref,
            intent: self.intent,
            classifier: Classifier::outgoing(self.class_id).pack(),
            dispatch_ref: self.dispatch_ref,
            msg_ref: self.msg_ref,
        };

        Ok(DataMessage {
            header,
            class_data,
            payload,
        })
    }
}

fn read_body<R: Read + ?Sized>(
    reader: &mut R,
    header: &Header,
    class_data: &mut [u8],
    payload: &mut [u8],
) -> Result<()> {
    io::read_exact_scattered(reader, class_data, payload)?;

    let classifier = header.classifier();
    if let Err(err) = classifier.ensure_packed() {
        warn!(
            alignment = classifier.alignment.code(),
            msg_ref = header.msg_ref,
            "refusing envelope with non-packed alignment"
        );
        return Err(err);
    }
    Ok(())
}

fn check_segment(segment: &'static str, size: usize, max: usize) -> Result<()> {
    if size > max {
        return Err(FrameError::SegmentTooLarge { segment, size, max });
    }
    Ok(())
}

fn encode_segment(
    segment: &'static str,
    formatter: &dyn Formatter,
    value: &Bytes,
) -> Result<Bytes> {
    let size = formatter.wire_size(value)?;
    check_segment(segment, size, u32::MAX as usize)?;
    let wire = formatter.encode(value)?;
    if wire.len() != size {
        return Err(FormatError::SizeMismatch {
            formatter: formatter.name(),
            expected: size,
            actual: wire.len(),
        }
        .into());
    }
    Ok(wire)
}

fn decode_segment(
    formatter: &dyn Formatter,
    wire: &Bytes,
    order: ByteOrder,
    classifier: &Classifier,
) -> Result<Option<Bytes>> {
    if wire.is_empty() {
        return Ok(None);
    }
    classifier.ensure_packed()?;
    if formatter.is_fixed_flat() && order == ByteOrder::host() {
        return Ok(Some(wire.clone()));
    }
    Ok(Some(formatter.decode(wire.clone(), order)?))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::classifier::Alignment;
    use crate::formatter::{Int32Array, Opaque, Text};

    fn sample() -> DataMessage {
        let payload = Bytes::from_static(b"0123456789");
        let class = Bytes::from_static(b"route");
        DataMessage::builder(42)
            .parent_ref(3)
            .msg_ref(11)
            .payload(&Opaque, &payload)
            .class_data(&Text, &class)
            .build()
            .expect("build should succeed")
    }

    fn to_wire(msg: &DataMessage) -> Vec<u8> {
        let mut out = Vec::new();
        msg.send(&mut out).expect("send should succeed");
        out
    }

    #[test]
    fn class_segment_precedes_payload() {
        let msg = sample();
        let wire = to_wire(&msg);
        assert_eq!(wire.len(), HEADER_SIZE + 9 + 10);
        assert_eq!(&wire[HEADER_SIZE + 4..HEADER_SIZE + 9], b"route");
        assert_eq!(&wire[HEADER_SIZE + 9..], b"0123456789");
    }

    #[test]
    fn recv_restores_envelope() {
        let msg = sample();
        let mut cursor = Cursor::new(to_wire(&msg));
        let received =
            DataMessage::recv(&mut cursor, &EnvelopeConfig::default()).expect("recv should succeed");
        assert_eq!(received, msg);
        assert_eq!(received.class_id(), 42);
        let class = received
            .decode_class(&Text)
            .expect("decode should succeed")
            .expect("class should be present");
        assert_eq!(&class[..], b"route");
    }

    #[test]
    fn empty_payload_decodes_to_none() {
        let msg = DataMessage::builder(1).build().expect("build should succeed");
        assert!(!msg.has_payload());
        assert!(msg
            .decode_payload(&Opaque)
            .expect("decode should succeed")
            .is_none());
    }

    #[test]
    fn flat_payload_is_not_copied() {
        let payload: Bytes = [1i32, 2, 3]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect::<Vec<u8>>()
            .into();
        let msg = DataMessage::builder(5)
            .payload(&Int32Array, &payload)
            .build()
            .expect("build should succeed");
        assert_eq!(msg.payload().as_ptr(), payload.as_ptr());

        let decoded = msg
            .decode_payload(&Int32Array)
            .expect("decode should succeed")
            .expect("payload should be present");
        assert_eq!(decoded.as_ptr(), payload.as_ptr());
    }

    #[test]
    fn replace_class_shares_payload() {
        let msg = sample();
        let new_class = Bytes::from_static(b"elsewhere");
        let replaced = msg
            .replace_class_data(&Text, &new_class)
            .expect("replace should succeed");

        assert_eq!(replaced.payload().as_ptr(), msg.payload().as_ptr());
        assert_eq!(replaced.header().class_total, 4 + 9);
        assert_eq!(replaced.msg_ref(), msg.msg_ref());
        assert_eq!(replaced.class_id(), 42);
        assert_eq!(msg.header().class_total, 9);
    }

    #[test]
    fn reply_buffer_reused_on_match() {
        let msg = sample();
        let mut reply = ReplyBuffer::new(11, 10);
        let mut cursor = Cursor::new(to_wire(&msg));
        let received = DataMessage::recv_with_reply(&mut cursor, &EnvelopeConfig::default(), &mut reply)
            .expect("recv should succeed");
        assert!(reply.is_filled());
        assert_eq!(&received.payload()[..], b"0123456789");
    }

    #[test]
    fn reply_buffer_untouched_on_length_mismatch() {
        let msg = sample();
        let mut reply = ReplyBuffer::new(11, 4);
        let mut cursor = Cursor::new(to_wire(&msg));
        DataMessage::recv_with_reply(&mut cursor, &EnvelopeConfig::default(), &mut reply)
            .expect("recv should succeed");
        assert!(!reply.is_filled());
    }

    #[test]
    fn reply_buffer_returned_when_body_is_cut_short() {
        let wire = to_wire(&sample());
        let mut reply = ReplyBuffer::new(11, 10);
        let mut cursor = Cursor::new(wire[..wire.len() - 4].to_vec());
        let err = DataMessage::recv_with_reply(&mut cursor, &EnvelopeConfig::default(), &mut reply)
            .unwrap_err();
        assert!(err.is_disconnect());
        assert!(!reply.is_filled());

        let mut cursor = Cursor::new(wire);
        DataMessage::recv_with_reply(&mut cursor, &EnvelopeConfig::default(), &mut reply)
            .expect("recv should succeed");
        assert!(reply.is_filled());
    }

    #[test]
    fn reply_buffer_returned_when_alignment_rejected() {
        let msg = sample();
        let mut wire = to_wire(&msg);
        let mut classifier = msg.classifier();
        classifier.alignment = Alignment::Longest;
        wire[16..20].copy_from_slice(&classifier.pack().to_be_bytes());

        let mut reply = ReplyBuffer::new(11, 10);
        let mut cursor = Cursor::new(wire);
        let err = DataMessage::recv_with_reply(&mut cursor, &EnvelopeConfig::default(), &mut reply)
            .unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedAlignment(0x02)));
        assert!(!reply.is_filled());
    }

    #[test]
    fn oversized_segment_rejected_before_body() {
        let msg = sample();
        let config = EnvelopeConfig {
            max_payload_size: 4,
            ..EnvelopeConfig::default()
        };
        let mut cursor = Cursor::new(to_wire(&msg));
        let err = DataMessage::recv(&mut cursor, &config).unwrap_err();
        assert!(matches!(
            err,
            FrameError::SegmentTooLarge {
                segment: "payload",
                size: 10,
                max: 4
            }
        ));
    }

    #[test]
    fn non_packed_envelope_rejected_after_body() {
        let msg = sample();
        let mut wire = to_wire(&msg);
        let mut classifier = msg.classifier();
        classifier.alignment = Alignment::Longest;
        wire[16..20].copy_from_slice(&classifier.pack().to_be_bytes());
        // A second envelope follows; the stream must stay in sync.
        wire.extend_from_slice(&to_wire(&msg));

        let mut cursor = Cursor::new(wire);
        let err = DataMessage::recv(&mut cursor, &EnvelopeConfig::default()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedAlignment(0x02)));

        let next =
            DataMessage::recv(&mut cursor, &EnvelopeConfig::default()).expect("recv should succeed");
        assert_eq!(next, msg);
    }

    #[test]
    fn truncated_stream_is_eof() {
        let wire = to_wire(&sample());
        let mut cursor = Cursor::new(wire[..HEADER_SIZE + 3].to_vec());
        let err = DataMessage::recv(&mut cursor, &EnvelopeConfig::default()).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[derive(Debug)]
    struct LyingFormatter;

    impl Formatter for LyingFormatter {
        fn name(&self) -> &'static str {
            "lying"
        }

        fn wire_size(&self, value: &Bytes) -> std::result::Result<usize, FormatError> {
            Ok(value.len() + 1)
        }

        fn encode(&self, value: &Bytes) -> std::result::Result<Bytes, FormatError> {
            Ok(value.clone())
        }

        fn decode(&self, wire: Bytes, _order: ByteOrder) -> std::result::Result<Bytes, FormatError> {
            Ok(wire)
        }
    }

    #[test]
    fn size_mismatch_aborts_build() {
        let payload = Bytes::from_static(b"abc");
        let err = DataMessage::builder(1)
            .payload(&LyingFormatter, &payload)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::Format(FormatError::SizeMismatch {
                formatter: "lying",
                expected: 4,
                actual: 3
            })
        ));
    }
}
