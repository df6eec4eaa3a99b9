use std::fs;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ipclink_frame::{DataMessage, EnvelopeConfig, Formatter, Int32Array, Opaque, Text, NO_REF};
use ipclink_transport::io::DeadlineReader;
use ipclink_transport::{connect, Target};
use tracing::debug;

use crate::cmd::SendArgs;
use crate::exit::{frame_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_envelope, OutputFormat, PayloadView};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let target = Target::parse(&args.target).map_err(|err| CliError::new(USAGE, err.to_string()))?;

    let (payload, view) = resolve_payload(&args)?;
    let envelope = build_envelope(&args, payload.as_ref(), view)?;

    let conn = connect(&target, &args.local.connect_config())
        .map_err(|err| transport_error("connect failed", err))?;
    debug!(%target, kind = conn.kind().as_str(), "connected");

    envelope
        .send_on(&conn)
        .map_err(|err| frame_error("send failed", err))?;

    if args.wait {
        let deadline = Instant::now() + wait_timeout;
        let mut stream = conn
            .reader()
            .map_err(|err| transport_error("receive failed", err))?;
        let response = DataMessage::recv(
            &mut DeadlineReader::new(&mut *stream, Some(deadline)),
            &EnvelopeConfig::default(),
        )
        .map_err(|err| frame_error("receive failed", err))?;
        print_envelope(&response, conn.peer(), view, format);
    }

    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<(Option<Bytes>, PayloadView)> {
    if let Some(data) = &args.data {
        return Ok((Some(Bytes::from(data.clone())), PayloadView::Text));
    }
    if let Some(ints) = &args.ints {
        let bytes: Vec<u8> = ints.iter().flat_map(|v| v.to_ne_bytes()).collect();
        return Ok((Some(Bytes::from(bytes)), PayloadView::Ints));
    }
    if let Some(path) = &args.file {
        let bytes = fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        })?;
        return Ok((Some(Bytes::from(bytes)), PayloadView::Text));
    }
    Ok((None, PayloadView::Text))
}

fn build_envelope(
    args: &SendArgs,
    payload: Option<&Bytes>,
    view: PayloadView,
) -> CliResult<DataMessage> {
    let class_data = args.class_data.clone().map(Bytes::from);
    let payload_format: &dyn Formatter = match view {
        PayloadView::Ints => &Int32Array,
        PayloadView::Text => &Opaque,
    };

    let mut builder = DataMessage::builder(args.class)
        .intent(args.intent)
        .msg_ref(args.msg_ref.unwrap_or(1))
        .dispatch_ref(args.dispatch_ref.unwrap_or(NO_REF));
    if let Some(payload) = payload {
        builder = builder.payload(payload_format, payload);
    }
    if let Some(class_data) = &class_data {
        builder = builder.class_data(&Text, class_data);
    }
    builder
        .build()
        .map_err(|err| frame_error("encode failed", err))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::LocalArgs;

    fn args() -> SendArgs {
        SendArgs {
            target: "localhost".to_string(),
            class: 42,
            intent: -1,
            msg_ref: None,
            dispatch_ref: None,
            data: None,
            ints: None,
            file: None,
            class_data: None,
            wait: false,
            wait_timeout: "5s".to_string(),
            local: LocalArgs {
                local_dir: None,
                fifo: false,
                tcp_only: false,
            },
        }
    }

    #[test]
    fn builds_envelope_with_header_fields() {
        let mut args = args();
        args.data = Some("ten bytes!".to_string());
        args.msg_ref = Some(9);
        args.class_data = Some("position".to_string());

        let (payload, view) = resolve_payload(&args).expect("payload should resolve");
        let envelope =
            build_envelope(&args, payload.as_ref(), view).expect("envelope should build");
        assert_eq!(envelope.class_id(), 42);
        assert_eq!(envelope.intent(), -1);
        assert_eq!(envelope.msg_ref(), 9);
        assert_eq!(envelope.dispatch_ref(), NO_REF);
        assert_eq!(&envelope.payload()[..], b"ten bytes!");
        let name = envelope
            .decode_class(&Text)
            .expect("class should decode")
            .expect("class should be present");
        assert_eq!(&name[..], b"position");
    }

    #[test]
    fn int_payload_is_native_words() {
        let mut args = args();
        args.ints = Some(vec![1, -1]);
        let (payload, view) = resolve_payload(&args).expect("payload should resolve");
        assert_eq!(view, PayloadView::Ints);
        let payload = payload.expect("payload should be present");
        assert_eq!(&payload[..4], &1i32.to_ne_bytes());
        assert_eq!(&payload[4..], &(-1i32).to_ne_bytes());
    }

    #[test]
    fn no_payload_sends_empty_segment() {
        let args = args();
        let (payload, view) = resolve_payload(&args).expect("payload should resolve");
        let envelope =
            build_envelope(&args, payload.as_ref(), view).expect("envelope should build");
        assert!(!envelope.has_payload());
        assert_eq!(envelope.msg_ref(), 1);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }
}
