use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipclink_frame::{DataMessage, EnvelopeConfig};
use ipclink_transport::{wait_readable, Connection, ModuleListener};
use tracing::{debug, info};

use crate::cmd::ListenArgs;
use crate::exit::{frame_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_envelope, OutputFormat, PayloadView};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = ModuleListener::bind(args.port, &args.local.listen_config())
        .map_err(|err| transport_error("bind failed", err))?;
    info!(port = listener.port(), local = ?listener.local_path(), "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let view = if args.ints {
        PayloadView::Ints
    } else {
        PayloadView::Text
    };
    let envelope_config = EnvelopeConfig::default();
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let conn = match listener.accept_timeout(Some(POLL_INTERVAL)) {
            Ok(Some(conn)) => conn,
            Ok(None) => continue,
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        debug!(connection = %conn.id(), peer = conn.peer(), "accepted");

        while running.load(Ordering::SeqCst) {
            if !readable(&conn)? {
                continue;
            }
            let envelope = match DataMessage::recv_on(&conn, &envelope_config) {
                Ok(envelope) => envelope,
                Err(err) if err.is_disconnect() => {
                    debug!(connection = %conn.id(), "peer closed");
                    break;
                }
                Err(err) => return Err(frame_error("receive failed", err)),
            };

            if let Some(classes) = &args.classes {
                if !classes.contains(&envelope.class_id()) {
                    continue;
                }
            }

            print_envelope(&envelope, conn.peer(), view, format);
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}

fn readable(conn: &Connection) -> CliResult<bool> {
    wait_readable(&[conn.read_fd()], Some(POLL_INTERVAL))
        .map(|ready| ready.is_some())
        .map_err(|err| transport_error("poll failed", err))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
