use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ipclink_frame::{DataMessage, Int32Array};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
stru/// How to render payload bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadView {
    /// UTF-8 text when valid, otherwise a size marker.
    #[default]
    Text,
    /// Native 32-bit integers, swapped from the sender's byte order.
    Ints,
}

#[derive(Serialize)]
struct EnvelopeOutput<'a> {
    class: u16,
    intent: i32,
    msg_ref: i32,
    dispatch_ref: i32,
    parent_ref: i32,
    byte_order: &'static str,
    class_size: usize,
    payload_size: usize,
    class_data: String,
    payload: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_envelope(envelope: &DataMessage, peer: &str, view: PayloadView, format: OutputFormat) {
    let payload = payload_preview(envelope, view);
    let class_data = text_preview(envelope.class_data());
    match format {
        OutputFormat::Json => {
            let out = EnvelopeOutput {
                class: envelope.class_id(),
                intent: envelope.intent(),
                msg_ref: envelope.msg_ref(),
                dispatch_ref: envelope.dispatch_ref(),
                parent_ref: envelope.parent_ref(),
                byte_order: envelope.classifier().data_order.as_str(),
                class_size: envelope.class_data().len(),
                payload_size: envelope.payload().len(),
                class_data,
                payload,
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CLASS", "INTENT", "REF", "DISPATCH", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    envelope.class_id().to_string(),
                    envelope.intent().to_string(),
                    envelope.msg_ref().to_string(),
                    envelope.dispatch_ref().to_string(),
                    envelope.payload().len().to_string(),
                    peer.to_string(),
                    payload,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "class={} intent={} ref={} dispatch={} size={} peer={} payload={}",
                envelope.class_id(),
                envelope.intent(),
                envelope.msg_ref(),
                envelope.dispatch_ref(),
                envelope.payload().len(),
                peer,
                payload
            );
        }
        OutputFormat::Raw => {
            print_raw(envelope.payload());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(envelope: &DataMessage, view: PayloadView) -> String {
    if view == PayloadView::Text {
        return text_preview(envelope.payload());
    }
    match envelope.decode_payload(&Int32Array) {
        Ok(Some(decoded)) => int_preview(&decoded),
        Ok(None) => String::new(),
        Err(err) => format!("<undecodable: {err}>"),
    }
}

fn int_preview(data: &[u8]) -> String {
    let values: Vec<String> = data
        .chunks_exact(4)
        .filter_map(|chunk| chunk.try_into().ok())
        .map(|word: [u8; 4]| i32::from_ne_bytes(word).to_string())
        .collect();
    format!("[{}]", values.join(", "))
}

fn text_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
