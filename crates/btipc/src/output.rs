use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use btipc_frame::service::service_name;
use btipc_frame::Status;
use btipc_peer::{Event, Reply};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    /// Payload bytes only.
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
struct ReplyOutput<'a> {
    kind: &'static str,
    service_id: u8,
    service: &'a str,
    opcode: u8,
    status: String,
    status_code: u8,
    payload_size: usize,
    payload: String,
    fd: bool,
}

#[derive(Serialize)]
struct EventOutput<'a> {
    kind: &'static str,
    service_id: u8,
    service: &'a str,
    opcode: u8,
    payload_size: usize,
    payload: String,
    fd: bool,
    timestamp: String,
}

pub fn print_reply(service_id: u8, opcode: u8, reply: &Reply, format: OutputFormat) {
    let out = ReplyOutput {
        kind: "reply",
        service_id,
        service: service_name(service_id),
        opcode,
        status: reply.status.to_string(),
        status_code: reply.status.code(),
        payload_size: reply.payload.len(),
        payload: hex::encode(&reply.payload),
        fd: reply.fd.is_some(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVICE", "OPCODE", "STATUS", "SIZE", "FD", "PAYLOAD"])
                .add_row(vec![
                    out.service.to_string(),
                    format!("0x{:02x}", out.opcode),
                    out.status.clone(),
                    out.payload_size.to_string(),
                    out.fd.to_string(),
                    out.payload.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "service={} ({}) opcode=0x{:02x} status={} size={} fd={} payload={}",
                service_id,
                out.service,
                opcode,
                out.status,
                out.payload_size,
                out.fd,
                out.payload
            );
        }
        OutputFormat::Raw => print_raw(reply.payload.as_ref()),
    }
}

pub fn print_event(event: &Event, format: OutputFormat) {
    let out = EventOutput {
        kind: "event",
        service_id: event.service_id,
        service: service_name(event.service_id),
        opcode: event.opcode,
        payload_size: event.payload.len(),
        payload: hex::encode(&event.payload),
        fd: event.fd.is_some(),
        timestamp: now_unix_seconds(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVICE", "EVENT", "SIZE", "FD", "PAYLOAD"])
                .add_row(vec![
                    out.service.to_string(),
                    format!("0x{:02x}", out.opcode),
                    out.payload_size.to_string(),
                    out.fd.to_string(),
                    out.payload.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "event service={} ({}) opcode=0x{:02x} size={} fd={} payload={}",
                event.service_id, out.service, event.opcode, out.payload_size, out.fd, out.payload
            );
        }
        OutputFormat::Raw => print_raw(event.payload.as_ref()),
    }
}

/// One-line summary of a status-only command result.
pub fn print_status(service_id: u8, opcode: u8, status: Status, format: OutputFormat) {
    print_reply(
        service_id,
        opcode,
        &Reply {
            status,
            payload: bytes::Bytes::new(),
            fd: None,
        },
        format,
    );
}

fn print_json<T: Serialize>(out: &T) {
    println!(
        "{}",
        serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
