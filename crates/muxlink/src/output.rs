use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
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

/// One received message.
#[derive(Serialize)]
struct MessageOutput<'a> {
    event: &'static str,
    peer: &'a str,
    size: usize,
    sealed: bool,
    payload: String,
    timestamp: String,
}

/// Server start-up line, printed once the listener is bound.
#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    address: String,
    mode: &'a str,
    secure: bool,
    sealed: bool,
}

pub fn print_message(payload: &[u8], peer: &str, sealed: bool, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                event: "message",
                peer,
                size: payload.len(),
                sealed,
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PEER", "SIZE", "SEALED", "PAYLOAD"])
                .add_row(vec![
                    peer.to_string(),
                    payload.len().to_string(),
                    sealed.to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "peer={} size={} sealed={} payload={}",
                peer,
                payload.len(),
                sealed,
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_listening(
    addr: SocketAddr,
    mode: &str,
    secure: bool,
    sealed: bool,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            event: "listening",
            address: addr.to_string(),
            mode,
            secure,
            sealed,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["ADDRESS", "MODE", "TLS", "ENVELOPE"])
                .add_row(vec![
                    addr.to_string(),
                    mode.to_string(),
                    secure.to_string(),
                    sealed.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("listening on {addr} mode={mode} tls={secure} envelope={sealed}");
        }
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn payload_preview(payload: &[u8]) -> String {
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
