use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Args, Subcommand};
use muxlink_peer::Mode;
use muxlink_transport::Auth;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an echo server.
    Serve(ServeArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Mutual-TLS material. All three files or none.
#[derive(Args, Debug, Default, Clone)]
pub struct TlsArgs {
    /// Certificate chain (PEM).
    #[arg(long, value_name = "PEM", requires_all = ["key", "ca"])]
    pub cert: Option<PathBuf>,
    /// Private key (PEM).
    #[arg(long, value_name = "PEM", requires_all = ["cert", "ca"])]
    pub key: Option<PathBuf>,
    /// Trust anchor for the peer's certificate (PEM).
    #[arg(long, value_name = "PEM", requires_all = ["cert", "key"])]
    pub ca: Option<PathBuf>,
}

impl TlsArgs {
    pub fn auth(&self) -> Option<Auth> {
        match (&self.cert, &self.key, &self.ca) {
            (Some(cert), Some(key), Some(ca)) => Some(Auth::new(cert, key, ca)),
            _ => None,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (host:port).
    pub addr: String,
    /// Execution strategy: thread, pool or event-loop.
    #[arg(long, default_value = "thread", value_parser = parse_mode)]
    pub mode: Mode,
    #[command(flatten)]
    pub tls: TlsArgs,
    /// Envelope secret; incoming payloads must be sealed with it.
    #[arg(long, env = "MUXLINK_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Worker threads (pool mode).
    #[arg(long, default_value_t = muxlink_peer::pool::DEFAULT_WORKERS)]
    pub workers: usize,
    /// Admission ceiling (pool mode).
    #[arg(long, default_value_t = muxlink_peer::pool::DEFAULT_MAX_PENDING)]
    pub max_pending: usize,
    /// Close connections idle for this long (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub read_timeout: String,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("payload").required(true).args(["json", "data", "file"])))]
pub struct SendArgs {
    /// Server address (host:port).
    pub addr: String,
    /// JSON payload.
    #[arg(long)]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long)]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    #[command(flatten)]
    pub tls: TlsArgs,
    /// Seal the payload (and open the response) with this secret.
    #[arg(long, env = "MUXLINK_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Wait for one response message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Connect and response timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_mode(input: &str) -> Result<Mode, String> {
    input.parse().map_err(|err: muxlink_peer::PeerError| err.to_string())
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

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
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn tls_args_require_all_files() {
        assert!(TlsArgs::default().auth().is_none());
        let full = TlsArgs {
            cert: Some("c.pem".into()),
            key: Some("k.pem".into()),
            ca: Some("ca.pem".into()),
        };
        let auth = full.auth().unwrap();
        assert_eq!(auth.ca_file, PathBuf::from("ca.pem"));
    }
}
