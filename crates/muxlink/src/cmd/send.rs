use std::fs;

use muxlink_payload::{Envelope, JsonCodec};
use muxlink_peer::{ClientConfig, SyncClient};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{io_error, payload_error, peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;

    let envelope = args.secret.as_deref().map(Envelope::new);
    let outgoing = match &envelope {
        Some(envelope) => envelope
            .seal(&payload)
            .map_err(|err| payload_error("seal failed", err))?,
        None => payload,
    };

    // A one-shot command reports a dropped connection instead of redialing.
    let config = ClientConfig::new(args.addr.clone())
        .with_auth(args.tls.auth())
        .with_timeout(timeout)
        .with_auto_reconnect(false);
    let client = SyncClient::new(config).map_err(|err| peer_error("connect failed", err))?;

    client
        .send(&outgoing)
        .map_err(|err| peer_error("send failed", err))?;

    if args.wait {
        let reply = client
            .recv(Some(timeout))
            .map_err(|err| peer_error("receive failed", err))?
            .ok_or_else(|| {
                CliError::new(TIMEOUT, format!("no response within {timeout:?}"))
            })?;
        let shown = match &envelope {
            Some(envelope) => envelope
                .open(&reply)
                .map_err(|err| payload_error("response rejected", err))?,
            None => reply.to_vec(),
        };
        print_message(&shown, &args.addr, envelope.is_some(), format);
    }

    client.close();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        let value = JsonCodec::decode(json.as_bytes())
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return JsonCodec::encode(&value)
            .map_err(|err| payload_error("--json could not be encoded", err));
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            io_error(&format!("failed reading {}", path.display()), err, USAGE)
        });
    }
    Err(CliError::new(USAGE, "one of --json, --data or --file is required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::TlsArgs;

    fn args() -> SendArgs {
        SendArgs {
            addr: "127.0.0.1:9".to_string(),
            json: None,
            data: None,
            file: None,
            tls: TlsArgs::default(),
            secret: None,
            wait: false,
            timeout: "1s".to_string(),
        }
    }

    #[test]
    fn json_payload_is_compacted() {
        let args = SendArgs {
            json: Some("{ \"id\" : \"1\" }".to_string()),
            ..args()
        };
        assert_eq!(resolve_payload(&args).unwrap(), br#"{"id":"1"}"#);
    }

    #[test]
    fn invalid_json_is_a_usage_error() {
        let args = SendArgs {
            json: Some("{nope".to_string()),
            ..args()
        };
        assert_eq!(resolve_payload(&args).unwrap_err().code, USAGE);
    }

    #[test]
    fn missing_file_is_a_usage_error() {
        let args = SendArgs {
            file: Some("/nonexistent/muxlink-payload.bin".into()),
            ..args()
        };
        assert_eq!(resolve_payload(&args).unwrap_err().code, USAGE);
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let args = SendArgs {
            addr: addr.to_string(),
            data: Some("hi".to_string()),
            ..args()
        };
        let err = run(args, OutputFormat::Json).unwrap_err();
        assert_eq!(err.code, crate::exit::TRANSPORT_ERROR);
    }
}
