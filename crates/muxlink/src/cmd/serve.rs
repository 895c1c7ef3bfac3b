use std::sync::Arc;

use muxlink_payload::{Envelope, JsonCodec};
use muxlink_peer::{
    Echo, HandlerResult, LoopConfig, MessageHandler, Server, ServerConfig, ShutdownHandle,
};
use tracing::info;

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

/// Opens each sealed message, logs its JSON content and echoes the sealed
/// bytes unchanged. Messages that fail verification get no response.
struct SealedEcho {
    envelope: Envelope,
}

impl MessageHandler for SealedEcho {
    fn handle(&self, payload: &[u8]) -> HandlerResult {
        let plain = self.envelope.open(payload)?;
        match JsonCodec::decode(&plain) {
            Ok(value) => info!(message = %value, "received"),
            Err(_) => info!(size = plain.len(), "received non-JSON payload"),
        }
        Ok(Some(payload.to_vec()))
    }
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let read_timeout = parse_duration(&args.read_timeout)?;
    let auth = args.tls.auth();
    let secure = auth.is_some();
    let config = ServerConfig::new(args.addr.clone())
        .with_mode(args.mode)
        .with_auth(auth)
        .with_workers(args.workers)
        .with_max_pending(args.max_pending)
        .with_loop_config(LoopConfig::default().with_read_timeout(read_timeout));

    let sealed = args.secret.is_some();
    let handler: Arc<dyn MessageHandler> = match args.secret {
        Some(secret) => Arc::new(SealedEcho {
            envelope: Envelope::new(secret),
        }),
        None => Arc::new(Echo),
    };

    let server =
        Server::bind_shared(config, handler).map_err(|err| peer_error("bind failed", err))?;
    let handle = server.shutdown_handle();
    install_ctrlc_handler(handle.clone())?;

    print_listening(
        server.local_addr(),
        server.mode().as_str(),
        secure,
        sealed,
        format,
    );
    server
        .serve()
        .map_err(|err| peer_error("server failed", err))?;

    let stats = handle.stats();
    info!(
        accepted = stats.accepted,
        refused = stats.refused,
        completed = stats.completed,
        "server exited"
    );
    Ok(SUCCESS)
}

fn install_ctrlc_handler(handle: ShutdownHandle) -> CliResult<()> {
    ctrlc::set_handler(move || handle.shutdown()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use muxlink_payload::PayloadError;

    use super::*;

    fn handler() -> SealedEcho {
        SealedEcho {
            envelope: Envelope::new("xabc").with_iterations(8),
        }
    }

    #[test]
    fn sealed_echo_returns_the_original_blob() {
        let handler = handler();
        let blob = handler.envelope.seal(br#"{"id":"1"}"#).unwrap();
        assert_eq!(handler.handle(&blob).unwrap(), Some(blob));
    }

    #[test]
    fn sealed_echo_rejects_unsealed_payloads() {
        let err = handler().handle(b"plain text").unwrap_err();
        let payload_err = err.downcast_ref::<PayloadError>().unwrap();
        assert!(payload_err.is_security());
    }
}
