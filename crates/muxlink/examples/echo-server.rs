//! Pool-mode echo server with a client exchanging one sealed JSON message.
//!
//! Run with:
//!   cargo run -p muxlink --example echo-server
//!
//! To keep a server running for manual testing instead:
//!   cargo run -p muxlink --features cli -- serve 127.0.0.1:9000 --mode pool

use std::thread;
use std::time::Duration;

use muxlink::payload::{Envelope, JsonCodec};
use muxlink::peer::{ClientConfig, Echo, Mode, Server, ServerConfig, SyncClient};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::new("127.0.0.1:0").with_mode(Mode::Pool);
    let server = Server::bind(config, Echo)?;
    let addr = server.local_addr().to_string();
    let handle = server.shutdown_handle();
    eprintln!("Listening on {addr} ({} mode)", server.mode().as_str());
    let serving = thread::spawn(move || server.serve());

    let envelope = Envelope::new("example-secret");
    let client = SyncClient::new(ClientConfig::new(addr))?;
    client.send(&envelope.seal(&JsonCodec::encode(&json!({ "hello": "world" }))?)?)?;

    match client.recv(Some(Duration::from_secs(5)))? {
        Some(reply) => {
            let value = JsonCodec::decode(&envelope.open(&reply)?)?;
            eprintln!("Echoed {} bytes: {value}", reply.len());
        }
        None => eprintln!("No reply within 5s"),
    }
    client.close();

    handle.shutdown();
    if let Ok(result) = serving.join() {
        result?;
    }
    eprintln!("Server stopped: {:?}", handle.stats());
    Ok(())
}
