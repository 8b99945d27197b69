//! Hook Relay Server binary.

use hook_relay_server::{RelayServer, init_tracing, load_config};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config file from the first argument, else RELAY_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RELAY_CONFIG").ok())
        .map(PathBuf::from);

    let config = load_config(config_path.as_deref())?;
    init_tracing(&config);

    let server = RelayServer::new(config)?;
    server.run().await?;

    Ok(())
}
