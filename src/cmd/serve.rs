//! HTTP server command: `ecosphere serve`.

use anyhow::Result;
use ecosphere::config::EcoToml;
use ecosphere::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: EcoToml,
    port: Option<u16>,
    no_scheduler: bool,
    dev: bool,
) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let mut server = ServerConfig::from_toml(&config);
    if let Some(port) = port {
        server.port = port;
    }
    if no_scheduler {
        server.scheduler = false;
    }
    server.dev_mode = dev;

    start_server(server).await
}
