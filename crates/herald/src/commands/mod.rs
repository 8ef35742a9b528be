//! CLI command implementations.

use anyhow::Result;

use herald::client::HeraldClient;
use herald::config::Config;

pub mod send;
pub mod serve;
pub mod status;

/// Build a client for a running server.
///
/// An explicit `server` URL wins; otherwise the server is assumed to listen on
/// localhost at the configured (or overridden) port.
pub async fn connect(
    config_path: &str,
    port_override: Option<u16>,
    server: Option<&str>,
) -> Result<HeraldClient> {
    if let Some(url) = server {
        return Ok(HeraldClient::new(url));
    }
    let config = Config::load(config_path).await?;
    let port = port_override.unwrap_or(config.server.port);
    Ok(HeraldClient::new(&format!("http://127.0.0.1:{}", port)))
}
