//! BTHome to WebSocket bridge.
//!
//! Run with: cargo run --bin bthome-bridge
//!
//! Wi-Fi credentials are compiled in from `BRIDGE_WIFI_SSID`,
//! `BRIDGE_WIFI_PASSWORD`, `BRIDGE_WIFI_AUTH` and `BRIDGE_WIFI_IFACE`.
//! `BRIDGE_PORT` overrides the listening port at runtime.

use bthome_ws_bridge::{halt, run, BridgeConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bthome_ws_bridge=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match BridgeConfig::from_env() {
        Ok(config) => {
            tracing::info!(
                "Starting bridge on {} for template {:02X?}",
                config.bind_addr,
                config.template.as_bytes()
            );
            run(config).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        halt(&e).await;
    }
}
