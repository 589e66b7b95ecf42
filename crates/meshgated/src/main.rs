//! meshgated — the Meshtastic MQTT ↔ websocket bridge daemon.

mod bridge;
mod broker;
mod clients;
mod inbound;
mod ws;

use std::sync::Arc;

use anyhow::Result;

use bridge::Bridge;
use meshgate_core::config::MeshgateConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Log filtering comes from RUST_LOG; unset means quiet
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = MeshgateConfig::ensure_default_file()?;
    let config = MeshgateConfig::load()?;
    tracing::info!(
        config = %config_path.display(),
        broker = %config.broker.host,
        "meshgated starting"
    );

    let bridge = Arc::new(Bridge::new(config));

    let broker_task = tokio::spawn(broker::run(bridge.clone()));
    let ws_task = tokio::spawn(ws::serve(bridge));

    // Both tasks run forever; reaching select catches panics and fatal
    // bind errors
    tokio::select! {
        r = broker_task => tracing::error!("broker task exited: {:?}", r),
        r = ws_task => tracing::error!("websocket task exited: {:?}", r),
    }

    Ok(())
}
