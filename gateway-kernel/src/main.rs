/**
 * GATEWAY KERNEL - process entry point
 *
 * Loads the configuration, builds the enabled collaborators (MQTT transport,
 * persistence, cloud connector), starts the router and runs until Ctrl-C.
 */

use anyhow::Context;
use gateway_kernel::{load_config, Collaborators, GatewayRouter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gateway_kernel=info")),
        )
        .init();

    let config = load_config().await;
    info!(
        location = %config.device.location_id,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        coap = config.features.enable_coap_server,
        "configuration loaded"
    );

    let collaborators = Collaborators::from_config(&config);
    let router = GatewayRouter::new(config, collaborators);
    router.start_manager().await.context("gateway failed to start")?;

    if let Some(addr) = router.coap_local_addr() {
        info!(%addr, "CoAP resource server listening");
    }

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    router.stop_manager().await;
    Ok(())
}
