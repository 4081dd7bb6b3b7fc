use anyhow::{Context, Result};
use city_gateway::GatewayConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "city_gateway=info".into()),
        )
        .init();

    info!("City gateway starting...");

    let config = match std::env::var("CITY_GATEWAY_CONFIG") {
        Ok(path) => GatewayConfig::load(&path)
            .with_context(|| format!("Failed to load gateway config from {}", path))?,
        Err(_) => {
            info!("CITY_GATEWAY_CONFIG not set, using built-in routes");
            GatewayConfig::default()
        }
    };

    let server_handle = tokio::spawn(city_gateway::run(config));

    tokio::select! {
        result = server_handle => {
            result.context("Gateway task panicked")??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl_c signal")?;
            info!("Shutdown signal received");
        }
    }

    info!("City gateway stopped");
    Ok(())
}
