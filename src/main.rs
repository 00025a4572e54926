use anyhow::Result;
use hestia::config::Config;
use hestia::coordinator::{ChargingCoordinator, LoopOptions};
use hestia::dispatch::{HttpTransport, RateLimitedDispatcher};
use hestia::signing::CommandSigner;
use hestia::token::{Credential, HttpTokenRefresher, TokenLifecycleManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
    hestia::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?;

    info!(
        "Hestia smart charging coordinator {} starting up",
        env!("APP_VERSION")
    );

    let timeout = Duration::from_secs(config.api.timeout_seconds);
    let transport = Arc::new(HttpTransport::new(config.api.base_url.clone(), timeout)?);
    let dispatcher = RateLimitedDispatcher::new(transport, config.api.max_requests_per_second);

    let refresher = Arc::new(HttpTokenRefresher::new(config.api.auth_url.clone(), timeout)?);
    let tokens = Arc::new(TokenLifecycleManager::new(refresher));

    let signer = Arc::new(CommandSigner::from_config(&config.signing)?);
    if !signer.is_configured() {
        warn!("No signing key configured; privileged vehicle commands will be sent unsigned");
    }

    let client = Arc::new(hestia::api::FleetClient::new(
        dispatcher,
        Arc::clone(&tokens),
        signer,
    ));

    let coordinator = Arc::new(ChargingCoordinator::new(
        client.clone(),
        client,
        tokens,
        config.charging.clone(),
        config.tz(),
    ));

    // Credential comes from the environment until the OAuth flow hands one over
    if let (Ok(access), refresh) = (
        std::env::var("HESTIA_ACCESS_TOKEN"),
        std::env::var("HESTIA_REFRESH_TOKEN").ok(),
    ) {
        coordinator
            .set_credential(Credential {
                access_token: access,
                refresh_token: refresh,
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
            .await;
    } else {
        warn!("No HESTIA_ACCESS_TOKEN set; provider calls will fail until a credential is assigned");
    }

    coordinator
        .clone()
        .start_loop(LoopOptions {
            auto_execute: config.charging.auto_execute,
            ..LoopOptions::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start loop: {}", e))?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    if let Err(e) = coordinator.stop_loop().await {
        warn!("Stopping loop: {}", e);
    }
    Ok(())
}
