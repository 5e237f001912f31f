use gatekeeper::clock::SystemClock;
use gatekeeper::config::{Config, TelemetryConfig};
use gatekeeper::store::MemoryStore;
use gatekeeper::ControlPlane;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

fn init_tracing(telemetry: &TelemetryConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&telemetry.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if telemetry.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing before config so override warnings are visible
    init_tracing(&TelemetryConfig::from_env());

    let config = Config::load_or_default();

    info!("================================================");
    info!("  GATEKEEPER — signal gate & circuit control v0.1.0");
    info!("================================================");

    if let Err(e) = config.validate() {
        error!("Config validation failed: {e}");
        return Err(e);
    }

    info!("--- Pipeline configuration ---");
    info!("  Confidence threshold: {}", config.pipeline.confidence_threshold);
    info!("  Entropy threshold:    {}", config.pipeline.entropy_threshold);
    info!("  Max data age:         {}s", config.pipeline.max_data_age_secs);
    info!("  Max latency:          {}ms", config.pipeline.max_latency_secs * 1000.0);
    info!("  Signed signals:       {}", config.pipeline.signing_key.is_some());

    info!("--- Risk configuration ---");
    info!("  Max daily risk:  {}%", config.risk.max_daily_risk * 100.0);
    info!("  Max leverage:    {}x", config.risk.max_leverage);
    info!(
        "  Full-leverage vol ceiling: {}%",
        config.risk.max_volatility_for_full_leverage * 100.0
    );

    info!("--- Breakers ---");
    info!("  Max daily loss:  {}%", config.breaker.max_daily_loss * 100.0);
    info!("  Max volatility:  {}%", config.breaker.max_volatility * 100.0);
    info!("  Max chaos level: {}", config.breaker.max_chaos_level);
    info!("  Cooldown:        {}s", config.breaker.cooldown_secs);

    info!("--- Modules ---");
    for module in &config.registry.modules {
        info!("  {} ({:?})", module.name, module.kind);
    }

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // The standalone binary keeps shared state in-process; collaborators
    // feed it through the same store interface.
    let clock = Arc::new(SystemClock);
    let backend = Arc::new(MemoryStore::new(clock.clone()));
    let plane = ControlPlane::new(config, backend, clock);

    let handles = plane.start(&shutdown_tx);

    info!("=== GATEKEEPER running ===");
    info!("Press Ctrl+C to shutdown.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Cleaning up...");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }

    plane.metrics().log_summary();
    plane.latency().log_summary();

    info!("GATEKEEPER shutdown complete.");
    Ok(())
}
