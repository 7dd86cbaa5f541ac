use std::sync::Arc;

use tracing::{info, warn};

mod bootstrap;
mod placeholders;

use bootstrap::Collaborators;
use cortex_channels::AdapterRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cortex=info,cortex_agent=info,cortex_router=info".into()),
        )
        .init();

    // Load config: explicit env path > ~/.cortex/cortex.toml
    let config_path = std::env::var("CORTEX_CONFIG").ok();
    let config = cortex_core::config::CortexConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            warn!("config load failed ({e}), using defaults");
            cortex_core::config::CortexConfig::default()
        });

    // The binary wires placeholder collaborators: a silent model, no
    // embedder, and an executor that rejects work. Deployments embed the
    // crates and inject real transports and providers here.
    let collaborators = Collaborators {
        model: Arc::new(placeholders::SilentModel),
        embedder: None,
        weight_model: Arc::new(placeholders::MidweightEvaluator),
        executor: Arc::new(placeholders::UnconfiguredExecutor),
        fact_model: None,
        adapters: AdapterRegistry::new(),
    };

    let system = bootstrap::build(config, collaborators)?;
    info!("cortex starting");
    system.run_until_shutdown().await;
    info!("cortex stopped");
    Ok(())
}
