use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use testgrid_orchestrator::{Orchestrator, OrchestratorConfig};
use testgrid_runner::ProcessBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "testgrid_orchestrator=info,testgrid_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OrchestratorConfig::from_env();
    tracing::info!(?config, "Starting testgrid orchestrator");

    let backend = Arc::new(ProcessBackend::new(config.runner_command.clone()));
    let orchestrator = Orchestrator::start(config, backend).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    orchestrator.cleanup().await;

    Ok(())
}
