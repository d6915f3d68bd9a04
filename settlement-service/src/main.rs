use service_core::observability::init_tracing;
use settlement_service::config::SettlementConfig;
use settlement_service::services::init_metrics;
use settlement_service::startup::Application;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize metrics recorder (must be before any metrics are recorded)
    init_metrics();

    // Initialize tracing
    init_tracing("settlement-service", "info,settlement_service=debug");

    let config = SettlementConfig::load()?;
    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
