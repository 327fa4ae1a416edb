use ledger_server::{Config, ServerState, setup_environment};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment (dotenv, working directory, logging)
    setup_environment()?;

    tracing::info!("VeriFactu ledger server starting...");

    // 2. Configuration
    let config = Config::from_env();

    // 3. Services
    let state = ServerState::initialize(&config).await?;

    // 4. Background workers (remision pipeline, integrity audit)
    let tasks = state.start_background_tasks();

    tracing::info!(
        environment = %config.environment,
        "VeriFactu ledger server running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    tasks.shutdown().await;
    tracing::info!("VeriFactu ledger server stopped");

    Ok(())
}
