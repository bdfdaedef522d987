use newspulse::config::Config;
use newspulse::infrastructure::database::setup_database;
use newspulse::infrastructure::scheduler::ParseScheduler;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    // Default to info level in production; use RUST_LOG env var to override
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newspulse=info".into()),
        )
        .init();

    // Load configuration
    let config = Config::from_env().map_err(anyhow::Error::from_boxed)?;

    // Connect to the shared store; the schema is managed externally
    tracing::info!("Connecting to database");
    let db_pool = setup_database(&config.database_url).await?;

    // Root cancellation token: cancelled on shutdown so every worker
    // returns promptly from its current suspension point
    let shutdown = CancellationToken::new();

    // Start the ingestion scheduler (fires one immediate tick)
    tracing::info!("Starting news ingestion scheduler");
    let scheduler =
        ParseScheduler::new(db_pool, &config, shutdown.clone()).map_err(anyhow::Error::from_boxed)?;
    scheduler.start().await?;

    // Run until shutdown is requested; stop() cancels in-flight work and
    // waits out the grace period for tracked ticks
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, stopping scheduler");
    scheduler.stop().await?;

    Ok(())
}
