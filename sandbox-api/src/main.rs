use anyhow::Result;
use sandbox_api::{create_app, start_sweep_task, AppState, Config};
use sandbox_lifecycle::db::{backup_database, run_migrations, shared_pool};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("sandbox_api=debug,sandbox_lifecycle=debug,tower_http=debug")
        .init();

    info!("Starting sandbox-api service...");

    // Load configuration
    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, db_path={}",
        config.bind_addr,
        config.db_path.display()
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    // Create the process-wide pool and run migrations
    let pool = shared_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let state = AppState::from_config(pool, &config)?;

    // Start sweep task
    tokio::spawn(start_sweep_task(
        state.sweeper.clone(),
        config.sweep_interval_secs,
    ));
    info!(
        "Sweep task started (interval: {}s)",
        config.sweep_interval_secs
    );

    // Create app
    let app = create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
