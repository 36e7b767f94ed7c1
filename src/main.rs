use shuttle_pickups::config::AppConfig;
use shuttle_pickups::{db, runtime};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    let origin = db::origin_tag();
    info!("Starting shuttle pickups service as {}...", origin);

    // Init DB
    let pool = db::init_pool(&config, &origin).await?;
    info!("Connected to database");
    db::ensure_schema(&pool).await?;

    // Start background tasks
    let runtime = runtime::start(&config, pool, origin).await?;
    let stats = runtime.processor().stats();
    info!("{} active pickups at startup", stats.active_pickups);

    tokio::signal::ctrl_c().await?;
    info!("Received ctrl-c, shutting down");
    runtime.shutdown().await?;

    Ok(())
}
