use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use chomp_core::config::DatabaseConfig;
use chomp_store::migrate;

/// Connect the pool and bring the schema up to date. A missing
/// DATABASE_URL is fatal; the engine cannot run without its store.
pub async fn init_pg_pool(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await?;
    info!("PostgreSQL connected");

    migrate::run_migrations(&pool).await?;
    info!("Schema up to date");
    Ok(pool)
}
