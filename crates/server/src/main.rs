mod api;
mod auth;
mod background;
mod db;
mod retry;
mod router;
mod state;
mod webhook;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use chomp_engine::{Engine, EngineTunables, StepTimeouts};
use chomp_notify::{ErrorSink, TopicRouter};
use chomp_store::{PgCatalogSource, PgStore};

fn load_config() -> chomp_core::Config {
    chomp_core::config::load_dotenv();
    chomp_core::Config::from_env()
}

async fn migrate(config: &chomp_core::Config) -> anyhow::Result<()> {
    db::init_pg_pool(&config.database).await?;
    info!("Migrations complete");
    Ok(())
}

async fn serve(config: chomp_core::Config) -> anyhow::Result<()> {
    config.log_summary();

    let pool = db::init_pg_pool(&config.database).await?;
    let store = Arc::new(PgStore::new(pool.clone()));
    let catalog_source = Arc::new(PgCatalogSource::new(
        pool,
        config.object_store.prefix.clone(),
    ));
    let catalog_cache = Arc::new(chomp_catalog::CatalogCache::new(
        catalog_source,
        Duration::from_secs(config.engine.catalog_ttl_secs),
        Duration::from_millis(config.engine.catalog_read_timeout_ms),
    ));

    let tunables = EngineTunables {
        command_deadline: Duration::from_millis(config.engine.publish_timeout_ms)
            + Duration::from_millis(config.engine.state_write_timeout_ms),
        step_timeouts: StepTimeouts {
            state_read: Duration::from_millis(config.engine.state_read_timeout_ms),
            state_write: Duration::from_millis(config.engine.state_write_timeout_ms),
        },
        classification_ttl: Duration::from_secs(config.engine.classification_ttl_secs),
    };

    let engine = Arc::new(Engine::new(
        store.clone(),
        store,
        catalog_cache,
        Arc::new(TopicRouter::new()),
        tunables,
    ));

    // Snapshot exists before the first request lands.
    engine.refresh_leaderboard().await?;
    tokio::spawn(background::leaderboard_refresher(
        Arc::clone(&engine),
        Duration::from_secs(config.engine.leaderboard_refresh_secs),
    ));

    let state = Arc::new(state::AppState {
        error_sink: Arc::new(ErrorSink::new(config.error_sink.url.clone())),
        engine,
        config,
    });
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = load_config();
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("migrate") => migrate(&config).await?,
        Some("serve") | None => serve(config).await?,
        _ => {
            println!("chomp v{}", env!("CARGO_PKG_VERSION"));
            println!("Usage: server <command>");
            println!("  serve     Start the HTTP/WebSocket gateway (default)");
            println!("  migrate   Apply pending migrations and exit");
        }
    }

    Ok(())
}
