mod config;
mod error;
mod routes;

use std::sync::Arc;

use fieldsync_core::db::Database;
use fieldsync_core::domain::{EntityApplier, SqliteEntityStore};
use fieldsync_core::SyncEngine;

use config::AppConfig;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fieldsync_server=info".parse().expect("valid directive"))
                .add_directive("fieldsync_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting fieldsync-server with config: {:?}", config);

    let journal = Arc::new(Database::open(&config.journal_db_path)?);
    let entities: Arc<dyn EntityApplier> =
        Arc::new(SqliteEntityStore::open(&config.entity_db_path)?);
    let engine = SyncEngine::new(journal, entities, config.sync_config()).await?;

    let worker = engine.start();

    let state = AppState {
        engine: Arc::clone(&engine),
    };
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("fieldsync-server listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;

    worker.stop().await;
    Ok(())
}
