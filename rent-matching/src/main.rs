use std::sync::Arc;

use rent_matching::config::{AppConfig, StorageBackend};
use rent_matching::events;
use rent_matching::store::{MatchingStore, MemoryStore, PgStore};
use rent_matching::{build_router, AppState};
use rent_shared::clients::db::create_pool;
use rent_shared::clients::rabbitmq::RabbitMQClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rent_shared::middleware::init_tracing("rent-matching");

    let config = AppConfig::load()?;
    let port = config.port;

    // Storage backend
    let store: Arc<dyn MatchingStore> = match config.storage {
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database_url, &config.pool_settings());
            Arc::new(PgStore::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; state is lost on restart");
            Arc::new(MemoryStore::new(config.grid_cell_deg))
        }
    };
    tracing::info!(backend = store.backend(), "storage ready");

    // Message bus is optional: without it, likes and matches still work but
    // no events go out and profiles are not synced.
    let rabbitmq = if config.rabbitmq_url.is_empty() {
        tracing::warn!("no rabbitmq url configured; events disabled");
        None
    } else {
        Some(RabbitMQClient::connect(&config.rabbitmq_url, &config.rabbitmq_exchange).await?)
    };

    let metrics = rent_shared::middleware::init_metrics()?;

    let mut state = AppState::new(store, config).with_metrics(metrics);
    if let Some(client) = rabbitmq.clone() {
        state = state.with_rabbitmq(client);
    }
    let state = Arc::new(state);

    // Spawn RabbitMQ subscriber for profile events
    if let Some(client) = rabbitmq {
        let sub_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = events::subscriber::listen_profile_events(sub_state, client).await {
                tracing::error!(error = %e, "profile event subscriber failed");
            }
        });
    }

    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "rent-matching starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
