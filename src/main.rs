use std::sync::Arc;

use axum::{Router, routing::get};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;
use wirechat::blob::HttpBlobStore;
use wirechat::relay::{self, dispatch::Dispatcher, registry::RoomRegistry};
use wirechat::store::MessageStore;
use wirechat::{AppState, RelayConfig};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::from_env().unwrap();

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
        .unwrap();
    let store = MessageStore::new(db_pool);
    store.migrate().await.unwrap();

    let registry = RoomRegistry::new();
    let app_state = AppState {
        store,
        dispatcher: Dispatcher::new(registry.clone()),
        registry,
        blobs: Arc::new(HttpBlobStore::new(&config.blob_store_url)),
        config: config.clone(),
    };

    let app = Router::new()
        .route("/", get(index))
        .merge(relay::router())
        // the mobile clients connect from anywhere
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap();
    tracing::info!(addr = %config.bind_addr, "relay listening");
    axum::serve(listener, app).await.unwrap();
}

async fn index() -> &'static str {
    "wirechat relay\n"
}
