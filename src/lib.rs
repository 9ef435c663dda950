pub mod blob;
pub mod relay;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: store::MessageStore,
    pub registry: relay::registry::RoomRegistry,
    pub dispatcher: relay::dispatch::Dispatcher,
    pub blobs: Arc<dyn blob::BlobStore>,
    pub config: RelayConfig,
}

/// Runtime configuration, read once at startup from the environment.
#[derive(Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub blob_store_url: String,
    pub store_timeout: Duration,
    pub upload_timeout: Duration,
}

impl RelayConfig {
    pub fn from_env() -> AppResult<Self> {
        let database_url = dotenv::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL is not set")?;
        let bind_addr = dotenv::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
        let blob_store_url = dotenv::var("BLOB_STORE_URL")
            .unwrap_or_else(|_| "http://localhost:9000/upload".to_owned());
        let store_timeout = env_secs("STORE_TIMEOUT_SECS", 10)?;
        let upload_timeout = env_secs("UPLOAD_TIMEOUT_SECS", 30)?;

        Ok(Self {
            database_url,
            bind_addr,
            blob_store_url,
            store_timeout,
            upload_timeout,
        })
    }
}

fn env_secs(var: &str, default: u64) -> AppResult<Duration> {
    let secs = match dotenv::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("expected {var} to be a number of seconds, got {raw}"))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}

pub type AppResult<T> = Result<T, AppError>;
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{}\n\n{}", self.0, self.0.backtrace()),
        )
            .into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self(anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self(anyhow::Error::msg(err.to_owned()))
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(axum::Error);
apperr_impl!(reqwest::Error);
apperr_impl!(uuid::Error);
apperr_impl!(blob::UploadError);
