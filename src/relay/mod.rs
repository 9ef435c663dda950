pub mod dispatch;
pub mod event;
pub mod registry;
pub mod session;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(session::relay_ws))
}
