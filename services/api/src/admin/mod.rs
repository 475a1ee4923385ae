pub mod handlers;
pub mod responses;

use axum::routing::post;
use axum::Router;

use crate::AppState;

/// Destructive endpoints. Only mounted in development.
pub fn router() -> Router<AppState> {
    Router::new().route("/admin/reset", post(handlers::reset))
}
