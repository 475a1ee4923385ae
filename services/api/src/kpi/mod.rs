pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::get;
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/kpis/export", get(handlers::export_kpis))
        .route("/kpis/{kind}", get(handlers::list_kpis))
}
