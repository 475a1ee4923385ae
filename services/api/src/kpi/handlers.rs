use axum::extract::{Path, State};
use axum::Json;
use tally_db::kpi::models::KpiKind;
use tally_db::kpi::query::KpiExport;

use crate::error::ApiError;
use crate::extractors::KpiParams;
use crate::kpi::responses::KpiListResponse;
use crate::AppState;

pub async fn list_kpis(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    KpiParams(query): KpiParams,
) -> Result<Json<KpiListResponse>, ApiError> {
    let kind: KpiKind = kind.parse()?;
    let data = state.queries.by_kind(kind, &query).await?;
    let count = data.len();
    Ok(Json(KpiListResponse {
        kind: kind.to_string(),
        data,
        count,
    }))
}

pub async fn export_kpis(State(state): State<AppState>) -> Result<Json<KpiExport>, ApiError> {
    let export = state.queries.export().await?;
    Ok(Json(export))
}
