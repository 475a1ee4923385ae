use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use tally_db::kpi::seed::seed_records;

use crate::admin::responses::ResetResponse;
use crate::error::ApiError;
use crate::AppState;

pub async fn reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, ApiError> {
    let seed = seed_records();
    let mut per_kind = BTreeMap::new();
    for record in &seed {
        *per_kind.entry(record.kind().to_string()).or_insert(0) += 1;
    }

    let summary = state.kpi_repo.reset(seed).await?;
    tracing::warn!(
        deleted = summary.deleted,
        inserted = summary.inserted,
        "kpi store reset to seed data"
    );

    Ok(Json(ResetResponse {
        deleted: summary.deleted,
        inserted: summary.inserted,
        per_kind,
    }))
}
