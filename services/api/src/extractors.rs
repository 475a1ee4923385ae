use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use tally_common::error::TallyError;
use tally_db::kpi::models::KpiQuery;

use crate::error::ApiError;
use crate::kpi::requests::KpiQueryRequest;

/// Query-string filter, checked before it reaches the store.
pub struct KpiParams(pub KpiQuery);

impl<S: Send + Sync> FromRequestParts<S> for KpiParams {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(request) = Query::<KpiQueryRequest>::try_from_uri(&parts.uri)
            .map_err(|e| TallyError::Validation(e.body_text()))?;

        let query = request.into_query();
        query.filter.resolve()?;
        query.validated_limit()?;

        Ok(KpiParams(query))
    }
}
