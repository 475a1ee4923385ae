use serde::Serialize;
use tally_db::kpi::query::KpiView;

#[derive(Debug, Serialize)]
pub struct KpiListResponse {
    pub kind: String,
    pub data: Vec<KpiView>,
    pub count: usize,
}
