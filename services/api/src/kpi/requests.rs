use chrono::NaiveDate;
use serde::Deserialize;
use tally_db::kpi::models::{KpiFilter, KpiQuery};

/// Flat form of `KpiQuery` for the query string.
#[derive(Debug, Default, Deserialize)]
pub struct KpiQueryRequest {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub sort: Option<bool>,
    pub limit: Option<i64>,
}

impl KpiQueryRequest {
    pub fn into_query(self) -> KpiQuery {
        KpiQuery {
            filter: KpiFilter {
                year: self.year,
                month: self.month,
                from_date: self.from_date,
                to_date: self.to_date,
            },
            sort: self.sort.unwrap_or(true),
            limit: self.limit,
        }
    }
}
