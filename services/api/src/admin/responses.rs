use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub deleted: u64,
    pub inserted: u64,
    pub per_kind: BTreeMap<String, usize>,
}
