use async_trait::async_trait;

use crate::kpi::models::{KpiKind, KpiMetrics, KpiQuery, KpiRecord, ResetSummary, YearMonth};
use tally_common::error::TallyResult;

#[async_trait]
pub trait KpiRepository: Send + Sync {
    /// Unique record for the key, created zero-valued if absent.
    async fn get_or_create(&self, kind: KpiKind, period: YearMonth) -> TallyResult<KpiRecord>;

    /// Persist metric values. Fails with `Conflict` if the stored version
    /// differs from `record.version`; returns the record with its new version.
    async fn save(&self, record: &KpiRecord) -> TallyResult<KpiRecord>;

    /// Atomically create-if-absent and add `delta` to the record's accumulators.
    async fn increment(&self, period: YearMonth, delta: &KpiMetrics) -> TallyResult<KpiRecord>;

    async fn find(&self, kind: KpiKind, query: &KpiQuery) -> TallyResult<Vec<KpiRecord>>;

    /// Every record of every kind, read at a single point in time.
    async fn snapshot(&self) -> TallyResult<Vec<KpiRecord>>;

    /// Delete all records of all kinds, then insert `seed`.
    async fn reset(&self, seed: Vec<KpiRecord>) -> TallyResult<ResetSummary>;
}
