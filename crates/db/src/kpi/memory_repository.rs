use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::kpi::models::{KpiKind, KpiMetrics, KpiQuery, KpiRecord, ResetSummary, YearMonth};
use crate::kpi::repositories::KpiRepository;
use tally_common::error::{TallyError, TallyResult};

type Key = (KpiKind, YearMonth);

/// Process-local store. Every operation runs under one lock, so
/// `increment` and the version check in `save` are atomic.
#[derive(Clone, Default)]
pub struct MemoryKpiRepository {
    records: Arc<Mutex<HashMap<Key, KpiRecord>>>,
}

impl MemoryKpiRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TallyResult<MutexGuard<'_, HashMap<Key, KpiRecord>>> {
        self.records
            .lock()
            .map_err(|_| TallyError::Storage("memory store lock poisoned".to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KpiRepository for MemoryKpiRepository {
    async fn get_or_create(&self, kind: KpiKind, period: YearMonth) -> TallyResult<KpiRecord> {
        let mut records = self.lock()?;
        let record = records
            .entry((kind, period))
            .or_insert_with(|| KpiRecord::new(kind, period));
        Ok(record.clone())
    }

    async fn save(&self, record: &KpiRecord) -> TallyResult<KpiRecord> {
        let mut records = self.lock()?;
        let stored = records
            .get_mut(&(record.kind(), record.period()))
            .ok_or_else(|| {
                TallyError::NotFound(format!("{} record {}", record.kind(), record.period()))
            })?;

        if stored.version != record.version {
            return Err(TallyError::Conflict(format!(
                "{} {} is at version {}, write was based on {}",
                record.kind(),
                record.period(),
                stored.version,
                record.version
            )));
        }

        stored.metrics = record.metrics;
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn increment(&self, period: YearMonth, delta: &KpiMetrics) -> TallyResult<KpiRecord> {
        let kind = delta.kind();
        let mut records = self.lock()?;
        let stored = records
            .entry((kind, period))
            .or_insert_with(|| KpiRecord::new(kind, period));
        stored.metrics.add(delta)?;
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn find(&self, kind: KpiKind, query: &KpiQuery) -> TallyResult<Vec<KpiRecord>> {
        let clause = query.filter.resolve()?;
        let limit = query.validated_limit()?;

        let records = self.lock()?;
        let mut found: Vec<KpiRecord> = records
            .iter()
            .filter(|((k, period), _)| *k == kind && clause.matches(*period))
            .map(|(_, record)| record.clone())
            .collect();
        drop(records);

        if query.sort {
            found.sort_by_key(|r| r.period());
        }
        if let Some(limit) = limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn snapshot(&self) -> TallyResult<Vec<KpiRecord>> {
        let records = self.lock()?;
        let mut all: Vec<KpiRecord> = records.values().cloned().collect();
        all.sort_by_key(|r| (r.kind(), r.period()));
        Ok(all)
    }

    async fn reset(&self, seed: Vec<KpiRecord>) -> TallyResult<ResetSummary> {
        let mut fresh = HashMap::with_capacity(seed.len());
        for record in seed {
            let key = (record.kind(), record.period());
            if fresh.insert(key, record).is_some() {
                return Err(TallyError::Validation(format!(
                    "seed contains duplicate {} record for {}",
                    key.0, key.1
                )));
            }
        }

        let mut records = self.lock()?;
        let deleted = records.len() as u64;
        let inserted = fresh.len() as u64;
        *records = fresh;
        Ok(ResetSummary { deleted, inserted })
    }
}
