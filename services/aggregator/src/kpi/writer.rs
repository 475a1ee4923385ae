use std::sync::Arc;

use tally_common::error::{TallyError, TallyResult};
use tally_config::WriteStrategy;
use tally_db::kpi::models::{KpiMetrics, KpiRecord, YearMonth};
use tally_db::kpi::repositories::KpiRepository;
use tally_events::EventError;

use super::compute::KpiUpdate;

/// Applies deltas to the store with the configured write strategy.
pub struct KpiWriter {
    repo: Arc<dyn KpiRepository>,
    strategy: WriteStrategy,
    max_conflict_retries: u32,
}

impl KpiWriter {
    pub fn new(
        repo: Arc<dyn KpiRepository>,
        strategy: WriteStrategy,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            repo,
            strategy,
            max_conflict_retries,
        }
    }

    pub async fn apply(&self, period: YearMonth, delta: &KpiMetrics) -> TallyResult<KpiRecord> {
        match self.strategy {
            WriteStrategy::Atomic => self.repo.increment(period, delta).await,
            WriteStrategy::Optimistic => self.apply_optimistic(period, delta).await,
        }
    }

    /// Read, add, and save against the read version; re-read on conflict.
    async fn apply_optimistic(
        &self,
        period: YearMonth,
        delta: &KpiMetrics,
    ) -> TallyResult<KpiRecord> {
        let mut conflicts = 0;
        loop {
            let mut record = self.repo.get_or_create(delta.kind(), period).await?;
            record.metrics.add(delta)?;

            match self.repo.save(&record).await {
                Ok(saved) => return Ok(saved),
                Err(TallyError::Conflict(msg)) if conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    tracing::debug!(
                        kind = %delta.kind(),
                        %period,
                        attempt = conflicts,
                        reason = %msg,
                        "version conflict, retrying"
                    );
                    tokio::task::yield_now().await;
                }
                Err(TallyError::Conflict(msg)) => {
                    return Err(TallyError::Storage(format!(
                        "{} {period}: gave up after {} conflicting writes: {msg}",
                        delta.kind(),
                        conflicts + 1
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply every delta in order. A failure after at least one success is
    /// reported as a partial update naming what was committed.
    pub async fn apply_update(&self, update: &KpiUpdate) -> Result<(), EventError> {
        let mut applied: Vec<String> = Vec::with_capacity(update.deltas.len());
        for delta in &update.deltas {
            match self.apply(update.period, delta).await {
                Ok(record) => {
                    tracing::debug!(
                        kind = %delta.kind(),
                        period = %update.period,
                        version = record.version,
                        "kpi updated"
                    );
                    applied.push(delta.kind().to_string());
                }
                Err(e) if applied.is_empty() => return Err(e.into()),
                Err(e) => {
                    return Err(EventError::PartialUpdate {
                        applied,
                        failed: delta.kind().to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_db::kpi::memory_repository::MemoryKpiRepository;
    use tally_db::kpi::models::{
        KpiKind, KpiQuery, OrderMetrics, ResetSummary, RevenueMetrics, TransactionMetrics,
    };

    /// Delegates to memory, but refuses writes to one kind.
    pub(crate) struct BrokenKind {
        pub inner: MemoryKpiRepository,
        pub kind: KpiKind,
    }

    impl BrokenKind {
        fn check(&self, kind: KpiKind) -> TallyResult<()> {
            if kind == self.kind {
                return Err(TallyError::Storage("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KpiRepository for BrokenKind {
        async fn get_or_create(&self, kind: KpiKind, period: YearMonth) -> TallyResult<KpiRecord> {
            self.check(kind)?;
            self.inner.get_or_create(kind, period).await
        }

        async fn save(&self, record: &KpiRecord) -> TallyResult<KpiRecord> {
            self.check(record.kind())?;
            self.inner.save(record).await
        }

        async fn increment(&self, period: YearMonth, delta: &KpiMetrics) -> TallyResult<KpiRecord> {
            self.check(delta.kind())?;
            self.inner.increment(period, delta).await
        }

        async fn find(&self, kind: KpiKind, query: &KpiQuery) -> TallyResult<Vec<KpiRecord>> {
            self.inner.find(kind, query).await
        }

        async fn snapshot(&self) -> TallyResult<Vec<KpiRecord>> {
            self.inner.snapshot().await
        }

        async fn reset(&self, seed: Vec<KpiRecord>) -> TallyResult<ResetSummary> {
            self.inner.reset(seed).await
        }
    }

    /// Every save loses the race.
    struct AlwaysConflicts {
        inner: MemoryKpiRepository,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl KpiRepository for AlwaysConflicts {
        async fn get_or_create(&self, kind: KpiKind, period: YearMonth) -> TallyResult<KpiRecord> {
            self.inner.get_or_create(kind, period).await
        }

        async fn save(&self, _record: &KpiRecord) -> TallyResult<KpiRecord> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(TallyError::Conflict("version moved".into()))
        }

        async fn increment(&self, period: YearMonth, delta: &KpiMetrics) -> TallyResult<KpiRecord> {
            self.inner.increment(period, delta).await
        }

        async fn find(&self, kind: KpiKind, query: &KpiQuery) -> TallyResult<Vec<KpiRecord>> {
            self.inner.find(kind, query).await
        }

        async fn snapshot(&self) -> TallyResult<Vec<KpiRecord>> {
            self.inner.snapshot().await
        }

        async fn reset(&self, seed: Vec<KpiRecord>) -> TallyResult<ResetSummary> {
            self.inner.reset(seed).await
        }
    }

    fn march() -> YearMonth {
        YearMonth::new(2024, 3).unwrap()
    }

    fn order_update(amount: f64) -> KpiUpdate {
        KpiUpdate {
            period: march(),
            deltas: vec![
                KpiMetrics::Revenue(RevenueMetrics {
                    total_revenue: amount,
                }),
                KpiMetrics::Order(OrderMetrics {
                    total_orders: 1,
                    basket_size_sum: 2.0,
                    order_value_sum: amount,
                }),
            ],
        }
    }

    async fn stored(repo: &MemoryKpiRepository, kind: KpiKind) -> KpiMetrics {
        repo.get_or_create(kind, march()).await.unwrap().metrics
    }

    #[tokio::test]
    async fn both_strategies_apply_the_same_update() {
        for strategy in [WriteStrategy::Atomic, WriteStrategy::Optimistic] {
            let repo = MemoryKpiRepository::new();
            let writer = KpiWriter::new(Arc::new(repo.clone()), strategy, 3);

            writer.apply_update(&order_update(40.0)).await.unwrap();
            writer.apply_update(&order_update(60.0)).await.unwrap();

            assert_eq!(
                stored(&repo, KpiKind::Revenue).await,
                KpiMetrics::Revenue(RevenueMetrics {
                    total_revenue: 100.0
                })
            );
            assert_eq!(
                stored(&repo, KpiKind::Order).await,
                KpiMetrics::Order(OrderMetrics {
                    total_orders: 2,
                    basket_size_sum: 4.0,
                    order_value_sum: 100.0,
                })
            );
        }
    }

    #[tokio::test]
    async fn failure_on_first_delta_is_plain_storage_error() {
        let inner = MemoryKpiRepository::new();
        let repo = BrokenKind {
            inner: inner.clone(),
            kind: KpiKind::Revenue,
        };
        let writer = KpiWriter::new(Arc::new(repo), WriteStrategy::Atomic, 0);

        let err = writer.apply_update(&order_update(10.0)).await.unwrap_err();
        assert!(matches!(err, EventError::Storage(_)));
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn failure_after_a_commit_is_a_partial_update() {
        let inner = MemoryKpiRepository::new();
        let repo = BrokenKind {
            inner: inner.clone(),
            kind: KpiKind::Order,
        };
        let writer = KpiWriter::new(Arc::new(repo), WriteStrategy::Atomic, 0);

        let err = writer.apply_update(&order_update(10.0)).await.unwrap_err();
        match err {
            EventError::PartialUpdate {
                applied, failed, ..
            } => {
                assert_eq!(applied, vec!["revenue"]);
                assert_eq!(failed, "order");
            }
            other => panic!("expected partial update, got {other:?}"),
        }
        assert_eq!(inner.len(), 1);
    }

    #[tokio::test]
    async fn conflicts_give_up_after_the_retry_budget() {
        let repo = Arc::new(AlwaysConflicts {
            inner: MemoryKpiRepository::new(),
            saves: AtomicUsize::new(0),
        });
        let writer = KpiWriter::new(repo.clone(), WriteStrategy::Optimistic, 2);
        let delta = KpiMetrics::Transaction(TransactionMetrics {
            transaction_volume: 1.0,
            failed_transactions: 0,
        });

        let err = writer.apply(march(), &delta).await.unwrap_err();
        assert!(matches!(err, TallyError::Storage(_)));
        assert_eq!(repo.saves.load(Ordering::SeqCst), 3);
    }

    fn concurrent_total(strategy: WriteStrategy, amounts: &[u32]) -> (i64, f64) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let repo = MemoryKpiRepository::new();
            // Each conflict means another writer committed, so n retries always suffice.
            let writer = Arc::new(KpiWriter::new(
                Arc::new(repo.clone()),
                strategy,
                amounts.len() as u32,
            ));

            let mut tasks = tokio::task::JoinSet::new();
            for amount in amounts {
                let writer = Arc::clone(&writer);
                let update = order_update(f64::from(*amount));
                tasks.spawn(async move { writer.apply_update(&update).await });
            }
            while let Some(joined) = tasks.join_next().await {
                joined.unwrap().unwrap();
            }

            let KpiMetrics::Order(order) = stored(&repo, KpiKind::Order).await else {
                unreachable!();
            };
            (order.total_orders, order.order_value_sum)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn concurrent_writes_lose_nothing(
            amounts in prop::collection::vec(0u32..10_000, 1..40),
            optimistic in any::<bool>(),
        ) {
            let strategy = if optimistic {
                WriteStrategy::Optimistic
            } else {
                WriteStrategy::Atomic
            };
            let (orders, value) = concurrent_total(strategy, &amounts);
            let expected: u64 = amounts.iter().map(|a| u64::from(*a)).sum();

            prop_assert_eq!(orders, amounts.len() as i64);
            prop_assert_eq!(value, expected as f64);
        }
    }
}
