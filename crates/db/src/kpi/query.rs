use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::kpi::models::{KpiKind, KpiMetrics, KpiQuery, KpiRecord};
use crate::kpi::repositories::KpiRepository;
use tally_common::error::{TallyError, TallyResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueKpiView {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerGrowthKpiView {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub new_customers: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderKpiView {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub total_orders: i64,
    pub basket_size_sum: f64,
    pub order_value_sum: f64,
    pub avg_basket_size: f64,
    pub avg_order_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionKpiView {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub transaction_volume: f64,
    pub failed_transactions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceKpiView {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub invoices_issued: i64,
    pub overdue_invoices: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportKpiView {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub support_requests: i64,
    pub avg_response_time_total: f64,
    pub request_count: i64,
    pub avg_response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemKpiView {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub error_count: i64,
    pub total_requests: i64,
    pub system_error_rate: f64,
}

/// Raw accumulators plus the fields derived from them at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KpiView {
    Revenue(RevenueKpiView),
    CustomerGrowth(CustomerGrowthKpiView),
    Order(OrderKpiView),
    Transaction(TransactionKpiView),
    Invoice(InvoiceKpiView),
    Support(SupportKpiView),
    System(SystemKpiView),
}

impl From<&KpiRecord> for KpiView {
    fn from(record: &KpiRecord) -> Self {
        let (id, year, month) = (record.id, record.year, record.month);
        match record.metrics {
            KpiMetrics::Revenue(m) => KpiView::Revenue(RevenueKpiView {
                id,
                year,
                month,
                total_revenue: m.total_revenue,
            }),
            KpiMetrics::CustomerGrowth(m) => KpiView::CustomerGrowth(CustomerGrowthKpiView {
                id,
                year,
                month,
                new_customers: m.new_customers,
            }),
            KpiMetrics::Order(m) => KpiView::Order(OrderKpiView {
                id,
                year,
                month,
                total_orders: m.total_orders,
                basket_size_sum: m.basket_size_sum,
                order_value_sum: m.order_value_sum,
                avg_basket_size: m.avg_basket_size(),
                avg_order_value: m.avg_order_value(),
            }),
            KpiMetrics::Transaction(m) => KpiView::Transaction(TransactionKpiView {
                id,
                year,
                month,
                transaction_volume: m.transaction_volume,
                failed_transactions: m.failed_transactions,
            }),
            KpiMetrics::Invoice(m) => KpiView::Invoice(InvoiceKpiView {
                id,
                year,
                month,
                invoices_issued: m.invoices_issued,
                overdue_invoices: m.overdue_invoices,
            }),
            KpiMetrics::Support(m) => KpiView::Support(SupportKpiView {
                id,
                year,
                month,
                support_requests: m.support_requests,
                avg_response_time_total: m.avg_response_time_total,
                request_count: m.request_count,
                avg_response_time: m.avg_response_time(),
            }),
            KpiMetrics::System(m) => KpiView::System(SystemKpiView {
                id,
                year,
                month,
                error_count: m.error_count,
                total_requests: m.total_requests,
                system_error_rate: m.system_error_rate(),
            }),
        }
    }
}

/// Every record grouped by kind, as read in one snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KpiExport {
    pub generated_at: DateTime<Utc>,
    pub revenue: Vec<RevenueKpiView>,
    pub customer_growth: Vec<CustomerGrowthKpiView>,
    pub orders: Vec<OrderKpiView>,
    pub transactions: Vec<TransactionKpiView>,
    pub invoices: Vec<InvoiceKpiView>,
    pub support: Vec<SupportKpiView>,
    pub system: Vec<SystemKpiView>,
}

impl KpiExport {
    pub fn total(&self) -> usize {
        self.revenue.len()
            + self.customer_growth.len()
            + self.orders.len()
            + self.transactions.len()
            + self.invoices.len()
            + self.support.len()
            + self.system.len()
    }
}

/// Read-only access to the KPI store.
#[derive(Clone)]
pub struct KpiQueryService {
    repo: Arc<dyn KpiRepository>,
}

impl KpiQueryService {
    pub fn new(repo: Arc<dyn KpiRepository>) -> Self {
        Self { repo }
    }

    pub async fn by_kind(&self, kind: KpiKind, query: &KpiQuery) -> TallyResult<Vec<KpiView>> {
        let records = self.repo.find(kind, query).await?;
        tracing::debug!(%kind, count = records.len(), "kpi query");
        Ok(records.iter().map(KpiView::from).collect())
    }

    async fn typed<T>(
        &self,
        kind: KpiKind,
        query: &KpiQuery,
        pick: fn(KpiView) -> Option<T>,
    ) -> TallyResult<Vec<T>> {
        self.by_kind(kind, query)
            .await?
            .into_iter()
            .map(|view| {
                pick(view).ok_or_else(|| {
                    TallyError::Internal(format!("{kind} query returned a foreign record"))
                })
            })
            .collect()
    }

    pub async fn revenue(&self, query: &KpiQuery) -> TallyResult<Vec<RevenueKpiView>> {
        self.typed(KpiKind::Revenue, query, |v| match v {
            KpiView::Revenue(v) => Some(v),
            _ => None,
        })
        .await
    }

    pub async fn customer_growth(
        &self,
        query: &KpiQuery,
    ) -> TallyResult<Vec<CustomerGrowthKpiView>> {
        self.typed(KpiKind::CustomerGrowth, query, |v| match v {
            KpiView::CustomerGrowth(v) => Some(v),
            _ => None,
        })
        .await
    }

    pub async fn orders(&self, query: &KpiQuery) -> TallyResult<Vec<OrderKpiView>> {
        self.typed(KpiKind::Order, query, |v| match v {
            KpiView::Order(v) => Some(v),
            _ => None,
        })
        .await
    }

    pub async fn transactions(&self, query: &KpiQuery) -> TallyResult<Vec<TransactionKpiView>> {
        self.typed(KpiKind::Transaction, query, |v| match v {
            KpiView::Transaction(v) => Some(v),
            _ => None,
        })
        .await
    }

    pub async fn invoices(&self, query: &KpiQuery) -> TallyResult<Vec<InvoiceKpiView>> {
        self.typed(KpiKind::Invoice, query, |v| match v {
            KpiView::Invoice(v) => Some(v),
            _ => None,
        })
        .await
    }

    pub async fn support(&self, query: &KpiQuery) -> TallyResult<Vec<SupportKpiView>> {
        self.typed(KpiKind::Support, query, |v| match v {
            KpiView::Support(v) => Some(v),
            _ => None,
        })
        .await
    }

    pub async fn system(&self, query: &KpiQuery) -> TallyResult<Vec<SystemKpiView>> {
        self.typed(KpiKind::System, query, |v| match v {
            KpiView::System(v) => Some(v),
            _ => None,
        })
        .await
    }

    pub async fn export(&self) -> TallyResult<KpiExport> {
        let records = self.repo.snapshot().await?;
        let mut export = KpiExport {
            generated_at: Utc::now(),
            ..Default::default()
        };
        for record in &records {
            match KpiView::from(record) {
                KpiView::Revenue(v) => export.revenue.push(v),
                KpiView::CustomerGrowth(v) => export.customer_growth.push(v),
                KpiView::Order(v) => export.orders.push(v),
                KpiView::Transaction(v) => export.transactions.push(v),
                KpiView::Invoice(v) => export.invoices.push(v),
                KpiView::Support(v) => export.support.push(v),
                KpiView::System(v) => export.system.push(v),
            }
        }
        tracing::info!(records = export.total(), "kpi export prepared");
        Ok(export)
    }
}
