use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_common::error::{TallyError, TallyResult};

/// Natural key of a monthly KPI record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: i32,
}

impl YearMonth {
    pub fn new(year: i32, month: i32) -> TallyResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(TallyError::Validation(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn of<D: Datelike>(date: &D) -> Self {
        Self {
            year: date.year(),
            month: date.month() as i32,
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month as u32, 1)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiKind {
    Revenue,
    CustomerGrowth,
    Order,
    Transaction,
    Invoice,
    Support,
    System,
}

impl KpiKind {
    pub const ALL: [KpiKind; 7] = [
        KpiKind::Revenue,
        KpiKind::CustomerGrowth,
        KpiKind::Order,
        KpiKind::Transaction,
        KpiKind::Invoice,
        KpiKind::Support,
        KpiKind::System,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            KpiKind::Revenue => "revenue",
            KpiKind::CustomerGrowth => "customer_growth",
            KpiKind::Order => "order",
            KpiKind::Transaction => "transaction",
            KpiKind::Invoice => "invoice",
            KpiKind::Support => "support",
            KpiKind::System => "system",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            KpiKind::Revenue => "revenue_kpis",
            KpiKind::CustomerGrowth => "customer_growth_kpis",
            KpiKind::Order => "order_kpis",
            KpiKind::Transaction => "transaction_kpis",
            KpiKind::Invoice => "invoice_kpis",
            KpiKind::Support => "support_kpis",
            KpiKind::System => "system_kpis",
        }
    }

    /// Accumulator columns in storage order.
    pub fn columns(self) -> &'static [MetricColumn] {
        match self {
            KpiKind::Revenue => REVENUE_COLUMNS,
            KpiKind::CustomerGrowth => CUSTOMER_GROWTH_COLUMNS,
            KpiKind::Order => ORDER_COLUMNS,
            KpiKind::Transaction => TRANSACTION_COLUMNS,
            KpiKind::Invoice => INVOICE_COLUMNS,
            KpiKind::Support => SUPPORT_COLUMNS,
            KpiKind::System => SYSTEM_COLUMNS,
        }
    }
}

const REVENUE_COLUMNS: &[MetricColumn] = &[MetricColumn::new("total_revenue", MetricType::Sum)];

const CUSTOMER_GROWTH_COLUMNS: &[MetricColumn] =
    &[MetricColumn::new("new_customers", MetricType::Count)];

const ORDER_COLUMNS: &[MetricColumn] = &[
    MetricColumn::new("total_orders", MetricType::Count),
    MetricColumn::new("basket_size_sum", MetricType::Sum),
    MetricColumn::new("order_value_sum", MetricType::Sum),
];

const TRANSACTION_COLUMNS: &[MetricColumn] = &[
    MetricColumn::new("transaction_volume", MetricType::Sum),
    MetricColumn::new("failed_transactions", MetricType::Count),
];

const INVOICE_COLUMNS: &[MetricColumn] = &[
    MetricColumn::new("invoices_issued", MetricType::Count),
    MetricColumn::new("overdue_invoices", MetricType::Count),
];

const SUPPORT_COLUMNS: &[MetricColumn] = &[
    MetricColumn::new("support_requests", MetricType::Count),
    MetricColumn::new("avg_response_time_total", MetricType::Sum),
    MetricColumn::new("request_count", MetricType::Count),
];

const SYSTEM_COLUMNS: &[MetricColumn] = &[
    MetricColumn::new("error_count", MetricType::Count),
    MetricColumn::new("total_requests", MetricType::Count),
];

impl fmt::Display for KpiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KpiKind {
    type Err = TallyError;

    /// Accepts the snake_case name, the kebab-case URL form and plurals
    /// (`customer-growth`, `orders`, `transactions`, `invoices`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        let kind = match normalized.as_str() {
            "revenue" => KpiKind::Revenue,
            "customer_growth" => KpiKind::CustomerGrowth,
            "order" | "orders" => KpiKind::Order,
            "transaction" | "transactions" => KpiKind::Transaction,
            "invoice" | "invoices" => KpiKind::Invoice,
            "support" => KpiKind::Support,
            "system" => KpiKind::System,
            _ => return Err(TallyError::NotFound(format!("unknown KPI kind: {s}"))),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Count,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricColumn {
    pub name: &'static str,
    pub ty: MetricType,
}

impl MetricColumn {
    const fn new(name: &'static str, ty: MetricType) -> Self {
        Self { name, ty }
    }
}

/// A single accumulator value as it is bound to or read from storage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Count(i64),
    Sum(f64),
}

/// `numerator / denominator`, or 0 when nothing has been counted yet.
pub fn ratio(numerator: f64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueMetrics {
    pub total_revenue: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerGrowthMetrics {
    pub new_customers: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderMetrics {
    pub total_orders: i64,
    pub basket_size_sum: f64,
    pub order_value_sum: f64,
}

impl OrderMetrics {
    pub fn avg_basket_size(&self) -> f64 {
        ratio(self.basket_size_sum, self.total_orders)
    }

    pub fn avg_order_value(&self) -> f64 {
        ratio(self.order_value_sum, self.total_orders)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetrics {
    pub transaction_volume: f64,
    pub failed_transactions: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceMetrics {
    pub invoices_issued: i64,
    pub overdue_invoices: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportMetrics {
    pub support_requests: i64,
    pub avg_response_time_total: f64,
    pub request_count: i64,
}

impl SupportMetrics {
    pub fn avg_response_time(&self) -> f64 {
        ratio(self.avg_response_time_total, self.request_count)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub error_count: i64,
    pub total_requests: i64,
}

impl SystemMetrics {
    pub fn system_error_rate(&self) -> f64 {
        ratio(self.error_count as f64, self.total_requests)
    }
}

/// Accumulators of one KPI kind. Also used as an additive delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KpiMetrics {
    Revenue(RevenueMetrics),
    CustomerGrowth(CustomerGrowthMetrics),
    Order(OrderMetrics),
    Transaction(TransactionMetrics),
    Invoice(InvoiceMetrics),
    Support(SupportMetrics),
    System(SystemMetrics),
}

impl KpiMetrics {
    pub fn zero(kind: KpiKind) -> Self {
        match kind {
            KpiKind::Revenue => KpiMetrics::Revenue(RevenueMetrics::default()),
            KpiKind::CustomerGrowth => KpiMetrics::CustomerGrowth(CustomerGrowthMetrics::default()),
            KpiKind::Order => KpiMetrics::Order(OrderMetrics::default()),
            KpiKind::Transaction => KpiMetrics::Transaction(TransactionMetrics::default()),
            KpiKind::Invoice => KpiMetrics::Invoice(InvoiceMetrics::default()),
            KpiKind::Support => KpiMetrics::Support(SupportMetrics::default()),
            KpiKind::System => KpiMetrics::System(SystemMetrics::default()),
        }
    }

    pub fn kind(&self) -> KpiKind {
        match self {
            KpiMetrics::Revenue(_) => KpiKind::Revenue,
            KpiMetrics::CustomerGrowth(_) => KpiKind::CustomerGrowth,
            KpiMetrics::Order(_) => KpiKind::Order,
            KpiMetrics::Transaction(_) => KpiKind::Transaction,
            KpiMetrics::Invoice(_) => KpiKind::Invoice,
            KpiMetrics::Support(_) => KpiKind::Support,
            KpiMetrics::System(_) => KpiKind::System,
        }
    }

    /// Add `delta` field by field. Both sides must be of the same kind.
    pub fn add(&mut self, delta: &KpiMetrics) -> TallyResult<()> {
        match (self, delta) {
            (KpiMetrics::Revenue(m), KpiMetrics::Revenue(d)) => {
                m.total_revenue += d.total_revenue;
            }
            (KpiMetrics::CustomerGrowth(m), KpiMetrics::CustomerGrowth(d)) => {
                m.new_customers += d.new_customers;
            }
            (KpiMetrics::Order(m), KpiMetrics::Order(d)) => {
                m.total_orders += d.total_orders;
                m.basket_size_sum += d.basket_size_sum;
                m.order_value_sum += d.order_value_sum;
            }
            (KpiMetrics::Transaction(m), KpiMetrics::Transaction(d)) => {
                m.transaction_volume += d.transaction_volume;
                m.failed_transactions += d.failed_transactions;
            }
            (KpiMetrics::Invoice(m), KpiMetrics::Invoice(d)) => {
                m.invoices_issued += d.invoices_issued;
                m.overdue_invoices += d.overdue_invoices;
            }
            (KpiMetrics::Support(m), KpiMetrics::Support(d)) => {
                m.support_requests += d.support_requests;
                m.avg_response_time_total += d.avg_response_time_total;
                m.request_count += d.request_count;
            }
            (KpiMetrics::System(m), KpiMetrics::System(d)) => {
                m.error_count += d.error_count;
                m.total_requests += d.total_requests;
            }
            (m, d) => {
                return Err(TallyError::Internal(format!(
                    "cannot add {} delta to {} metrics",
                    d.kind(),
                    m.kind()
                )))
            }
        }
        Ok(())
    }

    /// Values in the order of `KpiKind::columns`.
    pub fn values(&self) -> Vec<MetricValue> {
        use MetricValue::{Count, Sum};
        match self {
            KpiMetrics::Revenue(m) => vec![Sum(m.total_revenue)],
            KpiMetrics::CustomerGrowth(m) => vec![Count(m.new_customers)],
            KpiMetrics::Order(m) => vec![
                Count(m.total_orders),
                Sum(m.basket_size_sum),
                Sum(m.order_value_sum),
            ],
            KpiMetrics::Transaction(m) => {
                vec![Sum(m.transaction_volume), Count(m.failed_transactions)]
            }
            KpiMetrics::Invoice(m) => vec![Count(m.invoices_issued), Count(m.overdue_invoices)],
            KpiMetrics::Support(m) => vec![
                Count(m.support_requests),
                Sum(m.avg_response_time_total),
                Count(m.request_count),
            ],
            KpiMetrics::System(m) => vec![Count(m.error_count), Count(m.total_requests)],
        }
    }

    /// Inverse of `values`.
    pub fn from_values(kind: KpiKind, values: &[MetricValue]) -> TallyResult<Self> {
        let expected = kind.columns().len();
        if values.len() != expected {
            return Err(TallyError::Internal(format!(
                "{kind} expects {expected} metric values, got {}",
                values.len()
            )));
        }
        let count = |i: usize| match values[i] {
            MetricValue::Count(v) => Ok(v),
            MetricValue::Sum(_) => Err(TallyError::Internal(format!(
                "{kind} column {} is a count",
                kind.columns()[i].name
            ))),
        };
        let sum = |i: usize| match values[i] {
            MetricValue::Sum(v) => Ok(v),
            MetricValue::Count(_) => Err(TallyError::Internal(format!(
                "{kind} column {} is a sum",
                kind.columns()[i].name
            ))),
        };

        let metrics = match kind {
            KpiKind::Revenue => KpiMetrics::Revenue(RevenueMetrics {
                total_revenue: sum(0)?,
            }),
            KpiKind::CustomerGrowth => KpiMetrics::CustomerGrowth(CustomerGrowthMetrics {
                new_customers: count(0)?,
            }),
            KpiKind::Order => KpiMetrics::Order(OrderMetrics {
                total_orders: count(0)?,
                basket_size_sum: sum(1)?,
                order_value_sum: sum(2)?,
            }),
            KpiKind::Transaction => KpiMetrics::Transaction(TransactionMetrics {
                transaction_volume: sum(0)?,
                failed_transactions: count(1)?,
            }),
            KpiKind::Invoice => KpiMetrics::Invoice(InvoiceMetrics {
                invoices_issued: count(0)?,
                overdue_invoices: count(1)?,
            }),
            KpiKind::Support => KpiMetrics::Support(SupportMetrics {
                support_requests: count(0)?,
                avg_response_time_total: sum(1)?,
                request_count: count(2)?,
            }),
            KpiKind::System => KpiMetrics::System(SystemMetrics {
                error_count: count(0)?,
                total_requests: count(1)?,
            }),
        };
        Ok(metrics)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRecord {
    pub id: Uuid,
    pub year: i32,
    pub month: i32,
    pub version: i64,
    pub metrics: KpiMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KpiRecord {
    /// Zero-valued record for a key that has no events yet.
    pub fn new(kind: KpiKind, period: YearMonth) -> Self {
        Self::with_metrics(period, KpiMetrics::zero(kind))
    }

    pub fn with_metrics(period: YearMonth, metrics: KpiMetrics) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            year: period.year,
            month: period.month,
            version: 0,
            metrics,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> KpiKind {
        self.metrics.kind()
    }

    pub fn period(&self) -> YearMonth {
        YearMonth {
            year: self.year,
            month: self.month,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiFilter {
    pub year: Option<i32>,
    pub month: Option<i32>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}

/// The single clause a `KpiFilter` boils down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterClause {
    All,
    Exact(YearMonth),
    Year(i32),
    /// Inclusive bounds on the first day of the record's month.
    Range {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
}

impl FilterClause {
    pub fn matches(&self, period: YearMonth) -> bool {
        match *self {
            FilterClause::All => true,
            FilterClause::Exact(p) => p == period,
            FilterClause::Year(year) => period.year == year,
            FilterClause::Range { from, to } => match period.first_day() {
                Some(day) => from.map_or(true, |f| day >= f) && to.map_or(true, |t| day <= t),
                None => false,
            },
        }
    }
}

impl KpiFilter {
    /// Year+month wins over year, year wins over the date range.
    /// A month without a year is ignored.
    pub fn resolve(&self) -> TallyResult<FilterClause> {
        match (self.year, self.month) {
            (Some(year), Some(month)) => return Ok(FilterClause::Exact(YearMonth::new(year, month)?)),
            (Some(year), None) => return Ok(FilterClause::Year(year)),
            _ => {}
        }

        if self.from_date.is_none() && self.to_date.is_none() {
            return Ok(FilterClause::All);
        }
        if let (Some(from), Some(to)) = (self.from_date, self.to_date) {
            if from > to {
                return Err(TallyError::Validation(format!(
                    "from_date {from} is after to_date {to}"
                )));
            }
        }
        Ok(FilterClause::Range {
            from: self.from_date,
            to: self.to_date,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiQuery {
    #[serde(flatten)]
    pub filter: KpiFilter,
    #[serde(default = "default_sort")]
    pub sort: bool,
    pub limit: Option<i64>,
}

fn default_sort() -> bool {
    true
}

impl Default for KpiQuery {
    fn default() -> Self {
        Self {
            filter: KpiFilter::default(),
            sort: true,
            limit: None,
        }
    }
}

impl KpiQuery {
    pub fn for_period(period: YearMonth) -> Self {
        Self {
            filter: KpiFilter {
                year: Some(period.year),
                month: Some(period.month),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Row cap to apply. Zero means no cap, as does an absent limit.
    pub fn validated_limit(&self) -> TallyResult<Option<i64>> {
        match self.limit {
            Some(limit) if limit < 0 => Err(TallyError::Validation(format!(
                "limit must not be negative, got {limit}"
            ))),
            Some(0) | None => Ok(None),
            other => Ok(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummary {
    pub deleted: u64,
    pub inserted: u64,
}
