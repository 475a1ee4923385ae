use tally_db::kpi::models::{
    CustomerGrowthMetrics, InvoiceMetrics, KpiMetrics, OrderMetrics, RevenueMetrics,
    SupportMetrics, SystemMetrics, TransactionMetrics, YearMonth,
};
use tally_events::{Event, EventError};

pub const PERSON_CREATED: &str = "kpi.create.person";
pub const INVOICE_CREATED: &str = "kpi.create.invoice";
pub const INVOICE_OVERDUE: &str = "kpi.delete.invoice";
pub const ORDER_CREATED: &str = "kpi.create.order";
pub const PAYMENT_CREATED: &str = "kpi.create.payment";
pub const SUPPORT_CREATED: &str = "kpi.create.support";
pub const ORCHESTRATOR_ERROR: &str = "kpi.create.orchestrator";
pub const TRANSACTION_FAILED: &str = "kpi.error.transaction";

/// Deltas one event contributes to the records of a single month.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiUpdate {
    pub period: YearMonth,
    pub deltas: Vec<KpiMetrics>,
}

impl KpiUpdate {
    fn single(period: YearMonth, delta: KpiMetrics) -> Self {
        Self {
            period,
            deltas: vec![delta],
        }
    }
}

pub type Compute = fn(&Event) -> Result<KpiUpdate, EventError>;

/// Every inbound topic with its handler name and delta mapping.
pub const MAPPINGS: [(&str, &str, Compute); 8] = [
    (PERSON_CREATED, "customer_growth", person_created),
    (INVOICE_CREATED, "invoice_issued", invoice_created),
    (INVOICE_OVERDUE, "invoice_overdue", invoice_overdue),
    (ORDER_CREATED, "order", order_created),
    (PAYMENT_CREATED, "payment", payment_created),
    (SUPPORT_CREATED, "support", support_created),
    (ORCHESTRATOR_ERROR, "system_error", orchestrator_error),
    (TRANSACTION_FAILED, "failed_transaction", transaction_failed),
];

fn period_of(event: &Event, field: &str) -> Result<YearMonth, EventError> {
    Ok(YearMonth::of(&event.timestamp_field(field)?))
}

pub fn person_created(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "createdAt")?;
    Ok(KpiUpdate::single(
        period,
        KpiMetrics::CustomerGrowth(CustomerGrowthMetrics { new_customers: 1 }),
    ))
}

pub fn invoice_created(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "issuedAt")?;
    Ok(KpiUpdate::single(
        period,
        KpiMetrics::Invoice(InvoiceMetrics {
            invoices_issued: 1,
            ..Default::default()
        }),
    ))
}

/// Invoices leave through the delete topic once they are past due.
pub fn invoice_overdue(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "dueDate")?;
    Ok(KpiUpdate::single(
        period,
        KpiMetrics::Invoice(InvoiceMetrics {
            overdue_invoices: 1,
            ..Default::default()
        }),
    ))
}

/// Touches revenue and order records of the same month, in that order.
pub fn order_created(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "createdAt")?;
    let total_amount = event.non_negative_field("totalAmount")?;
    let products = event.count_field("products")?;

    Ok(KpiUpdate {
        period,
        deltas: vec![
            KpiMetrics::Revenue(RevenueMetrics {
                total_revenue: total_amount,
            }),
            KpiMetrics::Order(OrderMetrics {
                total_orders: 1,
                basket_size_sum: products,
                order_value_sum: total_amount,
            }),
        ],
    })
}

pub fn payment_created(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "timestamp")?;
    let amount = event.non_negative_field("amount")?;
    Ok(KpiUpdate::single(
        period,
        KpiMetrics::Transaction(TransactionMetrics {
            transaction_volume: amount,
            ..Default::default()
        }),
    ))
}

pub fn support_created(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "timestamp")?;
    let response_time = event.non_negative_field("responseTime")?;
    Ok(KpiUpdate::single(
        period,
        KpiMetrics::Support(SupportMetrics {
            support_requests: 1,
            avg_response_time_total: response_time,
            request_count: 1,
        }),
    ))
}

pub fn orchestrator_error(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "timestamp")?;
    Ok(KpiUpdate::single(
        period,
        KpiMetrics::System(SystemMetrics {
            error_count: 1,
            total_requests: 1,
        }),
    ))
}

pub fn transaction_failed(event: &Event) -> Result<KpiUpdate, EventError> {
    let period = period_of(event, "timestamp")?;
    Ok(KpiUpdate::single(
        period,
        KpiMetrics::Transaction(TransactionMetrics {
            failed_transactions: 1,
            ..Default::default()
        }),
    ))
}
