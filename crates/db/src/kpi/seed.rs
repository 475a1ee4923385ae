use crate::kpi::models::{
    CustomerGrowthMetrics, InvoiceMetrics, KpiKind, KpiMetrics, KpiRecord, OrderMetrics,
    RevenueMetrics, SupportMetrics, SystemMetrics, TransactionMetrics, YearMonth,
};

pub const SEED_YEAR: i32 = 2024;

/// Development dataset: one record per kind for every month of `SEED_YEAR`.
///
/// Values grow linearly with the month so charts and range queries have
/// something to show; they carry no other meaning.
pub fn seed_records() -> Vec<KpiRecord> {
    let mut records = Vec::with_capacity(12 * KpiKind::ALL.len());

    for month in 1..=12 {
        let period = YearMonth {
            year: SEED_YEAR,
            month,
        };
        let m = month as i64;
        let f = month as f64;

        let orders = 40 + 5 * m;
        let order_value_sum = orders as f64 * (55.0 + f);

        let metrics = [
            KpiMetrics::Revenue(RevenueMetrics {
                total_revenue: order_value_sum,
            }),
            KpiMetrics::CustomerGrowth(CustomerGrowthMetrics {
                new_customers: 10 + 2 * m,
            }),
            KpiMetrics::Order(OrderMetrics {
                total_orders: orders,
                basket_size_sum: orders as f64 * 2.5,
                order_value_sum,
            }),
            KpiMetrics::Transaction(TransactionMetrics {
                transaction_volume: order_value_sum * 0.95,
                failed_transactions: m % 4,
            }),
            KpiMetrics::Invoice(InvoiceMetrics {
                invoices_issued: orders,
                overdue_invoices: m % 3,
            }),
            KpiMetrics::Support(SupportMetrics {
                support_requests: 8 + m,
                avg_response_time_total: (8 + m) as f64 * (30.0 - f),
                request_count: 8 + m,
            }),
            KpiMetrics::System(SystemMetrics {
                error_count: 2 + m % 5,
                total_requests: 10_000 + 250 * m,
            }),
        ];

        records.extend(
            metrics
                .into_iter()
                .map(|metrics| KpiRecord::with_metrics(period, metrics)),
        );
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn seed_covers_every_kind_and_month_once() {
        let records = seed_records();
        assert_eq!(records.len(), 84);

        let keys: HashSet<_> = records.iter().map(|r| (r.kind(), r.period())).collect();
        assert_eq!(keys.len(), records.len());
        assert!(records.iter().all(|r| r.year == SEED_YEAR));
    }

    #[test]
    fn seed_revenue_matches_order_value() {
        let records = seed_records();
        let revenue = records
            .iter()
            .find(|r| r.kind() == KpiKind::Revenue && r.month == 1)
            .unwrap();
        let order = records
            .iter()
            .find(|r| r.kind() == KpiKind::Order && r.month == 1)
            .unwrap();

        match (revenue.metrics, order.metrics) {
            (KpiMetrics::Revenue(r), KpiMetrics::Order(o)) => {
                assert_eq!(r.total_revenue, o.order_value_sum);
            }
            other => panic!("unexpected metrics: {other:?}"),
        }
    }
}
