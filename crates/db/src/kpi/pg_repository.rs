use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::kpi::models::{
    FilterClause, KpiKind, KpiMetrics, KpiQuery, KpiRecord, MetricType, MetricValue, ResetSummary,
    YearMonth,
};
use crate::kpi::repositories::KpiRepository;
use tally_common::error::{TallyError, TallyResult};

#[derive(Clone)]
pub struct PgKpiRepository {
    pool: PgPool,
}

impl PgKpiRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> TallyError {
    TallyError::Storage(e.to_string())
}

fn metric_columns(kind: KpiKind) -> String {
    kind.columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_list(kind: KpiKind) -> String {
    format!(
        "id, year, month, version, {}, created_at, updated_at",
        metric_columns(kind)
    )
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: MetricValue) {
    match value {
        MetricValue::Count(v) => {
            qb.push_bind(v);
        }
        MetricValue::Sum(v) => {
            qb.push_bind(v);
        }
    }
}

fn map_row(kind: KpiKind, row: &PgRow) -> TallyResult<KpiRecord> {
    let values = kind
        .columns()
        .iter()
        .map(|col| match col.ty {
            MetricType::Count => row.try_get::<i64, _>(col.name).map(MetricValue::Count),
            MetricType::Sum => row.try_get::<f64, _>(col.name).map(MetricValue::Sum),
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;

    Ok(KpiRecord {
        id: row.try_get("id").map_err(db_err)?,
        year: row.try_get("year").map_err(db_err)?,
        month: row.try_get("month").map_err(db_err)?,
        version: row.try_get("version").map_err(db_err)?,
        metrics: KpiMetrics::from_values(kind, &values)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

/// `insert into <table> (...) values (...)` for a full record, without terminator.
fn insert_record(record: &KpiRecord) -> QueryBuilder<'static, Postgres> {
    let kind = record.kind();
    let mut qb = QueryBuilder::new(format!(
        "insert into {} (id, year, month, version, {}, created_at, updated_at) values (",
        kind.table(),
        metric_columns(kind)
    ));
    qb.push_bind(record.id)
        .push(", ")
        .push_bind(record.year)
        .push(", ")
        .push_bind(record.month)
        .push(", ")
        .push_bind(record.version);
    for value in record.metrics.values() {
        qb.push(", ");
        push_value(&mut qb, value);
    }
    qb.push(", ")
        .push_bind(record.created_at)
        .push(", ")
        .push_bind(record.updated_at)
        .push(")");
    qb
}

#[async_trait]
impl KpiRepository for PgKpiRepository {
    async fn get_or_create(&self, kind: KpiKind, period: YearMonth) -> TallyResult<KpiRecord> {
        let table = kind.table();
        let sql = format!(
            "insert into {table} (id, year, month)
             values ($1, $2, $3)
             on conflict (year, month) do update set updated_at = {table}.updated_at
             returning {}",
            select_list(kind)
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(period.year)
            .bind(period.month)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        map_row(kind, &row)
    }

    async fn save(&self, record: &KpiRecord) -> TallyResult<KpiRecord> {
        let kind = record.kind();
        let mut qb = QueryBuilder::new(format!("update {} set ", kind.table()));
        for (column, value) in kind.columns().iter().zip(record.metrics.values()) {
            qb.push(column.name).push(" = ");
            push_value(&mut qb, value);
            qb.push(", ");
        }
        qb.push("version = version + 1, updated_at = now() where id = ")
            .push_bind(record.id)
            .push(" and version = ")
            .push_bind(record.version)
            .push(" returning ")
            .push(select_list(kind));

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(r) => map_row(kind, &r),
            None => Err(TallyError::Conflict(format!(
                "{kind} {} changed since version {}",
                record.period(),
                record.version
            ))),
        }
    }

    async fn increment(&self, period: YearMonth, delta: &KpiMetrics) -> TallyResult<KpiRecord> {
        let kind = delta.kind();
        let table = kind.table();

        let mut qb = QueryBuilder::new(format!(
            "insert into {table} (id, year, month, version, {}) values (",
            metric_columns(kind)
        ));
        qb.push_bind(Uuid::new_v4())
            .push(", ")
            .push_bind(period.year)
            .push(", ")
            .push_bind(period.month)
            .push(", 1");
        for value in delta.values() {
            qb.push(", ");
            push_value(&mut qb, value);
        }
        qb.push(") on conflict (year, month) do update set ");
        for column in kind.columns() {
            let name = column.name;
            qb.push(format!("{name} = {table}.{name} + excluded.{name}, "));
        }
        qb.push(format!(
            "version = {table}.version + 1, updated_at = now() returning {}",
            select_list(kind)
        ));

        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        map_row(kind, &row)
    }

    async fn find(&self, kind: KpiKind, query: &KpiQuery) -> TallyResult<Vec<KpiRecord>> {
        let clause = query.filter.resolve()?;
        let limit = query.validated_limit()?;

        let mut qb = QueryBuilder::new(format!(
            "select {} from {} where true",
            select_list(kind),
            kind.table()
        ));

        match clause {
            FilterClause::All => {}
            FilterClause::Exact(period) => {
                qb.push(" and year = ")
                    .push_bind(period.year)
                    .push(" and month = ")
                    .push_bind(period.month);
            }
            FilterClause::Year(year) => {
                qb.push(" and year = ").push_bind(year);
            }
            FilterClause::Range { from, to } => {
                if let Some(from) = from {
                    qb.push(" and make_date(year, month, 1) >= ").push_bind(from);
                }
                if let Some(to) = to {
                    qb.push(" and make_date(year, month, 1) <= ").push_bind(to);
                }
            }
        }

        if query.sort {
            qb.push(" order by year asc, month asc");
        }
        if let Some(limit) = limit {
            qb.push(" limit ").push_bind(limit);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(|r| map_row(kind, r)).collect()
    }

    async fn snapshot(&self) -> TallyResult<Vec<KpiRecord>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("set transaction isolation level repeatable read, read only")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut all = Vec::new();
        for kind in KpiKind::ALL {
            let sql = format!(
                "select {} from {} order by year asc, month asc",
                select_list(kind),
                kind.table()
            );
            let rows = sqlx::query(&sql)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?;
            for row in &rows {
                all.push(map_row(kind, row)?);
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(all)
    }

    async fn reset(&self, seed: Vec<KpiRecord>) -> TallyResult<ResetSummary> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut deleted = 0;
        for kind in KpiKind::ALL {
            let result = sqlx::query(&format!("delete from {}", kind.table()))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            deleted += result.rows_affected();
        }

        let mut inserted = 0;
        for record in &seed {
            insert_record(record)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            inserted += 1;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::info!(deleted, inserted, "kpi tables reset");
        Ok(ResetSummary { deleted, inserted })
    }
}
