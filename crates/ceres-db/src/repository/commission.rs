//! # Commission Repository
//!
//! The commission ledger. A partial unique index allows at most one
//! non-canceled commission per sale; a second insert fails with
//! [`DbError::UniqueViolation`] and callers re-read the winner.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::parse_percent;
use ceres_core::{Commission, CommissionBase, Money, PayStatus};

#[derive(Debug, sqlx::FromRow)]
struct CommissionRow {
    id: String,
    sale_id: String,
    seller_id: String,
    rule_id: Option<String>,
    base: CommissionBase,
    percent: String,
    base_amount_cents: i64,
    amount_cents: i64,
    pay_status: PayStatus,
    pay_status_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CommissionRow {
    fn into_commission(self) -> DbResult<Commission> {
        Ok(Commission {
            percent: parse_percent("commissions.percent", &self.percent)?,
            id: self.id,
            sale_id: self.sale_id,
            seller_id: self.seller_id,
            rule_id: self.rule_id,
            base: self.base,
            base_amount: Money::from_cents(self.base_amount_cents),
            amount: Money::from_cents(self.amount_cents),
            pay_status: self.pay_status,
            pay_status_date: self.pay_status_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const COMMISSION_COLUMNS: &str = "id, sale_id, seller_id, rule_id, base, percent, \
     base_amount_cents, amount_cents, pay_status, pay_status_date, created_at, updated_at";

/// Filters for listing commissions. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CommissionFilter {
    pub seller_id: Option<String>,
    pub pay_status: Option<PayStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

// =============================================================================
// Connection-level Operations
// =============================================================================

pub async fn get(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Commission>> {
    let sql = format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE id = ?1");
    let row = sqlx::query_as::<_, CommissionRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(CommissionRow::into_commission).transpose()
}

/// The sale's current non-canceled commission, if any.
pub async fn live_for_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Option<Commission>> {
    let sql = format!(
        "SELECT {COMMISSION_COLUMNS} FROM commissions \
         WHERE sale_id = ?1 AND pay_status <> 'canceled'"
    );
    let row = sqlx::query_as::<_, CommissionRow>(&sql)
        .bind(sale_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(CommissionRow::into_commission).transpose()
}

/// The sale's commission, preferring the live one over canceled history.
pub async fn latest_for_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Option<Commission>> {
    let sql = format!(
        "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE sale_id = ?1 \
         ORDER BY pay_status = 'canceled', created_at DESC, id LIMIT 1"
    );
    let row = sqlx::query_as::<_, CommissionRow>(&sql)
        .bind(sale_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(CommissionRow::into_commission).transpose()
}

pub async fn insert(conn: &mut SqliteConnection, commission: &Commission) -> DbResult<()> {
    debug!(
        id = %commission.id,
        sale_id = %commission.sale_id,
        amount = %commission.amount,
        "Inserting commission"
    );

    sqlx::query(
        r#"
        INSERT INTO commissions (
            id, sale_id, seller_id, rule_id, base, percent, base_amount_cents,
            amount_cents, pay_status, pay_status_date, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&commission.id)
    .bind(&commission.sale_id)
    .bind(&commission.seller_id)
    .bind(&commission.rule_id)
    .bind(commission.base)
    .bind(commission.percent.value().to_string())
    .bind(commission.base_amount.cents())
    .bind(commission.amount.cents())
    .bind(commission.pay_status)
    .bind(commission.pay_status_date)
    .bind(commission.created_at)
    .bind(commission.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Writes the pay status fields.
pub async fn update_status(conn: &mut SqliteConnection, commission: &Commission) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE commissions SET
            pay_status = ?2,
            pay_status_date = ?3,
            updated_at = ?4
        WHERE id = ?1
        "#,
    )
    .bind(&commission.id)
    .bind(commission.pay_status)
    .bind(commission.pay_status_date)
    .bind(commission.updated_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Commission", &commission.id));
    }
    Ok(())
}

pub async fn list(conn: &mut SqliteConnection, filter: &CommissionFilter) -> DbResult<Vec<Commission>> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {COMMISSION_COLUMNS} FROM commissions WHERE 1 = 1"));

    if let Some(seller_id) = &filter.seller_id {
        builder.push(" AND seller_id = ").push_bind(seller_id.clone());
    }
    if let Some(status) = filter.pay_status {
        builder.push(" AND pay_status = ").push_bind(status);
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        builder.push(" AND created_at < ").push_bind(to);
    }
    builder.push(" ORDER BY created_at DESC, id");

    let rows = builder
        .build_query_as::<CommissionRow>()
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(CommissionRow::into_commission).collect()
}

// =============================================================================
// Pool-level Repository
// =============================================================================

/// Repository for commission reads outside a transaction.
#[derive(Debug, Clone)]
pub struct CommissionRepository {
    pool: SqlitePool,
}

impl CommissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CommissionRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Commission>> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id).await
    }

    pub async fn for_sale(&self, sale_id: &str) -> DbResult<Option<Commission>> {
        let mut conn = self.pool.acquire().await?;
        latest_for_sale(&mut conn, sale_id).await
    }

    pub async fn list(&self, filter: &CommissionFilter) -> DbResult<Vec<Commission>> {
        let mut conn = self.pool.acquire().await?;
        list(&mut conn, filter).await
    }

    /// Sum of commission amounts per pay status for one seller.
    pub async fn totals_by_status(&self, seller_id: &str) -> DbResult<Vec<(PayStatus, Money)>> {
        let rows: Vec<(PayStatus, i64)> = sqlx::query_as(
            r#"
            SELECT pay_status, COALESCE(SUM(amount_cents), 0)
            FROM commissions
            WHERE seller_id = ?1
            GROUP BY pay_status
            ORDER BY pay_status
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(status, cents)| (status, Money::from_cents(cents)))
            .collect())
    }
}
