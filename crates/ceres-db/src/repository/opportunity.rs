//! # Opportunity Repository
//!
//! Persists opportunities and their line items.
//!
//! ## Optimistic Locking
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  read  → Opportunity { version: 3 }                                    │
//! │  edit in memory (ceres-core validates)                                 │
//! │  save  → UPDATE ... SET version = 4 WHERE id = ? AND version = 3       │
//! │             │                                                           │
//! │             ├── 1 row  → items rewritten, opp.version = 4              │
//! │             └── 0 rows → DbError::Conflict (someone saved first)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Items are rewritten as a whole on every save, keeping their order in a
//! `position` column. Call `save` inside a transaction so the header and the
//! items land together.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{parse_decimal, parse_optional_percent, parse_percent};
use ceres_core::{LineItem, Money, Opportunity, Stage};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OpportunityRow {
    id: String,
    client_id: String,
    seller_id: String,
    title: String,
    stage: Stage,
    value_adjustment_cents: i64,
    manual_value_cents: Option<i64>,
    gross_value_cents: Option<i64>,
    probability: i64,
    estimated_margin_percent: Option<String>,
    sale_id: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl OpportunityRow {
    fn into_opportunity(self, items: Vec<LineItem>) -> DbResult<Opportunity> {
        Ok(Opportunity {
            estimated_margin_percent: parse_optional_percent(
                "opportunities.estimated_margin_percent",
                self.estimated_margin_percent.as_deref(),
            )?,
            id: self.id,
            client_id: self.client_id,
            seller_id: self.seller_id,
            title: self.title,
            stage: self.stage,
            items,
            value_adjustment: Money::from_cents(self.value_adjustment_cents),
            manual_value: self.manual_value_cents.map(Money::from_cents),
            gross_value: self.gross_value_cents.map(Money::from_cents),
            probability: self.probability,
            sale_id: self.sale_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    product_id: String,
    product_name: String,
    category: String,
    quantity: i64,
    anchor_price_cents: i64,
    unit_price: String,
    discount_percent: String,
    max_discount_percent: String,
    subtotal_cents: i64,
}

impl ItemRow {
    fn into_item(self) -> DbResult<LineItem> {
        Ok(LineItem {
            unit_price: parse_decimal("opportunity_items.unit_price", &self.unit_price)?,
            discount_percent: parse_percent(
                "opportunity_items.discount_percent",
                &self.discount_percent,
            )?,
            max_discount_percent: parse_percent(
                "opportunity_items.max_discount_percent",
                &self.max_discount_percent,
            )?,
            product_id: self.product_id,
            product_name: self.product_name,
            category: self.category,
            quantity: self.quantity,
            anchor_price: Money::from_cents(self.anchor_price_cents),
            subtotal: Money::from_cents(self.subtotal_cents),
        })
    }
}

const OPPORTUNITY_COLUMNS: &str = "id, client_id, seller_id, title, stage, value_adjustment_cents, \
     manual_value_cents, gross_value_cents, probability, estimated_margin_percent, sale_id, \
     version, created_at, updated_at, closed_at";

/// Filters for listing opportunities. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OpportunityFilter {
    pub seller_id: Option<String>,
    pub client_id: Option<String>,
    pub stage: Option<Stage>,
    pub limit: Option<u32>,
}

// =============================================================================
// Connection-level Operations
// =============================================================================

async fn load_items(conn: &mut SqliteConnection, opportunity_id: &str) -> DbResult<Vec<LineItem>> {
    let rows = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT product_id, product_name, category, quantity, anchor_price_cents,
               unit_price, discount_percent, max_discount_percent, subtotal_cents
        FROM opportunity_items
        WHERE opportunity_id = ?1
        ORDER BY position
        "#,
    )
    .bind(opportunity_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(ItemRow::into_item).collect()
}

async fn write_items(conn: &mut SqliteConnection, opportunity: &Opportunity) -> DbResult<()> {
    sqlx::query("DELETE FROM opportunity_items WHERE opportunity_id = ?1")
        .bind(&opportunity.id)
        .execute(&mut *conn)
        .await?;

    for (position, item) in opportunity.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO opportunity_items (
                opportunity_id, product_id, position, product_name, category,
                quantity, anchor_price_cents, unit_price, discount_percent,
                max_discount_percent, subtotal_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&opportunity.id)
        .bind(&item.product_id)
        .bind(position as i64)
        .bind(&item.product_name)
        .bind(&item.category)
        .bind(item.quantity)
        .bind(item.anchor_price.cents())
        .bind(item.unit_price.to_string())
        .bind(item.discount_percent.value().to_string())
        .bind(item.max_discount_percent.value().to_string())
        .bind(item.subtotal.cents())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Opportunity>> {
    let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE id = ?1");
    let row = sqlx::query_as::<_, OpportunityRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let items = load_items(conn, &row.id).await?;
            Ok(Some(row.into_opportunity(items)?))
        }
        None => Ok(None),
    }
}

/// Loads an opportunity or fails with `NotFound`.
pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Opportunity> {
    get(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Opportunity", id))
}

pub async fn insert(conn: &mut SqliteConnection, opportunity: &Opportunity) -> DbResult<()> {
    debug!(id = %opportunity.id, seller_id = %opportunity.seller_id, "Inserting opportunity");

    sqlx::query(
        r#"
        INSERT INTO opportunities (
            id, client_id, seller_id, title, stage,
            value_adjustment_cents, manual_value_cents, gross_value_cents,
            probability, estimated_margin_percent, sale_id, version,
            created_at, updated_at, closed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(&opportunity.id)
    .bind(&opportunity.client_id)
    .bind(&opportunity.seller_id)
    .bind(&opportunity.title)
    .bind(opportunity.stage)
    .bind(opportunity.value_adjustment.cents())
    .bind(opportunity.manual_value.map(|m| m.cents()))
    .bind(opportunity.gross_value.map(|m| m.cents()))
    .bind(opportunity.probability)
    .bind(opportunity.estimated_margin_percent.map(|p| p.value().to_string()))
    .bind(&opportunity.sale_id)
    .bind(opportunity.version)
    .bind(opportunity.created_at)
    .bind(opportunity.updated_at)
    .bind(opportunity.closed_at)
    .execute(&mut *conn)
    .await?;

    write_items(conn, opportunity).await
}

/// Writes the header and items if nobody saved since `opportunity` was read.
/// Bumps `opportunity.version` on success.
///
/// ## Errors
/// [`DbError::Conflict`] when the stored version moved on.
pub async fn save(conn: &mut SqliteConnection, opportunity: &mut Opportunity) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE opportunities SET
            title = ?3,
            stage = ?4,
            value_adjustment_cents = ?5,
            manual_value_cents = ?6,
            gross_value_cents = ?7,
            probability = ?8,
            estimated_margin_percent = ?9,
            sale_id = ?10,
            updated_at = ?11,
            closed_at = ?12,
            version = version + 1
        WHERE id = ?1 AND version = ?2
        "#,
    )
    .bind(&opportunity.id)
    .bind(opportunity.version)
    .bind(&opportunity.title)
    .bind(opportunity.stage)
    .bind(opportunity.value_adjustment.cents())
    .bind(opportunity.manual_value.map(|m| m.cents()))
    .bind(opportunity.gross_value.map(|m| m.cents()))
    .bind(opportunity.probability)
    .bind(opportunity.estimated_margin_percent.map(|p| p.value().to_string()))
    .bind(&opportunity.sale_id)
    .bind(opportunity.updated_at)
    .bind(opportunity.closed_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::Conflict {
            entity: "Opportunity".to_string(),
            id: opportunity.id.clone(),
        });
    }

    write_items(conn, opportunity).await?;
    opportunity.version += 1;

    debug!(id = %opportunity.id, version = opportunity.version, stage = %opportunity.stage, "Saved opportunity");
    Ok(())
}

pub async fn list(conn: &mut SqliteConnection, filter: &OpportunityFilter) -> DbResult<Vec<Opportunity>> {
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE 1 = 1"));

    if let Some(seller_id) = &filter.seller_id {
        builder.push(" AND seller_id = ").push_bind(seller_id.clone());
    }
    if let Some(client_id) = &filter.client_id {
        builder.push(" AND client_id = ").push_bind(client_id.clone());
    }
    if let Some(stage) = filter.stage {
        builder.push(" AND stage = ").push_bind(stage);
    }
    builder.push(" ORDER BY updated_at DESC, id");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ").push_bind(i64::from(limit));
    }

    let rows = builder
        .build_query_as::<OpportunityRow>()
        .fetch_all(&mut *conn)
        .await?;

    let mut opportunities = Vec::with_capacity(rows.len());
    for row in rows {
        let items = load_items(conn, &row.id).await?;
        opportunities.push(row.into_opportunity(items)?);
    }
    Ok(opportunities)
}

// =============================================================================
// Pool-level Repository
// =============================================================================

/// Repository for opportunity operations outside a transaction.
#[derive(Debug, Clone)]
pub struct OpportunityRepository {
    pool: SqlitePool,
}

impl OpportunityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OpportunityRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Opportunity>> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id).await
    }

    pub async fn list(&self, filter: &OpportunityFilter) -> DbResult<Vec<Opportunity>> {
        let mut conn = self.pool.acquire().await?;
        list(&mut conn, filter).await
    }

    /// Number of opportunities per stage, for pipeline summaries.
    pub async fn count_by_stage(&self, seller_id: Option<&str>) -> DbResult<Vec<(Stage, i64)>> {
        let rows: Vec<(Stage, i64)> = sqlx::query_as(
            r#"
            SELECT stage, COUNT(*) FROM opportunities
            WHERE ?1 IS NULL OR seller_id = ?1
            GROUP BY stage
            ORDER BY stage
            "#,
        )
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
