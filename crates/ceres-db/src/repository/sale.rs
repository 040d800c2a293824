//! # Sale Repository
//!
//! Database operations for sales, sale items and service lines.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. INSERT (closed)                                                    │
//! │     └── insert() → header + sale_items + sale_services, one tx         │
//! │         UNIQUE(opportunity_id) and UNIQUE(idempotency_key) reject      │
//! │         a second sale for the same source                              │
//! │                                                                         │
//! │  2. (OPTIONAL) EDIT ITEMS                                              │
//! │     └── replace_items() → new items + recomputed totals                │
//! │                                                                         │
//! │  3. (OPTIONAL) PAYMENT RECEIVED / CANCEL                               │
//! │     └── update() → status, payment_received, updated_at                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{parse_decimal, parse_optional_percent, parse_percent};
use ceres_core::{Money, PaymentMethod, Sale, SaleLineItem, SaleStatus, ServiceKind, ServiceLine};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    opportunity_id: Option<String>,
    client_id: String,
    seller_id: String,
    value_adjustment_cents: i64,
    final_discount_percent: String,
    gross_value_cents: i64,
    total_cost_cents: i64,
    estimated_profit_cents: i64,
    estimated_margin_percent: Option<String>,
    payment_methods: String,
    payment_received: bool,
    status: SaleStatus,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SaleRow {
    fn into_sale(self, items: Vec<SaleLineItem>, services: Vec<ServiceLine>) -> DbResult<Sale> {
        let payment_methods: Vec<PaymentMethod> = serde_json::from_str(&self.payment_methods)
            .map_err(|e| DbError::invalid_data("sales.payment_methods", e))?;

        Ok(Sale {
            final_discount_percent: parse_percent(
                "sales.final_discount_percent",
                &self.final_discount_percent,
            )?,
            estimated_margin_percent: parse_optional_percent(
                "sales.estimated_margin_percent",
                self.estimated_margin_percent.as_deref(),
            )?,
            id: self.id,
            opportunity_id: self.opportunity_id,
            client_id: self.client_id,
            seller_id: self.seller_id,
            items,
            services,
            value_adjustment: Money::from_cents(self.value_adjustment_cents),
            gross_value: Money::from_cents(self.gross_value_cents),
            total_cost: Money::from_cents(self.total_cost_cents),
            estimated_profit: Money::from_cents(self.estimated_profit_cents),
            payment_methods,
            payment_received: self.payment_received,
            status: self.status,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SaleItemRow {
    id: String,
    sale_id: String,
    product_id: String,
    product_name: String,
    category: String,
    quantity: i64,
    anchor_price_cents: i64,
    unit_price: String,
    discount_percent: String,
    subtotal_cents: i64,
    unit_cost_cents: i64,
}

impl SaleItemRow {
    fn into_item(self) -> DbResult<SaleLineItem> {
        Ok(SaleLineItem {
            unit_price: parse_decimal("sale_items.unit_price", &self.unit_price)?,
            discount_percent: parse_percent("sale_items.discount_percent", &self.discount_percent)?,
            id: self.id,
            sale_id: self.sale_id,
            product_id: self.product_id,
            product_name: self.product_name,
            category: self.category,
            quantity: self.quantity,
            anchor_price: Money::from_cents(self.anchor_price_cents),
            subtotal: Money::from_cents(self.subtotal_cents),
            unit_cost: Money::from_cents(self.unit_cost_cents),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    id: String,
    sale_id: String,
    service_item_id: Option<String>,
    kind: ServiceKind,
    description: String,
    total_cents: i64,
}

impl From<ServiceRow> for ServiceLine {
    fn from(row: ServiceRow) -> Self {
        ServiceLine {
            id: row.id,
            sale_id: row.sale_id,
            service_item_id: row.service_item_id,
            kind: row.kind,
            description: row.description,
            total: Money::from_cents(row.total_cents),
        }
    }
}

const SALE_COLUMNS: &str = "id, opportunity_id, client_id, seller_id, value_adjustment_cents, \
     final_discount_percent, gross_value_cents, total_cost_cents, estimated_profit_cents, \
     estimated_margin_percent, payment_methods, payment_received, status, idempotency_key, \
     created_at, updated_at";

fn encode_payment_methods(methods: &[PaymentMethod]) -> DbResult<String> {
    serde_json::to_string(methods).map_err(|e| DbError::invalid_data("sales.payment_methods", e))
}

// =============================================================================
// Connection-level Operations
// =============================================================================

async fn load(conn: &mut SqliteConnection, row: SaleRow) -> DbResult<Sale> {
    let item_rows = sqlx::query_as::<_, SaleItemRow>(
        r#"
        SELECT id, sale_id, product_id, product_name, category, quantity,
               anchor_price_cents, unit_price, discount_percent, subtotal_cents,
               unit_cost_cents
        FROM sale_items
        WHERE sale_id = ?1
        ORDER BY position
        "#,
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await?;
    let items = item_rows
        .into_iter()
        .map(SaleItemRow::into_item)
        .collect::<DbResult<Vec<_>>>()?;

    let services = sqlx::query_as::<_, ServiceRow>(
        r#"
        SELECT id, sale_id, service_item_id, kind, description, total_cents
        FROM sale_services
        WHERE sale_id = ?1
        ORDER BY position
        "#,
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(ServiceLine::from)
    .collect();

    row.into_sale(items, services)
}

async fn find_by(conn: &mut SqliteConnection, column: &str, value: &str) -> DbResult<Option<Sale>> {
    let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE {column} = ?1");
    let row = sqlx::query_as::<_, SaleRow>(&sql)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(load(conn, row).await?)),
        None => Ok(None),
    }
}

pub async fn get(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
    find_by(conn, "id", id).await
}

/// Loads a sale or fails with `NotFound`.
pub async fn fetch(conn: &mut SqliteConnection, id: &str) -> DbResult<Sale> {
    get(conn, id)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", id))
}

pub async fn get_by_opportunity(conn: &mut SqliteConnection, opportunity_id: &str) -> DbResult<Option<Sale>> {
    find_by(conn, "opportunity_id", opportunity_id).await
}

pub async fn get_by_idempotency_key(conn: &mut SqliteConnection, key: &str) -> DbResult<Option<Sale>> {
    find_by(conn, "idempotency_key", key).await
}

async fn write_items(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    sqlx::query("DELETE FROM sale_items WHERE sale_id = ?1")
        .bind(&sale.id)
        .execute(&mut *conn)
        .await?;

    for (position, item) in sale.items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO sale_items (
                id, sale_id, position, product_id, product_name, category,
                quantity, anchor_price_cents, unit_price, discount_percent,
                subtotal_cents, unit_cost_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&item.id)
        .bind(&sale.id)
        .bind(position as i64)
        .bind(&item.product_id)
        .bind(&item.product_name)
        .bind(&item.category)
        .bind(item.quantity)
        .bind(item.anchor_price.cents())
        .bind(item.unit_price.to_string())
        .bind(item.discount_percent.value().to_string())
        .bind(item.subtotal.cents())
        .bind(item.unit_cost.cents())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Inserts a sale with its items and service lines.
///
/// ## Errors
/// [`DbError::UniqueViolation`] when the opportunity already has a sale or
/// the idempotency key was used before.
pub async fn insert(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    debug!(
        id = %sale.id,
        opportunity_id = ?sale.opportunity_id,
        gross_value = %sale.gross_value,
        "Inserting sale"
    );

    sqlx::query(
        r#"
        INSERT INTO sales (
            id, opportunity_id, client_id, seller_id, value_adjustment_cents,
            final_discount_percent, gross_value_cents, total_cost_cents,
            estimated_profit_cents, estimated_margin_percent, payment_methods,
            payment_received, status, idempotency_key, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        "#,
    )
    .bind(&sale.id)
    .bind(&sale.opportunity_id)
    .bind(&sale.client_id)
    .bind(&sale.seller_id)
    .bind(sale.value_adjustment.cents())
    .bind(sale.final_discount_percent.value().to_string())
    .bind(sale.gross_value.cents())
    .bind(sale.total_cost.cents())
    .bind(sale.estimated_profit.cents())
    .bind(sale.estimated_margin_percent.map(|p| p.value().to_string()))
    .bind(encode_payment_methods(&sale.payment_methods)?)
    .bind(sale.payment_received)
    .bind(sale.status)
    .bind(&sale.idempotency_key)
    .bind(sale.created_at)
    .bind(sale.updated_at)
    .execute(&mut *conn)
    .await?;

    write_items(conn, sale).await?;

    for (position, service) in sale.services.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO sale_services (
                id, sale_id, position, service_item_id, kind, description, total_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&service.id)
        .bind(&sale.id)
        .bind(position as i64)
        .bind(&service.service_item_id)
        .bind(service.kind)
        .bind(&service.description)
        .bind(service.total.cents())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Writes the mutable header fields: totals, status, payment flag.
pub async fn update(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE sales SET
            final_discount_percent = ?2,
            gross_value_cents = ?3,
            total_cost_cents = ?4,
            estimated_profit_cents = ?5,
            payment_received = ?6,
            status = ?7,
            updated_at = ?8
        WHERE id = ?1
        "#,
    )
    .bind(&sale.id)
    .bind(sale.final_discount_percent.value().to_string())
    .bind(sale.gross_value.cents())
    .bind(sale.total_cost.cents())
    .bind(sale.estimated_profit.cents())
    .bind(sale.payment_received)
    .bind(sale.status)
    .bind(sale.updated_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Sale", &sale.id));
    }
    Ok(())
}

/// Rewrites the item set together with the recomputed header.
pub async fn replace_items(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    debug!(id = %sale.id, items = sale.items.len(), "Replacing sale items");
    update(conn, sale).await?;
    write_items(conn, sale).await
}

// =============================================================================
// Pool-level Repository
// =============================================================================

/// Repository for sale reads outside a transaction.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id).await
    }

    pub async fn get_by_opportunity(&self, opportunity_id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        get_by_opportunity(&mut conn, opportunity_id).await
    }

    /// A seller's sales, newest first.
    pub async fn list_by_seller(&self, seller_id: &str, limit: u32) -> DbResult<Vec<Sale>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE seller_id = ?1 \
             ORDER BY created_at DESC, id LIMIT ?2"
        );
        let rows = sqlx::query_as::<_, SaleRow>(&sql)
            .bind(seller_id)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await?;

        let mut sales = Vec::with_capacity(rows.len());
        for row in rows {
            sales.push(load(&mut conn, row).await?);
        }
        Ok(sales)
    }
}
