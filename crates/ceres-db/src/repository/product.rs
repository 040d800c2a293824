//! # Product Repository
//!
//! Catalog reads and writes: products and service items.
//!
//! The engine only reads the catalog. Inserts and updates exist for catalog
//! management and for seeding; line items copy what they need at pricing
//! time, so editing a product never rewrites an existing proposal or sale.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::parse_percent;
use ceres_core::{Money, Product, ProductStatus, ServiceItem, ServiceKind};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    name: String,
    list_price_cents: i64,
    unit_cost_cents: i64,
    max_discount_percent: String,
    category: String,
    status: ProductStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_product(self) -> DbResult<Product> {
        Ok(Product {
            max_discount_percent: parse_percent(
                "products.max_discount_percent",
                &self.max_discount_percent,
            )?,
            id: self.id,
            name: self.name,
            list_price: Money::from_cents(self.list_price_cents),
            unit_cost: Money::from_cents(self.unit_cost_cents),
            category: self.category,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceItemRow {
    id: String,
    name: String,
    kind: ServiceKind,
    default_price_cents: i64,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<ServiceItemRow> for ServiceItem {
    fn from(row: ServiceItemRow) -> Self {
        ServiceItem {
            id: row.id,
            name: row.name,
            kind: row.kind,
            default_price: Money::from_cents(row.default_price_cents),
            active: row.active,
            created_at: row.created_at,
        }
    }
}

const PRODUCT_COLUMNS: &str = "id, name, list_price_cents, unit_cost_cents, max_discount_percent, \
                               category, status, created_at, updated_at";

// =============================================================================
// Connection-level Operations
// =============================================================================

pub async fn get(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
    let row = sqlx::query_as::<_, ProductRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(ProductRow::into_product).transpose()
}

/// Current unit cost of each requested product. Products missing from the
/// catalog are simply absent from the map.
pub async fn unit_costs(
    conn: &mut SqliteConnection,
    product_ids: &[String],
) -> DbResult<HashMap<String, Money>> {
    let mut costs = HashMap::with_capacity(product_ids.len());
    for id in product_ids {
        if costs.contains_key(id) {
            continue;
        }
        let cost: Option<i64> =
            sqlx::query_scalar("SELECT unit_cost_cents FROM products WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        if let Some(cents) = cost {
            costs.insert(id.clone(), Money::from_cents(cents));
        }
    }
    Ok(costs)
}

pub async fn insert(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    debug!(id = %product.id, name = %product.name, "Inserting product");

    sqlx::query(
        r#"
        INSERT INTO products (
            id, name, list_price_cents, unit_cost_cents, max_discount_percent,
            category, status, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&product.id)
    .bind(&product.name)
    .bind(product.list_price.cents())
    .bind(product.unit_cost.cents())
    .bind(product.max_discount_percent.value().to_string())
    .bind(&product.category)
    .bind(product.status)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE products SET
            name = ?2,
            list_price_cents = ?3,
            unit_cost_cents = ?4,
            max_discount_percent = ?5,
            category = ?6,
            status = ?7,
            updated_at = ?8
        WHERE id = ?1
        "#,
    )
    .bind(&product.id)
    .bind(&product.name)
    .bind(product.list_price.cents())
    .bind(product.unit_cost.cents())
    .bind(product.max_discount_percent.value().to_string())
    .bind(&product.category)
    .bind(product.status)
    .bind(product.updated_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Product", &product.id));
    }
    Ok(())
}

pub async fn get_service_item(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<ServiceItem>> {
    let row = sqlx::query_as::<_, ServiceItemRow>(
        "SELECT id, name, kind, default_price_cents, active, created_at \
         FROM service_items WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(ServiceItem::from))
}

pub async fn insert_service_item(conn: &mut SqliteConnection, item: &ServiceItem) -> DbResult<()> {
    debug!(id = %item.id, kind = %item.kind, "Inserting service item");

    sqlx::query(
        r#"
        INSERT INTO service_items (id, name, kind, default_price_cents, active, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&item.id)
    .bind(&item.name)
    .bind(item.kind)
    .bind(item.default_price.cents())
    .bind(item.active)
    .bind(item.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Pool-level Repository
// =============================================================================

/// Repository for catalog database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// let product = repo.get("uuid-here").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, id).await
    }

    pub async fn insert(&self, product: &Product) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, product).await
    }

    pub async fn update(&self, product: &Product) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        update(&mut conn, product).await
    }

    /// Lists products, optionally only active ones, ordered by name.
    pub async fn list(&self, active_only: bool) -> DbResult<Vec<Product>> {
        let sql = if active_only {
            format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE status = 'active' ORDER BY name")
        } else {
            format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name")
        };
        let rows = sqlx::query_as::<_, ProductRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ProductRow::into_product).collect()
    }

    pub async fn get_service_item(&self, id: &str) -> DbResult<Option<ServiceItem>> {
        let mut conn = self.pool.acquire().await?;
        get_service_item(&mut conn, id).await
    }

    pub async fn insert_service_item(&self, item: &ServiceItem) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_service_item(&mut conn, item).await
    }

    /// Active service items of the given kind, ordered by name.
    pub async fn list_service_items(&self, kind: ServiceKind) -> DbResult<Vec<ServiceItem>> {
        let rows = sqlx::query_as::<_, ServiceItemRow>(
            "SELECT id, name, kind, default_price_cents, active, created_at \
             FROM service_items WHERE kind = ?1 AND active = 1 ORDER BY name",
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ServiceItem::from).collect())
    }
}
