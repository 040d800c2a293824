//! # Commission Rule Repository
//!
//! Rules are configured by administrators and read by the resolver. Inactive
//! rules stay in the table so historical commissions keep a valid `rule_id`.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::parse_percent;
use ceres_core::{CommissionBase, CommissionRule, RuleScope};

#[derive(Debug, sqlx::FromRow)]
struct RuleRow {
    id: String,
    scope: RuleScope,
    product_id: Option<String>,
    category: Option<String>,
    base: CommissionBase,
    percent: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl RuleRow {
    fn into_rule(self) -> DbResult<CommissionRule> {
        Ok(CommissionRule {
            percent: parse_percent("commission_rules.percent", &self.percent)?,
            id: self.id,
            scope: self.scope,
            product_id: self.product_id,
            category: self.category,
            base: self.base,
            active: self.active,
            created_at: self.created_at,
        })
    }
}

const RULE_COLUMNS: &str = "id, scope, product_id, category, base, percent, active, created_at";

/// All active rules, oldest first.
pub async fn active_rules(conn: &mut SqliteConnection) -> DbResult<Vec<CommissionRule>> {
    let sql = format!(
        "SELECT {RULE_COLUMNS} FROM commission_rules WHERE active = 1 ORDER BY created_at, id"
    );
    let rows = sqlx::query_as::<_, RuleRow>(&sql)
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(RuleRow::into_rule).collect()
}

pub async fn insert(conn: &mut SqliteConnection, rule: &CommissionRule) -> DbResult<()> {
    debug!(id = %rule.id, scope = ?rule.scope, base = %rule.base, "Inserting commission rule");

    sqlx::query(
        r#"
        INSERT INTO commission_rules (
            id, scope, product_id, category, base, percent, active, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&rule.id)
    .bind(rule.scope)
    .bind(&rule.product_id)
    .bind(&rule.category)
    .bind(rule.base)
    .bind(rule.percent.value().to_string())
    .bind(rule.active)
    .bind(rule.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Repository for commission rule operations.
#[derive(Debug, Clone)]
pub struct RuleRepository {
    pool: SqlitePool,
}

impl RuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RuleRepository { pool }
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<CommissionRule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM commission_rules WHERE id = ?1");
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RuleRow::into_rule).transpose()
    }

    pub async fn active(&self) -> DbResult<Vec<CommissionRule>> {
        let mut conn = self.pool.acquire().await?;
        active_rules(&mut conn).await
    }

    pub async fn insert(&self, rule: &CommissionRule) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, rule).await
    }

    /// Enables or disables a rule. Existing commissions are not touched.
    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE commission_rules SET active = ?2 WHERE id = ?1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CommissionRule", id));
        }
        Ok(())
    }
}
