//! The durable relational store for plans, clients, and global rules
//! (spec §3, §4.2 step 4). Spec treats this store as an external
//! collaborator owned by an out-of-scope CRUD admin surface; this module
//! is the read path (plus minimal seeding helpers) that makes the crate
//! runnable end to end. It is intentionally not a full admin API.

use crate::error::{AppError, Result};
use crate::types::{Client, RateLimitRule, SubscriptionPlan};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

pub struct DurableStore {
    pool: SqlitePool,
}

impl DurableStore {
    pub async fn open(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .map_err(|e| AppError::DurableStoreUnavailable(format!("invalid database URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DurableStoreUnavailable(format!("failed to connect to SQLite: {}", e)))?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscription_plans (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                monthly_limit INTEGER NOT NULL,
                window_limit INTEGER,
                window_seconds INTEGER,
                active INTEGER NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| AppError::DurableStoreUnavailable(format!("migration failed: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_key TEXT UNIQUE NOT NULL,
                plan_id TEXT NOT NULL,
                active INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (plan_id) REFERENCES subscription_plans(id)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| AppError::DurableStoreUnavailable(format!("migration failed: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limit_rules (
                id TEXT PRIMARY KEY,
                limit_value INTEGER NOT NULL,
                global_window_seconds INTEGER,
                active INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| AppError::DurableStoreUnavailable(format!("migration failed: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clients_api_key ON clients(api_key)")
            .execute(pool)
            .await
            .ok();

        Ok(())
    }

    /// Fetch a client and its plan by API key, for the subscription
    /// resolver's cache-miss path (spec §4.2 step 4).
    pub async fn get_client_with_plan(&self, api_key: &str) -> Result<Option<(Client, SubscriptionPlan)>> {
        let row = sqlx::query(&Self::client_plan_join_query("c.api_key = ?"))
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DurableStoreUnavailable(e.to_string()))?;

        row.map(row_to_client_and_plan).transpose()
    }

    /// Fetch a client and its plan by client id, for the admin read-only
    /// status surface (spec §6 ambient admin endpoint).
    pub async fn get_client_with_plan_by_id(&self, client_id: Uuid) -> Result<Option<(Client, SubscriptionPlan)>> {
        let row = sqlx::query(&Self::client_plan_join_query("c.id = ?"))
            .bind(client_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DurableStoreUnavailable(e.to_string()))?;

        row.map(row_to_client_and_plan).transpose()
    }

    fn client_plan_join_query(predicate: &str) -> String {
        format!(
            r#"
            SELECT c.id, c.name, c.api_key, c.plan_id, c.active, c.created_at,
                   p.id as plan_id_2, p.name as plan_name, p.monthly_limit,
                   p.window_limit, p.window_seconds, p.active as plan_active,
                   p.expires_at, p.created_at as plan_created_at
            FROM clients c
            JOIN subscription_plans p ON p.id = c.plan_id
            WHERE {predicate}
            "#
        )
    }

    /// All currently-active GLOBAL rate limit rules (spec §4.3).
    pub async fn get_active_global_rules(&self) -> Result<Vec<RateLimitRule>> {
        let rows = sqlx::query(
            "SELECT id, limit_value, global_window_seconds, active, created_at FROM rate_limit_rules WHERE active = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DurableStoreUnavailable(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(RateLimitRule {
                    id: parse_uuid(row.try_get::<String, _>("id")?)?,
                    limit_value: row.try_get::<i64, _>("limit_value")? as u32,
                    global_window_seconds: row
                        .try_get::<Option<i64>, _>("global_window_seconds")?
                        .map(|v| v as u32),
                    active: row.try_get::<i64, _>("active")? != 0,
                    created_at: parse_timestamp(row.try_get::<String, _>("created_at")?)?,
                })
            })
            .collect()
    }

    /// Seed a plan. Exposed for bootstrapping and tests — the real admin
    /// CRUD surface (`POST /api/plans`) is out of scope (spec §1, §6).
    pub async fn insert_plan(&self, plan: &SubscriptionPlan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_plans
                (id, name, monthly_limit, window_limit, window_seconds, active, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(plan.id.to_string())
        .bind(&plan.name)
        .bind(plan.monthly_limit as i64)
        .bind(plan.window_limit.map(|v| v as i64))
        .bind(plan.window_seconds.map(|v| v as i64))
        .bind(plan.active as i64)
        .bind(plan.expires_at.map(|v| v.to_rfc3339()))
        .bind(plan.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DurableStoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn insert_client(&self, client: &Client) -> Result<()> {
        sqlx::query(
            "INSERT INTO clients (id, name, api_key, plan_id, active, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(client.id.to_string())
        .bind(&client.name)
        .bind(&client.api_key)
        .bind(client.plan_id.to_string())
        .bind(client.active as i64)
        .bind(client.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DurableStoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn insert_rule(&self, rule: &RateLimitRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO rate_limit_rules (id, limit_value, global_window_seconds, active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(rule.id.to_string())
        .bind(rule.limit_value as i64)
        .bind(rule.global_window_seconds.map(|v| v as i64))
        .bind(rule.active as i64)
        .bind(rule.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DurableStoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

fn row_to_client_and_plan(row: SqliteRow) -> Result<(Client, SubscriptionPlan)> {
    let client = Client {
        id: parse_uuid(row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        api_key: row.try_get("api_key")?,
        plan_id: parse_uuid(row.try_get::<String, _>("plan_id")?)?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: parse_timestamp(row.try_get::<String, _>("created_at")?)?,
    };

    let plan = SubscriptionPlan {
        id: parse_uuid(row.try_get::<String, _>("plan_id_2")?)?,
        name: row.try_get("plan_name")?,
        monthly_limit: row.try_get::<i64, _>("monthly_limit")? as u32,
        window_limit: row.try_get::<Option<i64>, _>("window_limit")?.map(|v| v as u32),
        window_seconds: row.try_get::<Option<i64>, _>("window_seconds")?.map(|v| v as u32),
        active: row.try_get::<i64, _>("plan_active")? != 0,
        expires_at: row
            .try_get::<Option<String>, _>("expires_at")?
            .map(parse_timestamp)
            .transpose()?,
        created_at: parse_timestamp(row.try_get::<String, _>("plan_created_at")?)?,
    };

    Ok((client, plan))
}

fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| AppError::DurableStoreUnavailable(format!("corrupt UUID in store: {}", e)))
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::DurableStoreUnavailable(format!("corrupt timestamp in store: {}", e)))
}
