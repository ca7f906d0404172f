//! SQLite implementations of the domain repository traits, same
//! `sqlx::Row`/`try_get` style as upstream's order/candle repositories.

use crate::domain::repositories::{AlertRepository, LeaseRepository, LeaseRow, UserDirectory};
use crate::domain::types::{Alert, AlertCondition, Condition, Market, NotificationOptions};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteAlertRepository {
    pool: SqlitePool,
}

impl SqliteAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> Result<Alert> {
        let symbols_json: String = row.try_get("symbols_json")?;
        let symbols: Vec<String> = serde_json::from_str(&symbols_json)
            .context("corrupt symbols_json in alerts row")?;

        let conditions_json: Option<String> = row.try_get("conditions_json")?;
        let conditions: Option<Vec<AlertCondition>> = conditions_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("corrupt conditions_json in alerts row")?;

        let notification_options_json: Option<String> =
            row.try_get("notification_options_json")?;
        let notification_options: Option<NotificationOptions> = notification_options_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("corrupt notification_options_json in alerts row")?;

        let condition: Option<String> = row.try_get("condition")?;
        let condition = condition.map(|c| match c.as_str() {
            "above" => Condition::Above,
            _ => Condition::Below,
        });

        let market_str: String = row.try_get("market")?;
        let market = market_str.parse::<Market>().unwrap_or(Market::Spot);

        let triggered_at: Option<String> = row.try_get("triggered_at")?;
        let triggered_at = triggered_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("corrupt triggered_at in alerts row")?;

        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Alert {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            alert_type: row.try_get::<String, _>("alert_type")?.parse()?,
            exchange: row.try_get("exchange")?,
            market,
            symbols,
            target_value: row.try_get("target_value")?,
            condition,
            initial_price: row.try_get("initial_price")?,
            conditions,
            notification_options,
            is_active: row.try_get("is_active")?,
            triggered: row.try_get("triggered")?,
            triggered_at,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn find_active(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await
            .context("failed to query active alerts")?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn find_active_price_alerts(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT * FROM alerts WHERE is_active = 1 AND alert_type = 'price' AND triggered = 0",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to query active price alerts")?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn find_active_complex_alerts(&self) -> Result<Vec<Alert>> {
        let rows =
            sqlx::query("SELECT * FROM alerts WHERE is_active = 1 AND alert_type = 'complex'")
                .fetch_all(&self.pool)
                .await
                .context("failed to query active complex alerts")?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query alert by id")?;
        row.as_ref().map(Self::row_to_alert).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete alert")?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_triggered(&self, id: &str, triggered_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE alerts SET triggered = 1, triggered_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(triggered_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to mark alert triggered")?;
        Ok(())
    }

    async fn upsert(&self, alert: &Alert) -> Result<()> {
        let symbols_json = serde_json::to_string(&alert.symbols)?;
        let conditions_json = alert
            .conditions
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let notification_options_json = alert
            .notification_options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let condition_str = alert.condition.map(|c| match c {
            Condition::Above => "above",
            Condition::Below => "below",
        });

        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, user_id, name, description, alert_type, exchange, market,
                symbols_json, target_value, condition, initial_price,
                conditions_json, notification_options_json, is_active,
                triggered, triggered_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                alert_type = excluded.alert_type,
                exchange = excluded.exchange,
                market = excluded.market,
                symbols_json = excluded.symbols_json,
                target_value = excluded.target_value,
                condition = excluded.condition,
                initial_price = excluded.initial_price,
                conditions_json = excluded.conditions_json,
                notification_options_json = excluded.notification_options_json,
                is_active = excluded.is_active,
                triggered = excluded.triggered,
                triggered_at = excluded.triggered_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.user_id)
        .bind(&alert.name)
        .bind(&alert.description)
        .bind(alert.alert_type.to_string())
        .bind(&alert.exchange)
        .bind(alert.market.to_string())
        .bind(symbols_json)
        .bind(alert.target_value)
        .bind(condition_str)
        .bind(alert.initial_price)
        .bind(conditions_json)
        .bind(notification_options_json)
        .bind(alert.is_active)
        .bind(alert.triggered)
        .bind(alert.triggered_at.map(|t| t.to_rfc3339()))
        .bind(alert.created_at.to_rfc3339())
        .bind(alert.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to upsert alert")?;

        Ok(())
    }
}

pub struct SqliteLeaseRepository {
    pool: SqlitePool,
}

impl SqliteLeaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseRepository for SqliteLeaseRepository {
    async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_lease (
                name TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                renewed_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                meta TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure engine_lease table")?;
        Ok(())
    }

    async fn try_claim(&self, name: &str, owner_id: &str, ttl: chrono::Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + ttl;

        // Either no row exists, the row is expired, or we already own it.
        // The WHERE clause is the only synchronization primitive (§5).
        let result = sqlx::query(
            r#"
            INSERT INTO engine_lease (name, owner_id, acquired_at, renewed_at, expires_at, meta)
            VALUES (?, ?, ?, ?, ?, NULL)
            ON CONFLICT(name) DO UPDATE SET
                owner_id = excluded.owner_id,
                acquired_at = excluded.acquired_at,
                renewed_at = excluded.renewed_at,
                expires_at = excluded.expires_at
            WHERE engine_lease.owner_id = excluded.owner_id
               OR engine_lease.expires_at < excluded.acquired_at
            "#,
        )
        .bind(name)
        .bind(owner_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to attempt lease claim")?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // INSERT...ON CONFLICT reports rows_affected=0 both when the
        // predicate failed and, on some sqlite builds, when the update was a
        // no-op overwrite of identical values. Disambiguate by re-reading.
        let row = self.get(name).await?;
        Ok(row.map(|r| r.owner_id == owner_id).unwrap_or(false))
    }

    async fn try_renew(&self, name: &str, owner_id: &str, ttl: chrono::Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + ttl;

        let result = sqlx::query(
            r#"
            UPDATE engine_lease
            SET renewed_at = ?, expires_at = ?
            WHERE name = ? AND owner_id = ? AND expires_at >= ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .bind(name)
        .bind(owner_id)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to renew lease")?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, name: &str, owner_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM engine_lease WHERE name = ? AND owner_id = ?")
            .bind(name)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .context("failed to release lease")?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<LeaseRow>> {
        let row = sqlx::query("SELECT * FROM engine_lease WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query lease")?;

        row.map(|r| -> Result<LeaseRow> {
            let acquired_at: String = r.try_get("acquired_at")?;
            let renewed_at: String = r.try_get("renewed_at")?;
            let expires_at: String = r.try_get("expires_at")?;
            Ok(LeaseRow {
                name: r.try_get("name")?,
                owner_id: r.try_get("owner_id")?,
                acquired_at: DateTime::parse_from_rfc3339(&acquired_at)?.with_timezone(&Utc),
                renewed_at: DateTime::parse_from_rfc3339(&renewed_at)?.with_timezone(&Utc),
                expires_at: DateTime::parse_from_rfc3339(&expires_at)?.with_timezone(&Utc),
                meta: r.try_get("meta")?,
            })
        })
        .transpose()
    }
}

pub struct SqliteUserDirectory {
    pool: SqlitePool,
}

impl SqliteUserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn telegram_chat_id(&self, user_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT telegram_chat_id FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query user telegram_chat_id")?;

        Ok(match row {
            Some(r) => r.try_get::<Option<String>, _>("telegram_chat_id")?,
            None => None,
        })
    }
}
