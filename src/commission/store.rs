//! Commission settings persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::sync::Mutex;

use super::CommissionError;
use super::types::{CommissionKind, CommissionSetting, CommissionType};
use crate::core_types::Currency;

#[async_trait]
pub trait CommissionStore: Send + Sync {
    /// Every setting, active or not.
    async fn list(&self) -> Result<Vec<CommissionSetting>, CommissionError>;

    /// Insert or replace the row for `(tx_type, currency)`.
    async fn upsert(&self, setting: CommissionSetting) -> Result<CommissionSetting, CommissionError>;
}

/// In-process store. Used by tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryCommissionStore {
    rows: Mutex<Vec<CommissionSetting>>,
}

impl MemoryCommissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Vec<CommissionSetting>) -> Self {
        Self {
            rows: Mutex::new(settings),
        }
    }
}

#[async_trait]
impl CommissionStore for MemoryCommissionStore {
    async fn list(&self) -> Result<Vec<CommissionSetting>, CommissionError> {
        Ok(self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn upsert(&self, setting: CommissionSetting) -> Result<CommissionSetting, CommissionError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        match rows
            .iter_mut()
            .find(|r| r.tx_type == setting.tx_type && r.currency == setting.currency)
        {
            Some(existing) => *existing = setting.clone(),
            None => rows.push(setting.clone()),
        }
        Ok(setting)
    }
}

/// `commission_settings` table.
pub struct PgCommissionStore {
    pool: PgPool,
}

impl PgCommissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_setting(row: &sqlx::postgres::PgRow) -> Result<CommissionSetting, CommissionError> {
        let tx_type: String = row.try_get("tx_type")?;
        let currency: Option<String> = row.try_get("currency")?;
        let kind: String = row.try_get("kind")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        Ok(CommissionSetting {
            tx_type: tx_type.parse::<CommissionType>().map_err(CommissionError::Store)?,
            currency: currency
                .map(|c| Currency::new(&c))
                .transpose()
                .map_err(|e| CommissionError::Store(e.to_string()))?,
            kind: kind.parse::<CommissionKind>().map_err(CommissionError::Store)?,
            value: row.try_get::<Decimal, _>("value")?,
            min_fee: row.try_get("min_fee")?,
            max_fee: row.try_get("max_fee")?,
            active: row.try_get("active")?,
            updated_at,
        })
    }
}

#[async_trait]
impl CommissionStore for PgCommissionStore {
    async fn list(&self) -> Result<Vec<CommissionSetting>, CommissionError> {
        let rows = sqlx::query(
            r#"
            SELECT tx_type, currency, kind, value, min_fee, max_fee, active, updated_at
            FROM commission_settings
            ORDER BY tx_type, currency NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_setting).collect()
    }

    async fn upsert(&self, setting: CommissionSetting) -> Result<CommissionSetting, CommissionError> {
        let mut tx = self.pool.begin().await?;
        let currency = setting.currency.as_ref().map(|c| c.as_str().to_string());

        // NULL currency cannot take part in a plain unique conflict target
        let updated = sqlx::query(
            r#"
            UPDATE commission_settings
            SET kind = $3, value = $4, min_fee = $5, max_fee = $6, active = $7, updated_at = NOW()
            WHERE tx_type = $1 AND currency IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(setting.tx_type.as_str())
        .bind(currency.as_deref())
        .bind(setting.kind.as_str())
        .bind(setting.value)
        .bind(setting.min_fee)
        .bind(setting.max_fee)
        .bind(setting.active)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
                INSERT INTO commission_settings
                    (tx_type, currency, kind, value, min_fee, max_fee, active, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                "#,
            )
            .bind(setting.tx_type.as_str())
            .bind(currency.as_deref())
            .bind(setting.kind.as_str())
            .bind(setting.value)
            .bind(setting.min_fee)
            .bind(setting.max_fee)
            .bind(setting.active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(setting)
    }
}
