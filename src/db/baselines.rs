use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_baseline_row;

/// Per-device baseline pointer operations
pub struct BaselineRepo;

impl BaselineRepo {
    pub async fn get(pool: &Pool<Sqlite>, device_id: i64) -> Result<Option<Baseline>> {
        let row = sqlx::query("SELECT device_id, backup_id, set_at FROM baselines WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_baseline_row))
    }

    /// Replace the device's baseline
    pub async fn set(pool: &Pool<Sqlite>, device_id: i64, backup_id: i64) -> Result<Baseline> {
        sqlx::query(
            r#"
            INSERT INTO baselines (device_id, backup_id, set_at) VALUES (?, ?, ?)
            ON CONFLICT(device_id) DO UPDATE SET backup_id = excluded.backup_id, set_at = excluded.set_at
            "#,
        )
        .bind(device_id)
        .bind(backup_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Self::get(pool, device_id)
            .await?
            .context("Baseline not found after update")
    }
}
