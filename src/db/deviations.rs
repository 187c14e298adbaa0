use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_deviation_row;

/// Deviation history operations
pub struct DeviationRepo;

impl DeviationRepo {
    /// Record a report once per (backup, baseline) pair. Returns false when it was already recorded.
    pub async fn record(pool: &Pool<Sqlite>, report: &DeviationReport, baseline_backup_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO deviation_events
                (device_id, backup_id, baseline_backup_id, severity, added, removed, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(backup_id, baseline_backup_id) DO NOTHING
            "#,
        )
        .bind(report.device_id)
        .bind(report.backup_id)
        .bind(baseline_backup_id)
        .bind(report.severity.as_str())
        .bind(report.added.len() as i64)
        .bind(report.removed.len() as i64)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_device(pool: &Pool<Sqlite>, device_id: i64, limit: i64) -> Result<Vec<DeviationEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, backup_id, baseline_backup_id, severity, added, removed, created_at
            FROM deviation_events
            WHERE device_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(device_id)
        .bind(limit.clamp(1, 1000))
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(map_deviation_row).collect())
    }
}
