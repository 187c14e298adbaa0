use anyhow::Result;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use sqlx::{Executor, Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_backup_row;

const SELECT_BACKUP: &str = r#"
    SELECT id, device_id, device_name, job_id, command, method, content, size, created_at
    FROM backups
"#;

/// Filtered, newest-first scan. Absent filters bind NULL; LIMIT -1 means unbounded.
const QUERY_BACKUPS: &str = r#"
    SELECT id, device_id, device_name, job_id, command, method, content, size, created_at
    FROM backups
    WHERE (?1 IS NULL OR device_id = ?1)
      AND (?2 IS NULL OR device_name = ?2)
      AND (?3 IS NULL OR instr(lower(command), lower(?3)) > 0)
      AND (?4 IS NULL OR created_at >= ?4)
      AND (?5 IS NULL OR created_at <= ?5)
    ORDER BY created_at DESC, id DESC
    LIMIT ?6
"#;

/// Backup database operations. Backups are append-only; rows are never updated.
pub struct BackupRepo;

impl BackupRepo {
    pub async fn insert<'e, E>(executor: E, backup: &NewBackup) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO backups (device_id, device_name, job_id, command, method, content, size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(backup.device_id)
        .bind(&backup.device_name)
        .bind(backup.job_id.as_deref())
        .bind(&backup.command)
        .bind(&backup.method)
        .bind(&backup.content)
        .bind(backup.content.len() as i64)
        .bind(Utc::now())
        .execute(executor)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Backup>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_BACKUP))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_backup_row))
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Backup", &id.to_string()).into());
        }
        Ok(())
    }

    /// Lazily stream backups matching `filter`. Each call starts a fresh scan.
    pub fn query(pool: &Pool<Sqlite>, filter: BackupFilter) -> BoxStream<'_, Result<Backup>> {
        let (device_id, device_name) = match filter.device.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => match d.parse::<i64>() {
                Ok(id) => (Some(id), None),
                Err(_) => (None, Some(d.to_string())),
            },
            _ => (None, None),
        };
        let command = filter.command.filter(|c| !c.is_empty());
        let limit = filter.limit.filter(|l| *l > 0).unwrap_or(-1);

        sqlx::query(QUERY_BACKUPS)
            .bind(device_id)
            .bind(device_name)
            .bind(command)
            .bind(filter.since)
            .bind(filter.until)
            .bind(limit)
            .fetch(pool)
            .map(|row| row.map(|r| map_backup_row(&r)).map_err(anyhow::Error::from))
            .boxed()
    }

    /// The backup written by a succeeded job
    pub async fn for_job(pool: &Pool<Sqlite>, job_id: &str) -> Result<Option<Backup>> {
        let row = sqlx::query(&format!("{} WHERE job_id = ? LIMIT 1", SELECT_BACKUP))
            .bind(job_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_backup_row))
    }
}
