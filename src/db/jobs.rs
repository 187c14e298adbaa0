use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::backups::BackupRepo;
use super::row_helpers::map_job_row;

const SELECT_JOB: &str = r#"
    SELECT id, batch_id, device_id, device_name, payload, method, state, attempt_count,
           result_message, error_kind, created_at, started_at, ended_at
    FROM jobs
"#;

/// SQL fragment matching jobs that may still change state
const LIVE_STATES: &str = "state IN ('pending', 'running')";

/// Job database operations.
///
/// Every transition into a terminal state is guarded on the row still being
/// pending or running, so a job is written terminal exactly once even when a
/// worker and the batch coordinator race on it.
pub struct JobRepo;

impl JobRepo {
    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_JOB))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_job_row))
    }

    /// Jobs of a batch in submission order
    pub async fn list_for_batch(pool: &Pool<Sqlite>, batch_id: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!("{} WHERE batch_id = ? ORDER BY rowid", SELECT_JOB))
            .bind(batch_id)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_job_row).collect())
    }

    pub async fn mark_running(pool: &Pool<Sqlite>, id: &str, attempt: i32) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"UPDATE jobs
               SET state = 'running', attempt_count = ?, started_at = COALESCE(started_at, ?)
               WHERE id = ? AND {}"#,
            LIVE_STATES
        ))
        .bind(attempt)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Send a job back to pending between retry attempts
    pub async fn mark_retrying(pool: &Pool<Sqlite>, id: &str, attempt: i32, reason: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"UPDATE jobs
               SET state = 'pending', attempt_count = ?, result_message = ?
               WHERE id = ? AND {}"#,
            LIVE_STATES
        ))
        .bind(attempt)
        .bind(reason)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write a terminal state. `attempts` of None keeps the stored count.
    /// Returns false when the job had already reached a terminal state.
    pub async fn finish(
        pool: &Pool<Sqlite>,
        id: &str,
        state: JobState,
        attempts: Option<i32>,
        message: &str,
        kind: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(state.is_terminal());
        let result = sqlx::query(&format!(
            r#"UPDATE jobs
               SET state = ?, attempt_count = COALESCE(?, attempt_count),
                   result_message = ?, error_kind = ?, ended_at = ?
               WHERE id = ? AND {}"#,
            LIVE_STATES
        ))
        .bind(state.as_str())
        .bind(attempts)
        .bind(message)
        .bind(kind)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job Succeeded and write its backup in one transaction.
    /// Returns the backup id, or None if the job was already terminal.
    pub async fn succeed_with_backup(
        pool: &Pool<Sqlite>,
        id: &str,
        attempts: i32,
        message: &str,
        backup: &NewBackup,
    ) -> Result<Option<i64>> {
        let mut tx = pool.begin().await?;

        let result = sqlx::query(&format!(
            r#"UPDATE jobs
               SET state = 'succeeded', attempt_count = ?, result_message = ?,
                   error_kind = NULL, ended_at = ?
               WHERE id = ? AND {}"#,
            LIVE_STATES
        ))
        .bind(attempts)
        .bind(message)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let backup_id = BackupRepo::insert(&mut *tx, backup).await?;
        tx.commit().await?;
        Ok(Some(backup_id))
    }

    /// Terminate every job of a batch that is still live
    pub async fn close_unfinished(
        pool: &Pool<Sqlite>,
        batch_id: &str,
        state: JobState,
        message: &str,
        kind: &str,
    ) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"UPDATE jobs
               SET state = ?, result_message = ?, error_kind = ?, ended_at = ?
               WHERE batch_id = ? AND {}"#,
            LIVE_STATES
        ))
        .bind(state.as_str())
        .bind(message)
        .bind(kind)
        .bind(Utc::now())
        .bind(batch_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fail jobs a previous process left live. They are never re-executed.
    pub async fn fail_interrupted(pool: &Pool<Sqlite>) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"UPDATE jobs
               SET state = 'failed', result_message = 'interrupted by service restart',
                   error_kind = ?, ended_at = ?
               WHERE {}"#,
            LIVE_STATES
        ))
        .bind(error_kind::INTERRUPTED)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
