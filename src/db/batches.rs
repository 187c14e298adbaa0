use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_batch_row;

const SELECT_BATCH: &str = r#"
    SELECT id, method, kind, command, validate_only, state, device_count,
           created_at, completed_at
    FROM batches
"#;

/// Batch database operations
pub struct BatchRepo;

impl BatchRepo {
    /// Persist a batch and all of its pending jobs atomically
    pub async fn create(pool: &Pool<Sqlite>, batch: &Batch, jobs: &[Job]) -> Result<()> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO batches (id, method, kind, command, validate_only, state, device_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.id)
        .bind(batch.method.as_str())
        .bind(batch.kind.as_str())
        .bind(&batch.command)
        .bind(batch.validate_only)
        .bind(batch.state.as_str())
        .bind(batch.device_count)
        .bind(batch.created_at)
        .execute(&mut *tx)
        .await?;

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO jobs (id, batch_id, device_id, device_name, payload, method, state,
                                  attempt_count, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)
                "#,
            )
            .bind(&job.id)
            .bind(&job.batch_id)
            .bind(job.device_id)
            .bind(&job.device_name)
            .bind(&job.payload)
            .bind(job.method.as_str())
            .bind(job.state.as_str())
            .bind(job.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Batch>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_BATCH))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_batch_row))
    }

    pub async fn complete(pool: &Pool<Sqlite>, id: &str, state: BatchState) -> Result<()> {
        sqlx::query("UPDATE batches SET state = ?, completed_at = ? WHERE id = ? AND state = 'running'")
            .bind(state.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Close batches whose coordinator died with the previous process
    pub async fn close_interrupted(pool: &Pool<Sqlite>) -> Result<u64> {
        let result = sqlx::query("UPDATE batches SET state = 'completed', completed_at = ? WHERE state = 'running'")
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
