use anyhow::Result;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_event_row;

/// Activity log operations
pub struct EventRepo;

impl EventRepo {
    pub async fn log(pool: &Pool<Sqlite>, event_type: &str, message: &str) -> Result<()> {
        sqlx::query("INSERT INTO events (event_type, message, created_at) VALUES (?, ?, ?)")
            .bind(event_type)
            .bind(message)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn list_recent(pool: &Pool<Sqlite>, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT id, event_type, message, created_at FROM events ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit.clamp(1, 1000))
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(map_event_row).collect())
    }
}
