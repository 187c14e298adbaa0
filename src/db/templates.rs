use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_template_row;

const SELECT_TEMPLATE: &str = r#"
    SELECT name, description, body, created_at
    FROM templates
"#;

/// Template catalog operations. Entries are create-once; there is no update.
pub struct TemplateRepo;

impl TemplateRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Template>> {
        let rows = sqlx::query(&format!("{} ORDER BY name", SELECT_TEMPLATE))
            .fetch_all(pool)
            .await?;

        Ok(rows.iter().map(map_template_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, name: &str) -> Result<Option<Template>> {
        let row = sqlx::query(&format!("{} WHERE name = ?", SELECT_TEMPLATE))
            .bind(name)
            .fetch_optional(pool)
            .await?;

        Ok(row.as_ref().map(map_template_row))
    }

    pub async fn create(pool: &Pool<Sqlite>, req: &CreateTemplateRequest) -> Result<Template> {
        if Self::get(pool, &req.name).await?.is_some() {
            return Err(super::DuplicateError::new("Template", &req.name).into());
        }

        sqlx::query("INSERT INTO templates (name, description, body, created_at) VALUES (?, ?, ?, ?)")
            .bind(&req.name)
            .bind(&req.description)
            .bind(&req.body)
            .bind(Utc::now())
            .execute(pool)
            .await
            .map_err(|e| super::map_unique_violation(e, "Template", &req.name))?;

        Self::get(pool, &req.name)
            .await?
            .context("Template not found after creation")
    }

    /// Insert catalog entries that are not present yet
    pub async fn seed(pool: &Pool<Sqlite>, entries: &[(&str, &str, &str)]) -> Result<()> {
        let now = Utc::now();
        for (name, description, body) in entries {
            sqlx::query(
                "INSERT OR IGNORE INTO templates (name, description, body, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(description)
            .bind(body)
            .bind(now)
            .execute(pool)
            .await?;
        }
        Ok(())
    }
}
