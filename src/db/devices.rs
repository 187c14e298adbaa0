use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;

use super::row_helpers::map_device_row;

const SELECT_DEVICE: &str = r#"
    SELECT id, hostname, management_address, port, platform, credential_profile,
           status, last_seen, created_at, updated_at
    FROM devices
"#;

/// Device database operations
pub struct DeviceRepo;

impl DeviceRepo {
    pub async fn list(pool: &Pool<Sqlite>, filter: &DeviceFilter) -> Result<Vec<Device>> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE (?1 IS NULL OR platform = ?1)
              AND (?2 IS NULL OR instr(lower(hostname), lower(?2)) > 0)
              AND (?3 IS NULL OR status = ?3)
            ORDER BY hostname"#,
            SELECT_DEVICE
        ))
        .bind(filter.platform.as_deref())
        .bind(filter.hostname.as_deref())
        .bind(filter.status.as_deref())
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(map_device_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Device>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_DEVICE))
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(row.as_ref().map(map_device_row))
    }

    pub async fn get_by_hostname(pool: &Pool<Sqlite>, hostname: &str) -> Result<Option<Device>> {
        let row = sqlx::query(&format!("{} WHERE hostname = ?", SELECT_DEVICE))
            .bind(hostname)
            .fetch_optional(pool)
            .await?;

        Ok(row.as_ref().map(map_device_row))
    }

    pub async fn count(pool: &Pool<Sqlite>) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices")
            .fetch_one(pool)
            .await?;
        Ok(count.0)
    }

    pub async fn create(pool: &Pool<Sqlite>, req: &CreateDeviceRequest) -> Result<Device> {
        if Self::get_by_hostname(pool, &req.hostname).await?.is_some() {
            return Err(super::DuplicateError::new("Device", &req.hostname).into());
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO devices (hostname, management_address, port, platform, credential_profile,
                                 status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.hostname)
        .bind(&req.management_address)
        .bind(req.port)
        .bind(&req.platform)
        .bind(req.credential_profile.as_deref())
        .bind(device_status::UNKNOWN)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| super::map_unique_violation(e, "Device", &req.hostname))?;

        Self::get(pool, result.last_insert_rowid())
            .await?
            .context("Device not found after creation")
    }

    pub async fn update(pool: &Pool<Sqlite>, id: i64, req: &UpdateDeviceRequest) -> Result<Device> {
        let current = Self::get(pool, id)
            .await?
            .ok_or_else(|| super::NotFoundError::new("Device", &id.to_string()))?;

        let hostname = req.hostname.clone().unwrap_or(current.hostname);
        if let Some(other) = Self::get_by_hostname(pool, &hostname).await? {
            if other.id != id {
                return Err(super::DuplicateError::new("Device", &hostname).into());
            }
        }

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE devices SET hostname = ?, management_address = ?, port = ?, platform = ?,
                               credential_profile = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&hostname)
        .bind(req.management_address.as_ref().unwrap_or(&current.management_address))
        .bind(req.port.unwrap_or(current.port))
        .bind(req.platform.as_ref().unwrap_or(&current.platform))
        .bind(req.credential_profile.clone().or(current.credential_profile))
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| super::map_unique_violation(e, "Device", &hostname))?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Device", &id.to_string()).into());
        }

        Self::get(pool, id)
            .await?
            .context("Device not found after update")
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Device", &id.to_string()).into());
        }
        Ok(())
    }

    /// Record a reachability result; last_seen only moves when the device answered
    pub async fn update_status(pool: &Pool<Sqlite>, id: i64, status: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE devices
            SET status = ?1,
                last_seen = CASE WHEN ?1 = 'online' THEN ?2 ELSE last_seen END,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
