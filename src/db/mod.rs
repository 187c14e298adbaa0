mod backups;
mod baselines;
mod batches;
mod devices;
mod deviations;
mod events;
mod jobs;
pub(crate) mod row_helpers;
mod seeds;
mod templates;

use anyhow::{Context, Result};
use futures::stream::{BoxStream, TryStreamExt};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use crate::models::*;

/// Typed error for "resource not found", downcast by the API error handler
#[derive(Debug)]
pub struct NotFoundError {
    pub resource: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not found: {}", self.resource, self.id)
    }
}

impl std::error::Error for NotFoundError {}

/// Typed error for unique-key collisions (hostname, template name)
#[derive(Debug)]
pub struct DuplicateError {
    pub resource: String,
    pub key: String,
}

impl DuplicateError {
    pub fn new(resource: &str, key: &str) -> Self {
        Self {
            resource: resource.to_string(),
            key: key.to_string(),
        }
    }
}

impl std::fmt::Display for DuplicateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} already exists: {}", self.resource, self.key)
    }
}

impl std::error::Error for DuplicateError {}

/// Turn a UNIQUE constraint failure into a DuplicateError; other errors pass through
pub(crate) fn map_unique_violation(err: sqlx::Error, resource: &str, key: &str) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DuplicateError::new(resource, key).into(),
        _ => err.into(),
    }
}

/// Store handles all database operations, delegating to per-entity repo modules.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Create a new database store with the default pool size
    pub async fn new(db_path: &str) -> Result<Self> {
        Self::with_pool_size(db_path, 5).await
    }

    /// Create a new database store with a specific pool size
    pub async fn with_pool_size(db_path: &str, max_connections: u32) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations and seed defaults
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;

        templates::TemplateRepo::seed(&self.pool, &seeds::default_templates()).await?;

        if devices::DeviceRepo::count(&self.pool).await? == 0 {
            for device in seeds::default_devices() {
                devices::DeviceRepo::create(&self.pool, &device).await?;
            }
            tracing::info!("Seeded default lab inventory");
        }

        Ok(())
    }

    /// Round-trip a trivial query; used by the readiness probe
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database unreachable")?;
        Ok(())
    }

    // ========== Device Operations ==========

    pub async fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<Device>> {
        devices::DeviceRepo::list(&self.pool, filter).await
    }

    pub async fn get_device(&self, id: i64) -> Result<Option<Device>> {
        devices::DeviceRepo::get(&self.pool, id).await
    }

    pub async fn get_device_by_hostname(&self, hostname: &str) -> Result<Option<Device>> {
        devices::DeviceRepo::get_by_hostname(&self.pool, hostname).await
    }

    /// Resolve a device from either an integer ID string or a hostname
    pub async fn resolve_device(&self, device: &str) -> Result<Option<Device>> {
        if let Ok(id) = device.parse::<i64>() {
            self.get_device(id).await
        } else {
            self.get_device_by_hostname(device).await
        }
    }

    pub async fn create_device(&self, req: &CreateDeviceRequest) -> Result<Device> {
        devices::DeviceRepo::create(&self.pool, req).await
    }

    pub async fn update_device(&self, id: i64, req: &UpdateDeviceRequest) -> Result<Device> {
        devices::DeviceRepo::update(&self.pool, id, req).await
    }

    pub async fn delete_device(&self, id: i64) -> Result<()> {
        devices::DeviceRepo::delete(&self.pool, id).await
    }

    pub async fn update_device_status(&self, id: i64, status: &str) -> Result<()> {
        devices::DeviceRepo::update_status(&self.pool, id, status).await
    }

    // ========== Batch / Job Operations ==========

    pub async fn create_batch(&self, batch: &Batch, jobs: &[Job]) -> Result<()> {
        batches::BatchRepo::create(&self.pool, batch, jobs).await
    }

    pub async fn get_batch(&self, id: &str) -> Result<Option<Batch>> {
        batches::BatchRepo::get(&self.pool, id).await
    }

    pub async fn complete_batch(&self, id: &str, state: BatchState) -> Result<()> {
        batches::BatchRepo::complete(&self.pool, id, state).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        jobs::JobRepo::get(&self.pool, id).await
    }

    pub async fn list_jobs(&self, batch_id: &str) -> Result<Vec<Job>> {
        jobs::JobRepo::list_for_batch(&self.pool, batch_id).await
    }

    pub async fn mark_job_running(&self, id: &str, attempt: i32) -> Result<bool> {
        jobs::JobRepo::mark_running(&self.pool, id, attempt).await
    }

    pub async fn mark_job_retrying(&self, id: &str, attempt: i32, reason: &str) -> Result<bool> {
        jobs::JobRepo::mark_retrying(&self.pool, id, attempt, reason).await
    }

    pub async fn finish_job(
        &self,
        id: &str,
        state: JobState,
        attempts: Option<i32>,
        message: &str,
        kind: Option<&str>,
    ) -> Result<bool> {
        jobs::JobRepo::finish(&self.pool, id, state, attempts, message, kind).await
    }

    pub async fn succeed_job_with_backup(
        &self,
        id: &str,
        attempts: i32,
        message: &str,
        backup: &NewBackup,
    ) -> Result<Option<i64>> {
        jobs::JobRepo::succeed_with_backup(&self.pool, id, attempts, message, backup).await
    }

    pub async fn close_unfinished_jobs(
        &self,
        batch_id: &str,
        state: JobState,
        message: &str,
        kind: &str,
    ) -> Result<u64> {
        jobs::JobRepo::close_unfinished(&self.pool, batch_id, state, message, kind).await
    }

    /// Fail live jobs and close running batches left behind by a previous process
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let jobs = jobs::JobRepo::fail_interrupted(&self.pool).await?;
        batches::BatchRepo::close_interrupted(&self.pool).await?;
        Ok(jobs)
    }

    // ========== Backup Operations ==========

    pub async fn save_backup(&self, backup: &NewBackup) -> Result<Backup> {
        let id = backups::BackupRepo::insert(&self.pool, backup).await?;
        self.get_backup(id)
            .await?
            .context("Backup not found after creation")
    }

    pub async fn get_backup(&self, id: i64) -> Result<Option<Backup>> {
        backups::BackupRepo::get(&self.pool, id).await
    }

    pub async fn delete_backup(&self, id: i64) -> Result<()> {
        backups::BackupRepo::delete(&self.pool, id).await
    }

    pub async fn backup_for_job(&self, job_id: &str) -> Result<Option<Backup>> {
        backups::BackupRepo::for_job(&self.pool, job_id).await
    }

    /// Lazy, newest-first backup stream
    pub fn query_backups(&self, filter: BackupFilter) -> BoxStream<'_, Result<Backup>> {
        backups::BackupRepo::query(&self.pool, filter)
    }

    /// Drain `query_backups` into a Vec
    pub async fn collect_backups(&self, filter: BackupFilter) -> Result<Vec<Backup>> {
        self.query_backups(filter).try_collect().await
    }

    // ========== Baseline Operations ==========

    pub async fn get_baseline(&self, device_id: i64) -> Result<Option<Baseline>> {
        baselines::BaselineRepo::get(&self.pool, device_id).await
    }

    pub async fn set_baseline(&self, device_id: i64, backup_id: i64) -> Result<Baseline> {
        baselines::BaselineRepo::set(&self.pool, device_id, backup_id).await
    }

    // ========== Deviation History ==========

    pub async fn record_deviation(&self, report: &DeviationReport, baseline_backup_id: i64) -> Result<bool> {
        deviations::DeviationRepo::record(&self.pool, report, baseline_backup_id).await
    }

    pub async fn list_deviations(&self, device_id: i64, limit: i64) -> Result<Vec<DeviationEvent>> {
        deviations::DeviationRepo::list_for_device(&self.pool, device_id, limit).await
    }

    // ========== Template Operations ==========

    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        templates::TemplateRepo::list(&self.pool).await
    }

    pub async fn get_template(&self, name: &str) -> Result<Option<Template>> {
        templates::TemplateRepo::get(&self.pool, name).await
    }

    pub async fn create_template(&self, req: &CreateTemplateRequest) -> Result<Template> {
        templates::TemplateRepo::create(&self.pool, req).await
    }

    // ========== Event Operations ==========

    pub async fn log_event(&self, event_type: &str, message: &str) -> Result<()> {
        events::EventRepo::log(&self.pool, event_type, message).await
    }

    pub async fn list_events(&self, limit: i64) -> Result<Vec<Event>> {
        events::EventRepo::list_recent(&self.pool, limit).await
    }
}

/// Open a store on a fresh database inside a temporary directory.
/// The directory guard must outlive the store.
#[cfg(test)]
pub(crate) async fn temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("netswift-test.db");
    let store = Store::new(path.to_str().unwrap()).await.unwrap();
    (store, dir)
}
