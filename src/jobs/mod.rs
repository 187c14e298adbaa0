//! Batch dispatcher.
//!
//! A submitted batch is validated and rendered up front, persisted together
//! with one Pending job per device, then handed to a coordinator task. The
//! coordinator takes permits from a FIFO semaphore in job order and spawns a
//! worker per job; workers run the per-job state machine in `worker.rs`.
//! Only the cancellation tokens of in-flight batches are held in memory.

mod worker;

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapters::{AdapterSet, DeviceAdapter, DeviceTarget};
use crate::config::{Config, CredentialProvider};
use crate::db::Store;
use crate::models::*;
use crate::render::{device_context, render_body, RenderError, Renderer};
use crate::reporter;
use crate::ws::Hub;

use worker::Outcome;

/// Tunables for the job engine
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub job_timeout: Duration,
    pub batch_timeout: Duration,
}

impl DispatcherSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_concurrency: cfg.max_concurrency,
            max_retries: cfg.max_retries,
            retry_backoff: cfg.retry_backoff,
            job_timeout: cfg.job_timeout,
            batch_timeout: cfg.batch_timeout,
        }
    }
}

/// Submission failures. Nothing is persisted when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),
    #[error("device not found: {0}")]
    DeviceNotFound(i64),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("dispatcher is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Handle to a started batch
pub struct BatchHandle {
    pub batch_id: String,
    handle: JoinHandle<Result<BatchResult>>,
}

impl std::fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHandle")
            .field("batch_id", &self.batch_id)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl BatchHandle {
    /// Wait until every job is terminal (or the batch deadline has closed the rest)
    pub async fn wait(self) -> Result<BatchResult, DispatchError> {
        match self.handle.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(DispatchError::Store(anyhow::anyhow!(
                "coordinator for batch {} stopped: {}",
                self.batch_id,
                e
            ))),
        }
    }
}

/// A job ready to run: its record, the device snapshot and the lines to send
struct PlannedJob {
    job: Job,
    target: DeviceTarget,
    lines: Vec<String>,
}

/// Everything a worker needs that is shared by the whole batch
#[derive(Clone)]
struct JobContext {
    adapter: Arc<dyn DeviceAdapter>,
    kind: BatchKind,
    validate_only: bool,
    deadline: Instant,
    token: CancellationToken,
}

pub struct Dispatcher {
    store: Store,
    adapters: AdapterSet,
    renderer: Renderer,
    credentials: CredentialProvider,
    settings: DispatcherSettings,
    ws_hub: Option<Arc<Hub>>,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        adapters: AdapterSet,
        credentials: CredentialProvider,
        settings: DispatcherSettings,
        ws_hub: Option<Arc<Hub>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            renderer: Renderer::new(store.clone()),
            store,
            adapters,
            credentials,
            settings,
            ws_hub,
            in_flight: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Fail jobs a previous process left unfinished. They are not re-run.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let count = self.store.recover_interrupted().await?;
        if count > 0 {
            tracing::warn!("Marked {} interrupted jobs as failed", count);
            self.log_event(
                event_type::SYSTEM,
                &format!("{} jobs interrupted by restart were marked failed", count),
            )
            .await;
        }
        Ok(count)
    }

    /// Run a batch to completion
    pub async fn submit(self: &Arc<Self>, req: BatchRequest) -> Result<BatchResult, DispatchError> {
        self.start(req).await?.wait().await
    }

    /// Validate, persist and launch a batch; returns as soon as the jobs are queued
    pub async fn start(self: &Arc<Self>, req: BatchRequest) -> Result<BatchHandle, DispatchError> {
        if !self.is_accepting() {
            return Err(DispatchError::ShuttingDown);
        }

        let mut seen = HashSet::new();
        let device_ids: Vec<i64> = req.device_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if device_ids.is_empty() {
            return Err(DispatchError::Validation("at least one device id is required".to_string()));
        }
        if req.validate_only && req.kind == BatchKind::Retrieve {
            return Err(DispatchError::Validation(
                "validate_only only applies to push batches".to_string(),
            ));
        }

        let mut devices = Vec::with_capacity(device_ids.len());
        for id in &device_ids {
            let device = self
                .store
                .get_device(*id)
                .await?
                .ok_or(DispatchError::DeviceNotFound(*id))?;
            devices.push(device);
        }

        let template = match &req.command {
            CommandSpec::Literal(text) => {
                if text.trim().is_empty() {
                    return Err(RenderError::EmptyCommand.into());
                }
                None
            }
            CommandSpec::Template { name, params } => {
                Some((self.renderer.check_for_dispatch(name, params).await?, params))
            }
        };

        let batch_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let mut planned = Vec::with_capacity(devices.len());
        for device in &devices {
            let payload = match &template {
                Some((tmpl, params)) => render_body(&tmpl.body, &device_context(device, params))?,
                None => req.command.label().to_string(),
            };
            let lines = payload_lines(&payload, req.kind);
            if lines.is_empty() {
                return Err(RenderError::EmptyCommand.into());
            }

            let credentials = self.credentials.resolve(device.credential_profile.as_deref());
            planned.push(PlannedJob {
                job: Job {
                    id: uuid::Uuid::new_v4().to_string(),
                    batch_id: batch_id.clone(),
                    device_id: device.id,
                    device_name: device.hostname.clone(),
                    payload,
                    method: req.method,
                    state: JobState::Pending,
                    attempt_count: 0,
                    result_message: None,
                    error_kind: None,
                    created_at: now,
                    started_at: None,
                    ended_at: None,
                },
                target: DeviceTarget::from_device(device, credentials),
                lines,
            });
        }

        let batch = Batch {
            id: batch_id.clone(),
            method: req.method,
            kind: req.kind,
            command: req.command.label().to_string(),
            validate_only: req.validate_only,
            state: BatchState::Running,
            device_count: planned.len() as i32,
            created_at: now,
            completed_at: None,
        };
        let jobs: Vec<Job> = planned.iter().map(|p| p.job.clone()).collect();
        self.store.create_batch(&batch, &jobs).await?;

        let token = self.shutdown.child_token();
        self.in_flight().insert(batch_id.clone(), token.clone());

        tracing::info!(
            "Batch {} started: {} {} of '{}' on {} devices{}",
            batch_id,
            batch.method,
            batch.kind.as_str(),
            batch.command,
            batch.device_count,
            if batch.validate_only { " (validate only)" } else { "" }
        );
        self.log_event(
            event_type::BATCH,
            &format!(
                "Batch {} started: {} via {} on {} devices",
                batch_id,
                batch.kind.as_str(),
                batch.method,
                batch.device_count
            ),
        )
        .await;
        if let Some(hub) = &self.ws_hub {
            hub.broadcast_batch_started(&batch).await;
        }

        let ctx = JobContext {
            adapter: self.adapters.get(req.method),
            kind: req.kind,
            validate_only: req.validate_only,
            deadline: Instant::now() + req.deadline.unwrap_or(self.settings.batch_timeout),
            token,
        };
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_batch(batch, planned, ctx).await });

        Ok(BatchHandle { batch_id, handle })
    }

    /// Fire the batch's cancellation token. False when the batch is not in flight.
    pub fn cancel(&self, batch_id: &str) -> bool {
        match self.in_flight().get(batch_id) {
            Some(token) => {
                tracing::info!("Cancelling batch {}", batch_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<Option<BatchResult>> {
        let Some(batch) = self.store.get_batch(batch_id).await? else {
            return Ok(None);
        };
        let jobs = self.store.list_jobs(batch_id).await?;
        Ok(Some(BatchResult { batch, jobs }))
    }

    pub async fn list_jobs(&self, batch_id: &str) -> Result<Vec<Job>> {
        self.store.list_jobs(batch_id).await
    }

    /// Stop accepting batches and cancel everything in flight
    pub fn shutdown(&self) {
        let active = self.in_flight().len();
        tracing::info!("Dispatcher shutting down, cancelling {} in-flight batches", active);
        self.shutdown.cancel();
    }

    pub fn is_accepting(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub fn active_batches(&self) -> usize {
        self.in_flight().len()
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Coordinator: one per batch
    async fn run_batch(self: Arc<Self>, batch: Batch, planned: Vec<PlannedJob>, ctx: JobContext) -> Result<BatchResult> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut queue = planned.into_iter();

        while let Some(plan) = queue.next() {
            let permit = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => None,
                _ = tokio::time::sleep_until(ctx.deadline) => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                // Not started: close it here along with the rest of the queue
                let leftover: Vec<PlannedJob> = std::iter::once(plan).chain(queue.by_ref()).collect();
                let outcome = if ctx.token.is_cancelled() {
                    Outcome::Cancelled
                } else {
                    Outcome::TimedOut
                };
                for job in leftover {
                    self.record(&job, &ctx, outcome.clone(), 0).await;
                }
                break;
            };

            let this = self.clone();
            let ctx = ctx.clone();
            workers.spawn(async move {
                let _permit = permit;
                this.run_job(plan, ctx).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Job worker in batch {} aborted: {}", batch.id, e);
            }
        }

        self.in_flight().remove(&batch.id);

        let cancelled = ctx.token.is_cancelled();
        let (job_state, message, kind) = if cancelled {
            (JobState::Cancelled, "batch cancelled", error_kind::CANCELLED)
        } else {
            (JobState::TimedOut, "batch deadline exceeded", error_kind::TIMED_OUT)
        };
        let stragglers = self.store.close_unfinished_jobs(&batch.id, job_state, message, kind).await?;
        if stragglers > 0 {
            tracing::warn!("Batch {}: closed {} unfinished jobs as {}", batch.id, stragglers, job_state);
        }

        let final_state = if cancelled { BatchState::Cancelled } else { BatchState::Completed };
        self.store.complete_batch(&batch.id, final_state).await?;

        let result = self
            .get_batch(&batch.id)
            .await?
            .ok_or_else(|| crate::db::NotFoundError::new("Batch", &batch.id))?;
        let summary = reporter::summarize(&result);

        tracing::info!(
            "Batch {} {}: {} succeeded, {} failed, {} timed out, {} cancelled",
            batch.id,
            final_state.as_str(),
            summary.succeeded,
            summary.failed,
            summary.timed_out,
            summary.cancelled
        );
        self.log_event(
            event_type::BATCH,
            &format!(
                "Batch {} {}: {} succeeded, {} failed, {} timed out, {} cancelled",
                batch.id,
                final_state.as_str(),
                summary.succeeded,
                summary.failed,
                summary.timed_out,
                summary.cancelled
            ),
        )
        .await;
        if let Some(hub) = &self.ws_hub {
            hub.broadcast_batch_completed(serde_json::to_value(&summary).unwrap_or_default())
                .await;
        }

        Ok(result)
    }

    async fn log_event(&self, kind: &str, message: &str) {
        if let Err(e) = self.store.log_event(kind, message).await {
            tracing::warn!("Failed to record {} event: {}", kind, e);
        }
    }
}

/// Non-empty payload lines. Config lines keep their indentation.
fn payload_lines(payload: &str, kind: BatchKind) -> Vec<String> {
    payload
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| match kind {
            BatchKind::Retrieve => l.trim().to_string(),
            BatchKind::Push => l.trim_end().to_string(),
        })
        .collect()
}
