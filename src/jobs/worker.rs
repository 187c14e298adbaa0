use std::sync::atomic::{AtomicU32, Ordering};

use crate::adapters::{AdapterError, DeviceAdapter, Session};
use crate::models::*;

use super::{Dispatcher, JobContext, PlannedJob};

/// How a job ended
#[derive(Debug, Clone)]
pub(super) enum Outcome {
    Succeeded(String),
    Failed(AdapterError),
    TimedOut,
    Cancelled,
}

impl Dispatcher {
    /// Drive one job to a terminal state
    pub(super) async fn run_job(&self, plan: PlannedJob, ctx: JobContext) {
        let attempts = AtomicU32::new(0);

        let outcome = if ctx.token.is_cancelled() {
            Outcome::Cancelled
        } else if ctx.validate_only && !ctx.adapter.supports_dry_run() {
            Outcome::Failed(AdapterError::ValidationUnsupported(ctx.adapter.method()))
        } else {
            let job_deadline = std::cmp::min(
                tokio::time::Instant::now() + self.settings.job_timeout,
                ctx.deadline,
            );
            tokio::select! {
                biased;
                _ = ctx.token.cancelled() => Outcome::Cancelled,
                res = tokio::time::timeout_at(job_deadline, self.attempt_loop(&plan, &ctx, &attempts)) => match res {
                    Ok(Ok(output)) => Outcome::Succeeded(output),
                    Ok(Err(e)) => Outcome::Failed(e),
                    Err(_) => Outcome::TimedOut,
                },
            }
        };

        let attempts = attempts.load(Ordering::Relaxed) as i32;
        self.record(&plan, &ctx, outcome, attempts).await;
    }

    /// Attempts are sequential; only connection errors are retried
    async fn attempt_loop(&self, plan: &PlannedJob, ctx: &JobContext, attempts: &AtomicU32) -> Result<String, AdapterError> {
        let max_attempts = self.settings.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            attempts.store(attempt, Ordering::Relaxed);

            match self.attempt_once(plan, ctx, attempt).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        "Job {} on {}: attempt {}/{} failed: {}",
                        plan.job.id,
                        plan.target.hostname,
                        attempt,
                        max_attempts,
                        e
                    );
                    if let Err(err) = self.store.mark_job_retrying(&plan.job.id, attempt as i32, &e.to_string()).await {
                        tracing::warn!("Failed to mark job {} for retry: {}", plan.job.id, err);
                    }
                    tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_once(&self, plan: &PlannedJob, ctx: &JobContext, attempt: u32) -> Result<String, AdapterError> {
        let mut session = ctx.adapter.open_session(&plan.target).await?;

        match self.store.mark_job_running(&plan.job.id, attempt as i32).await {
            Ok(true) => self.notify_job(&plan.job.id).await,
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to mark job {} running: {}", plan.job.id, e),
        }

        let result = execute(ctx.adapter.as_ref(), &mut session, ctx, &plan.lines).await;
        ctx.adapter.close(&mut session).await;
        result
    }

    /// Persist the terminal state, the backup on success, and one event
    pub(super) async fn record(&self, plan: &PlannedJob, ctx: &JobContext, outcome: Outcome, attempts: i32) {
        let job = &plan.job;
        let verb = match (ctx.kind, ctx.validate_only) {
            (BatchKind::Retrieve, _) => "retrieve",
            (BatchKind::Push, false) => "push",
            (BatchKind::Push, true) => "validate",
        };

        let (state, message) = match &outcome {
            Outcome::Succeeded(output) => {
                let message = match ctx.kind {
                    BatchKind::Retrieve => format!("retrieved {} bytes", output.len()),
                    BatchKind::Push if ctx.validate_only => format!("validated {} config lines (dry run)", plan.lines.len()),
                    BatchKind::Push => format!("pushed {} config lines", plan.lines.len()),
                };
                let backup = NewBackup {
                    device_id: job.device_id,
                    device_name: job.device_name.clone(),
                    job_id: Some(job.id.clone()),
                    command: job.payload.clone(),
                    method: job.method.as_str().to_string(),
                    content: output.clone(),
                };
                match self.store.succeed_job_with_backup(&job.id, attempts, &message, &backup).await {
                    Ok(Some(backup_id)) => {
                        tracing::info!("Job {} on {} succeeded, backup {}", job.id, job.device_name, backup_id)
                    }
                    Ok(None) => tracing::debug!("Job {} was already terminal", job.id),
                    Err(e) => tracing::error!("Failed to record success of job {}: {}", job.id, e),
                }
                (JobState::Succeeded, message)
            }
            other => {
                let (state, message, kind) = match other {
                    Outcome::Failed(e) => (JobState::Failed, e.to_string(), e.kind()),
                    Outcome::TimedOut => (JobState::TimedOut, "job deadline exceeded".to_string(), error_kind::TIMED_OUT),
                    _ => (JobState::Cancelled, "batch cancelled".to_string(), error_kind::CANCELLED),
                };
                match self.store.finish_job(&job.id, state, Some(attempts), &message, Some(kind)).await {
                    Ok(true) => tracing::info!(
                        "Job {} on {} {} after {} attempts: {}",
                        job.id,
                        job.device_name,
                        state,
                        attempts,
                        message
                    ),
                    Ok(false) => tracing::debug!("Job {} was already terminal", job.id),
                    Err(e) => tracing::error!("Failed to record {} for job {}: {}", state, job.id, e),
                }
                (state, message)
            }
        };

        let event = match ctx.kind {
            BatchKind::Retrieve => event_type::RETRIEVAL,
            BatchKind::Push => event_type::PUSH,
        };
        self.log_event(
            event,
            &format!("{} on {} via {} {}: {}", verb, job.device_name, job.method, state, message),
        )
        .await;
        self.notify_job(&job.id).await;
    }

    async fn notify_job(&self, job_id: &str) {
        let Some(hub) = &self.ws_hub else { return };
        match self.store.get_job(job_id).await {
            Ok(Some(job)) => hub.broadcast_job_updated(&job).await,
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load job {} for broadcast: {}", job_id, e),
        }
    }
}

/// Retrieve runs each line as its own command; push sends the lines as one set
async fn execute(
    adapter: &dyn DeviceAdapter,
    session: &mut Session,
    ctx: &JobContext,
    lines: &[String],
) -> Result<String, AdapterError> {
    match ctx.kind {
        BatchKind::Retrieve => {
            let mut outputs = Vec::with_capacity(lines.len());
            for command in lines {
                outputs.push(adapter.exec_command(session, command).await?);
            }
            Ok(outputs.join("\n"))
        }
        BatchKind::Push if ctx.validate_only => adapter.exec_config_dry_run(session, lines).await,
        BatchKind::Push => adapter.exec_config(session, lines).await,
    }
}
