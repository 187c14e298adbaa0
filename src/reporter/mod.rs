use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{BatchKind, BatchResult, BatchState, JobState, Method};

/// Final (or current) outcome for one device in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceOutcome {
    pub device_name: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub attempts: i32,
}

/// Aggregate view of a batch, keyed by device id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub state: BatchState,
    pub method: Method,
    pub kind: BatchKind,
    pub validate_only: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    /// Jobs still pending or running
    pub in_progress: usize,
    pub per_device: BTreeMap<i64, DeviceOutcome>,
}

impl BatchSummary {
    pub fn is_finished(&self) -> bool {
        self.in_progress == 0
    }
}

pub fn summarize(result: &BatchResult) -> BatchSummary {
    let mut summary = BatchSummary {
        batch_id: result.batch.id.clone(),
        state: result.batch.state,
        method: result.batch.method,
        kind: result.batch.kind,
        validate_only: result.batch.validate_only,
        total: result.jobs.len(),
        succeeded: 0,
        failed: 0,
        timed_out: 0,
        cancelled: 0,
        in_progress: 0,
        per_device: BTreeMap::new(),
    };

    for job in &result.jobs {
        match job.state {
            JobState::Succeeded => summary.succeeded += 1,
            JobState::Failed => summary.failed += 1,
            JobState::TimedOut => summary.timed_out += 1,
            JobState::Cancelled => summary.cancelled += 1,
            JobState::Pending | JobState::Running => summary.in_progress += 1,
        }
        summary.per_device.insert(
            job.device_id,
            DeviceOutcome {
                device_name: job.device_name.clone(),
                state: job.state,
                message: job.result_message.clone(),
                error_kind: job.error_kind.clone(),
                attempts: job.attempt_count,
            },
        );
    }

    summary
}
