use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical event type values
pub mod event_type {
    pub const STATUS: &str = "status";
    pub const RETRIEVAL: &str = "retrieval";
    pub const PUSH: &str = "push";
    pub const BATCH: &str = "batch";
    pub const SYSTEM: &str = "system";
}

/// Event is one line of the operator-facing activity log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}
