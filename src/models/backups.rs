use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Backup is an immutable capture of device output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: i64,
    pub device_id: i64,
    pub device_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub command: String,
    pub method: String,
    pub content: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

/// NewBackup is what a job or a manual save hands to the store
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub device_id: i64,
    pub device_name: String,
    pub job_id: Option<String>,
    pub command: String,
    pub method: String,
    pub content: String,
}

/// SaveBackupRequest is the HTTP body for a manual save
#[derive(Debug, Clone, Deserialize)]
pub struct SaveBackupRequest {
    /// Device id or hostname
    pub device: String,
    pub command: String,
    #[serde(default = "default_manual")]
    pub method: String,
    pub content: String,
}

fn default_manual() -> String {
    "manual".to_string()
}

/// Backup query filter. Every field is optional; `device` accepts an id or hostname.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupFilter {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Deviation severity, ordered from least to most serious
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warn" => Ok(Severity::Warn),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// DeviationReport compares a backup against the device baseline
#[derive(Debug, Clone, Serialize)]
pub struct DeviationReport {
    pub backup_id: i64,
    pub device_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_backup_id: Option<i64>,
    pub has_baseline: bool,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub severity: Severity,
}

/// DeviationEvent is a persisted warn or critical deviation result
#[derive(Debug, Clone, Serialize)]
pub struct DeviationEvent {
    pub id: i64,
    pub device_id: i64,
    pub backup_id: i64,
    pub baseline_backup_id: i64,
    pub severity: Severity,
    pub added: i64,
    pub removed: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviationQuery {
    #[serde(default = "default_deviation_limit")]
    pub limit: i64,
}

fn default_deviation_limit() -> i64 {
    50
}
