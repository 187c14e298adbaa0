use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Lifecycle state of a single per-device job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "timed_out" => Ok(JobState::TimedOut),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automation backend style used to talk to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Netmiko,
    Napalm,
    Nornir,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Netmiko, Method::Napalm, Method::Nornir];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Netmiko => "netmiko",
            Method::Napalm => "napalm",
            Method::Nornir => "nornir",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "netmiko" => Ok(Method::Netmiko),
            "napalm" => Ok(Method::Napalm),
            "nornir" => Ok(Method::Nornir),
            other => {
                let known: Vec<&str> = Method::ALL.iter().map(|m| m.as_str()).collect();
                Err(format!("unknown method: {} (expected one of {})", other, known.join(", ")))
            }
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a batch reads from or writes to devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Retrieve,
    Push,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Retrieve => "retrieve",
            BatchKind::Push => "push",
        }
    }
}

impl FromStr for BatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retrieve" => Ok(BatchKind::Retrieve),
            "push" => Ok(BatchKind::Push),
            other => Err(format!("unknown batch kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Running,
    Completed,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Running => "running",
            BatchState::Completed => "completed",
            BatchState::Cancelled => "cancelled",
        }
    }
}

impl FromStr for BatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(BatchState::Running),
            "completed" => Ok(BatchState::Completed),
            "cancelled" => Ok(BatchState::Cancelled),
            other => Err(format!("unknown batch state: {}", other)),
        }
    }
}

/// Canonical error kinds recorded on terminal jobs
pub mod error_kind {
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const COMMAND_ERROR: &str = "command_error";
    pub const VALIDATION_UNSUPPORTED: &str = "validation_unsupported";
    pub const TIMED_OUT: &str = "timed_out";
    pub const CANCELLED: &str = "cancelled";
    pub const INTERRUPTED: &str = "interrupted";
}

/// Job is one device's share of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub batch_id: String,
    pub device_id: i64,
    pub device_name: String,
    /// Literal command text (retrieve) or config lines (push) sent to the device
    pub payload: String,
    pub method: Method,
    pub state: JobState,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Batch is the durable record of an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub method: Method,
    pub kind: BatchKind,
    /// Template name or literal command as submitted
    pub command: String,
    pub validate_only: bool,
    pub state: BatchState,
    pub device_count: i32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// BatchResult is a batch with every one of its jobs
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch: Batch,
    pub jobs: Vec<Job>,
}

/// What to send to each device: a literal command or a catalog template
#[derive(Debug, Clone, PartialEq)]
pub enum CommandSpec {
    Literal(String),
    Template {
        name: String,
        params: HashMap<String, serde_json::Value>,
    },
}

impl CommandSpec {
    /// Label stored on the batch record
    pub fn label(&self) -> &str {
        match self {
            CommandSpec::Literal(text) => text,
            CommandSpec::Template { name, .. } => name,
        }
    }
}

/// BatchRequest is a validated dispatch request
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub device_ids: Vec<i64>,
    pub command: CommandSpec,
    pub method: Method,
    pub kind: BatchKind,
    pub validate_only: bool,
    /// Overall deadline; falls back to the configured batch timeout
    pub deadline: Option<Duration>,
}

fn default_method() -> String {
    "netmiko".to_string()
}

/// CreateBatchRequest is the HTTP body for batch submission
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBatchRequest {
    #[serde(default)]
    pub device_ids: Vec<i64>,
    /// Single literal command (retrieve by default)
    #[serde(default)]
    pub command: Option<String>,
    /// Literal config lines (push by default)
    #[serde(default)]
    pub commands: Option<Vec<String>>,
    /// Catalog template name (push by default)
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub validate_only: bool,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl CreateBatchRequest {
    /// Resolve defaults and enum fields into a dispatchable request
    pub fn into_batch_request(self) -> Result<BatchRequest, String> {
        let method: Method = self.method.parse()?;

        let (command, default_kind) = match (self.template, self.commands, self.command) {
            (Some(name), None, None) => (
                CommandSpec::Template {
                    name,
                    params: self.params,
                },
                BatchKind::Push,
            ),
            (None, Some(lines), None) => (CommandSpec::Literal(lines.join("\n")), BatchKind::Push),
            (None, None, Some(text)) => (CommandSpec::Literal(text), BatchKind::Retrieve),
            (None, None, None) => {
                return Err("one of command, commands or template is required".to_string())
            }
            _ => return Err("command, commands and template are mutually exclusive".to_string()),
        };

        let kind = match self.kind {
            Some(k) => k.parse()?,
            None => default_kind,
        };

        Ok(BatchRequest {
            device_ids: self.device_ids,
            command,
            method,
            kind,
            validate_only: self.validate_only,
            deadline: self.deadline_secs.map(Duration::from_secs),
        })
    }
}

/// BatchAccepted is returned by the asynchronous submit endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BatchAccepted {
    pub batch_id: String,
}

/// RetrieveRequest runs one command on one device and waits for it
#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveRequest {
    pub device: String,
    pub command: String,
    #[serde(default = "default_method")]
    pub method: String,
}

/// PushRequest sends config lines to one device and waits for it
#[derive(Debug, Clone, Deserialize)]
pub struct PushRequest {
    pub device: String,
    pub commands: Vec<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub validate_only: bool,
}

/// ConfigOpResult reports a single-device retrieve or push once its job is terminal
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOpResult {
    pub batch_id: String,
    pub device_id: i64,
    pub device_name: String,
    pub state: JobState,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Device output (or dry-run diff) of a succeeded job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}
