use sqlx::{Row, sqlite::SqliteRow};

use crate::models::*;

/// Filter empty strings to None, for columns that store '' instead of NULL
pub fn none_if_empty(opt: Option<String>) -> Option<String> {
    opt.filter(|s| !s.is_empty())
}

/// Map a SQLite row to a Device struct
pub fn map_device_row(row: &SqliteRow) -> Device {
    Device {
        id: row.get("id"),
        hostname: row.get("hostname"),
        management_address: row.get("management_address"),
        port: row.get("port"),
        platform: row.get("platform"),
        credential_profile: none_if_empty(row.get("credential_profile")),
        status: row.get("status"),
        last_seen: row.get("last_seen"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a SQLite row to a Job struct.
/// Unknown state strings decode as Failed so a corrupt row never looks live.
pub fn map_job_row(row: &SqliteRow) -> Job {
    let state: String = row.get("state");
    let method: String = row.get("method");
    Job {
        id: row.get("id"),
        batch_id: row.get("batch_id"),
        device_id: row.get("device_id"),
        device_name: row.get("device_name"),
        payload: row.get("payload"),
        method: method.parse().unwrap_or(Method::Netmiko),
        state: state.parse().unwrap_or(JobState::Failed),
        attempt_count: row.get("attempt_count"),
        result_message: none_if_empty(row.get("result_message")),
        error_kind: none_if_empty(row.get("error_kind")),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
    }
}

/// Map a SQLite row to a Batch struct
pub fn map_batch_row(row: &SqliteRow) -> Batch {
    let method: String = row.get("method");
    let kind: String = row.get("kind");
    let state: String = row.get("state");
    Batch {
        id: row.get("id"),
        method: method.parse().unwrap_or(Method::Netmiko),
        kind: kind.parse().unwrap_or(BatchKind::Retrieve),
        command: row.get("command"),
        validate_only: row.get("validate_only"),
        state: state.parse().unwrap_or(BatchState::Completed),
        device_count: row.get("device_count"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    }
}

/// Map a SQLite row to a Backup struct
pub fn map_backup_row(row: &SqliteRow) -> Backup {
    Backup {
        id: row.get("id"),
        device_id: row.get("device_id"),
        device_name: row.get("device_name"),
        job_id: none_if_empty(row.get("job_id")),
        command: row.get("command"),
        method: row.get("method"),
        content: row.get("content"),
        size: row.get("size"),
        created_at: row.get("created_at"),
    }
}

/// Map a SQLite row to a Template struct
pub fn map_template_row(row: &SqliteRow) -> Template {
    Template {
        name: row.get("name"),
        description: row.get("description"),
        body: row.get("body"),
        created_at: row.get("created_at"),
    }
}

/// Map a SQLite row to an Event struct
pub fn map_event_row(row: &SqliteRow) -> Event {
    Event {
        id: row.get("id"),
        event_type: row.get("event_type"),
        message: row.get("message"),
        created_at: row.get("created_at"),
    }
}

/// Map a SQLite row to a Baseline struct
pub fn map_baseline_row(row: &SqliteRow) -> Baseline {
    Baseline {
        device_id: row.get("device_id"),
        backup_id: row.get("backup_id"),
        set_at: row.get("set_at"),
    }
}

/// Map a SQLite row to a DeviationEvent. Unknown severities decode as Critical.
pub fn map_deviation_row(row: &SqliteRow) -> DeviationEvent {
    let severity: String = row.get("severity");
    DeviationEvent {
        id: row.get("id"),
        device_id: row.get("device_id"),
        backup_id: row.get("backup_id"),
        baseline_backup_id: row.get("baseline_backup_id"),
        severity: severity.parse().unwrap_or(Severity::Critical),
        added: row.get("added"),
        removed: row.get("removed"),
        created_at: row.get("created_at"),
    }
}
