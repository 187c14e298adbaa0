use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical device status values
pub mod device_status {
    pub const ONLINE: &str = "online";
    pub const OFFLINE: &str = "offline";
    pub const UNKNOWN: &str = "unknown";

    pub const ALL: [&str; 3] = [ONLINE, OFFLINE, UNKNOWN];
}

fn default_port() -> i32 {
    22
}

fn default_platform() -> String {
    "ios".to_string()
}

/// Device represents a managed network device in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub hostname: String,
    pub management_address: String,
    pub port: i32,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_profile: Option<String>,
    pub status: String, // online, offline, unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// CreateDeviceRequest for registering a device
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeviceRequest {
    pub hostname: String,
    pub management_address: String,
    #[serde(default = "default_port")]
    pub port: i32,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub credential_profile: Option<String>,
}

/// UpdateDeviceRequest carries a partial edit; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDeviceRequest {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub management_address: Option<String>,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub credential_profile: Option<String>,
}

/// Query-string filter for device listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceFilter {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// SetBaselineRequest pins a backup as the device's reference config
#[derive(Debug, Clone, Deserialize)]
pub struct SetBaselineRequest {
    pub backup_id: i64,
}

/// Baseline is the reference backup used for deviation checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub device_id: i64,
    pub backup_id: i64,
    pub set_at: DateTime<Utc>,
}

/// StatusUpdateRequest overrides the stored status of a device
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

/// ConnectivityRequest names the devices to check (ids or hostnames); absent means all
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectivityRequest {
    #[serde(default)]
    pub devices: Option<Vec<String>>,
}

/// Reachability of one requested device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connectivity {
    pub status: String,
    pub error: Option<String>,
}

/// ConnectivityResponse is keyed by the name the caller used
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityResponse {
    pub results: BTreeMap<String, Connectivity>,
}
