//! Wire types shared by the client, the server, and the cli views. Field
//! names serialize in camelCase to match the http api.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One closed usage interval: `app_name` was focused from `start_time` to
/// `end_time`. Produced by the client tracker and consumed by the server
/// merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageItem {
    pub app_name: Arc<str>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl UsageItem {
    pub fn duration_seconds(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}

/// Body of `POST /usage`. One batch per device, delivered at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageUpload {
    pub device_name: String,
    pub api_key: String,
    pub usages: Vec<UsageItem>,
}

/// Body of `POST /devices/{deviceName}/status`, the liveness beat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpload {
    pub api_key: String,
    pub current_app: String,
}

/// Response of `GET /devices/{deviceName}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub current_app: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub online: bool,
}

/// A canonical merged record as stored and queried on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRow {
    pub id: u64,
    pub device_name: String,
    pub app_name: Arc<str>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
}
