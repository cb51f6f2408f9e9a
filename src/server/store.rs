use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{api::UsageRow, fs::operations};

/// How long after its last status beat a device still counts as online.
const ONLINE_WINDOW: Duration = Duration::seconds(30);

/// A registered device. The api key presented on first contact becomes
/// canonical; `current_app`/`last_seen` come from the status channel only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_name: String,
    pub api_key: String,
    #[serde(default)]
    pub current_app: String,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    pub fn online(&self, now: DateTime<Utc>) -> bool {
        matches!(self.last_seen, Some(seen) if now - seen < ONLINE_WINDOW)
    }
}

/// The canonical tables. Persistence mechanics are deliberately primitive: the
/// whole state serializes into one json snapshot that is rewritten after each
/// mutating request.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub devices: BTreeMap<String, Device>,
    pub usages: Vec<UsageRow>,
    pub next_id: u64,
}

impl StoreState {
    /// Index of the most recent stored record for `(device, app)`, by
    /// `end_time` descending.
    pub fn latest_record(&self, device_name: &str, app_name: &str) -> Option<usize> {
        self.usages
            .iter()
            .enumerate()
            .filter(|(_, row)| row.device_name == device_name && *row.app_name == *app_name)
            .max_by_key(|(_, row)| row.end_time)
            .map(|(i, _)| i)
    }

    pub fn insert_usage(&mut self, mut row: UsageRow) -> usize {
        row.id = self.next_id;
        self.next_id += 1;
        self.usages.push(row);
        self.usages.len() - 1
    }
}

pub enum StatusUpdate {
    Updated,
    UnknownDevice,
    BadKey,
}

/// Shared handle to the canonical store. Reads take the lock shared; every
/// request that mutates runs as one exclusive-lock unit followed by a
/// snapshot write.
pub struct UsageStore {
    path: Option<PathBuf>,
    pub(crate) state: RwLock<StoreState>,
}

impl UsageStore {
    /// In-memory only store, used by tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Opens the store backed by a snapshot file. A missing or unreadable
    /// snapshot starts empty.
    pub async fn open(path: PathBuf) -> Self {
        let state = match operations::read_locked(&path).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<StoreState>(&bytes) {
                Ok(state) => {
                    info!(
                        "Loaded snapshot: {} devices, {} usage rows",
                        state.devices.len(),
                        state.usages.len()
                    );
                    state
                }
                Err(e) => {
                    warn!("Snapshot at {path:?} is unreadable, starting empty: {e:?}");
                    StoreState::default()
                }
            },
            Ok(None) => StoreState::default(),
            Err(e) => {
                warn!("Couldn't open snapshot at {path:?}, starting empty: {e:?}");
                StoreState::default()
            }
        };
        Self {
            path: Some(path),
            state: RwLock::new(state),
        }
    }

    /// Writes the current state to the snapshot file.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let state = self.state.read().await;
            serde_json::to_vec(&*state)?
        };
        operations::atomic_overwrite(path, &json).await
    }

    pub async fn list_devices(&self) -> Vec<String> {
        self.state.read().await.devices.keys().cloned().collect()
    }

    pub async fn get_device(&self, device_name: &str) -> Option<Device> {
        self.state.read().await.devices.get(device_name).cloned()
    }

    pub async fn update_status(
        &self,
        device_name: &str,
        api_key: &str,
        current_app: String,
        now: DateTime<Utc>,
    ) -> StatusUpdate {
        let mut state = self.state.write().await;
        let Some(device) = state.devices.get_mut(device_name) else {
            return StatusUpdate::UnknownDevice;
        };
        if device.api_key != api_key {
            return StatusUpdate::BadKey;
        }
        device.current_app = current_app;
        device.last_seen = Some(now);
        StatusUpdate::Updated
    }

    /// Stored records for a device, optionally restricted to the utc calendar
    /// day, newest `start_time` first.
    pub async fn query_usage(&self, device_name: Option<&str>, day: Option<NaiveDate>) -> Vec<UsageRow> {
        let bounds = day.map(|d| {
            let start = Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap());
            (start, start + Duration::days(1))
        });

        let state = self.state.read().await;
        let mut rows: Vec<UsageRow> = state
            .usages
            .iter()
            .filter(|row| device_name.map_or(true, |name| row.device_name == name))
            .filter(|row| {
                bounds.map_or(true, |(start, end)| row.start_time >= start && row.start_time < end)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        rows
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    use crate::api::UsageRow;

    use super::{Device, StoreState, UsageStore};

    fn row(device: &str, app: &str, day: u32, hour: u32) -> UsageRow {
        let start = Utc.with_ymd_and_hms(2018, 7, day, hour, 0, 0).unwrap();
        UsageRow {
            id: 0,
            device_name: device.into(),
            app_name: app.into(),
            start_time: start,
            end_time: start + Duration::minutes(5),
            duration_seconds: 300,
        }
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = UsageStore::open(path.clone()).await;
        {
            let mut state = store.state.write().await;
            state.devices.insert(
                "desk".into(),
                Device {
                    device_name: "desk".into(),
                    api_key: "k1".into(),
                    current_app: String::new(),
                    last_seen: None,
                },
            );
            state.insert_usage(row("desk", "chrome", 4, 10));
        }
        store.persist().await.unwrap();

        let reopened = UsageStore::open(path).await;
        assert_eq!(reopened.list_devices().await, vec!["desk".to_string()]);
        assert_eq!(reopened.query_usage(Some("desk"), None).await.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{oops").unwrap();

        let store = UsageStore::open(path).await;
        assert!(store.list_devices().await.is_empty());
    }

    #[tokio::test]
    async fn query_filters_by_day_and_sorts_descending() {
        let store = UsageStore::in_memory();
        {
            let mut state = store.state.write().await;
            state.insert_usage(row("desk", "chrome", 4, 10));
            state.insert_usage(row("desk", "code", 4, 12));
            state.insert_usage(row("desk", "chrome", 5, 9));
            state.insert_usage(row("other", "chrome", 4, 11));
        }

        let day = NaiveDate::from_ymd_opt(2018, 7, 4).unwrap();
        let rows = store.query_usage(Some("desk"), Some(day)).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(&*rows[0].app_name, "code");
        assert_eq!(&*rows[1].app_name, "chrome");
    }

    #[test]
    fn latest_record_picks_highest_end_time() {
        let mut state = StoreState::default();
        state.insert_usage(row("desk", "chrome", 4, 10));
        let newest = state.insert_usage(row("desk", "chrome", 4, 14));
        state.insert_usage(row("desk", "code", 4, 16));

        assert_eq!(state.latest_record("desk", "chrome"), Some(newest));
        assert_eq!(state.latest_record("desk", "vim"), None);
    }

    #[test]
    fn online_window() {
        let now = Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap();
        let mut device = Device {
            device_name: "desk".into(),
            api_key: "k1".into(),
            current_app: String::new(),
            last_seen: Some(now - Duration::seconds(10)),
        };
        assert!(device.online(now));
        device.last_seen = Some(now - Duration::seconds(31));
        assert!(!device.online(now));
        device.last_seen = None;
        assert!(!device.online(now));
    }
}
