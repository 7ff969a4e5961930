//! Alert history store

use crate::bus::{ChangeBroadcast, ChangeKind, HistoryChange};
use crate::slot::KeyValueSlot;
use crate::StorageError;
use alerting::{Alert, AlertSource, Severity};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Slot key holding the serialized history
pub const HISTORY_KEY: &str = "accident_alert_history";

/// Largest configurable capacity
pub const MAX_CAPACITY: usize = 100;

/// History configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum retained alerts; the oldest is evicted on overflow
    pub capacity: usize,
    /// Slot key
    pub key: String,
    /// Directory for the file slot; in-memory when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            key: HISTORY_KEY.to_string(),
            data_dir: None,
        }
    }
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(StorageError::Config(format!(
                "capacity {} outside 1..={}",
                self.capacity, MAX_CAPACITY
            )));
        }
        if self.key.is_empty() {
            return Err(StorageError::Config("empty slot key".to_string()));
        }
        Ok(())
    }
}

/// Summary counts over the history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total: usize,
    /// Neither acknowledged nor dismissed
    pub active: usize,
    pub acknowledged: usize,
    pub dismissed: usize,
    pub high_severity: usize,
    pub by_source: BTreeMap<AlertSource, usize>,
}

/// The single source of truth for alerts.
///
/// All mutations are serialized on one lock; each one is persisted before
/// the lock is released and then broadcast.
pub struct AlertHistoryStore {
    alerts: Mutex<VecDeque<Alert>>,
    capacity: usize,
    key: String,
    slot: Arc<dyn KeyValueSlot>,
    bus: Arc<dyn ChangeBroadcast>,
    origin: Uuid,
    persist_failed: AtomicBool,
}

impl AlertHistoryStore {
    /// Open the store, loading whatever the slot holds
    pub fn open(
        config: &HistoryConfig,
        slot: Arc<dyn KeyValueSlot>,
        bus: Arc<dyn ChangeBroadcast>,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        let alerts = load(slot.as_ref(), &config.key, config.capacity);
        info!(
            "Alert history opened with {} alert(s), capacity {}",
            alerts.len(),
            config.capacity
        );
        Ok(Self {
            alerts: Mutex::new(alerts),
            capacity: config.capacity,
            key: config.key.clone(),
            slot,
            bus,
            origin: Uuid::new_v4(),
            persist_failed: AtomicBool::new(false),
        })
    }

    /// Identifier of this store instance in change notifications
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the full history. Failures are logged; memory stays authoritative
    /// and the next successful write brings the slot back in sync.
    fn persist(&self, alerts: &VecDeque<Alert>) {
        let written = serde_json::to_string(alerts)
            .map_err(|e| StorageError::Serialization(e.to_string()))
            .and_then(|text| self.slot.write(&self.key, &text));

        match written {
            Ok(()) => {
                if self.persist_failed.swap(false, Ordering::Relaxed) {
                    info!("Alert history persisted again after earlier failure");
                }
            }
            Err(e) => {
                self.persist_failed.store(true, Ordering::Relaxed);
                warn!("Failed to persist alert history, keeping in-memory state: {}", e);
            }
        }
    }

    fn publish(&self, kind: ChangeKind) {
        self.bus.publish(HistoryChange {
            origin: self.origin,
            kind,
        });
    }

    /// Append a new alert, evicting the oldest beyond capacity
    pub fn append(&self, alert: Alert) -> Result<(), StorageError> {
        alert.validate()?;
        let id = alert.id.clone();
        {
            let mut alerts = self.lock();
            if alerts.iter().any(|a| a.id == id) {
                return Err(StorageError::Duplicate(id));
            }
            alerts.push_front(alert);
            while alerts.len() > self.capacity {
                if let Some(evicted) = alerts.pop_back() {
                    debug!("Evicted alert {} from history", evicted.id);
                }
            }
            self.persist(&alerts);
        }
        self.publish(ChangeKind::Appended(id));
        Ok(())
    }

    /// Acknowledge an alert. Returns `false` if unknown or already acknowledged.
    pub fn acknowledge(&self, id: &str) -> bool {
        let changed = {
            let mut alerts = self.lock();
            let changed = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .map(|a| a.acknowledge(Utc::now()))
                .unwrap_or(false);
            if changed {
                self.persist(&alerts);
            }
            changed
        };
        if changed {
            info!("Alert acknowledged: {}", id);
            self.publish(ChangeKind::Acknowledged(id.to_string()));
        }
        changed
    }

    /// Dismiss an alert. Returns `false` if unknown or already dismissed.
    pub fn dismiss(&self, id: &str) -> bool {
        let changed = {
            let mut alerts = self.lock();
            let changed = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .map(|a| a.dismiss(Utc::now()))
                .unwrap_or(false);
            if changed {
                self.persist(&alerts);
            }
            changed
        };
        if changed {
            info!("Alert dismissed: {}", id);
            self.publish(ChangeKind::Dismissed(id.to_string()));
        }
        changed
    }

    /// Remove every alert
    pub fn clear(&self) {
        {
            let mut alerts = self.lock();
            alerts.clear();
            self.persist(&alerts);
        }
        info!("Alert history cleared");
        self.publish(ChangeKind::Cleared);
    }

    /// All alerts, newest first
    pub fn list(&self) -> Vec<Alert> {
        self.lock().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Alert> {
        self.lock().iter().find(|a| a.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> HistoryStats {
        let alerts = self.lock();
        let mut stats = HistoryStats {
            total: alerts.len(),
            ..Default::default()
        };
        for alert in alerts.iter() {
            if alert.is_active() {
                stats.active += 1;
            }
            if alert.acknowledged {
                stats.acknowledged += 1;
            }
            if alert.dismissed {
                stats.dismissed += 1;
            }
            if alert.severity == Severity::High {
                stats.high_severity += 1;
            }
            *stats.by_source.entry(alert.source).or_insert(0) += 1;
        }
        stats
    }

    /// Replace the in-memory view with the slot's contents
    pub fn reload(&self) -> usize {
        let loaded = load(self.slot.as_ref(), &self.key, self.capacity);
        let count = loaded.len();
        *self.lock() = loaded;
        debug!("Alert history reloaded with {} alert(s)", count);
        count
    }

    /// Change notifications from every store sharing the bus
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryChange> {
        self.bus.subscribe()
    }

    /// Reload whenever another store on the same bus reports a change
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let mut changes = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.origin != store.origin => {
                        debug!("History changed elsewhere ({:?}), reloading", change.kind);
                        store.reload();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} history notifications, reloading", missed);
                        store.reload();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Read the history from `slot`, keeping whatever still decodes
fn load(slot: &dyn KeyValueSlot, key: &str, capacity: usize) -> VecDeque<Alert> {
    let text = match slot.read(key) {
        Ok(Some(text)) => text,
        Ok(None) => return VecDeque::new(),
        Err(e) => {
            warn!("Failed to read alert history, starting empty: {}", e);
            return VecDeque::new();
        }
    };

    let entries: Vec<Value> = match serde_json::from_str(&text) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Alert history is unreadable, discarding it: {}", e);
            return VecDeque::new();
        }
    };

    let total = entries.len();
    let mut alerts: VecDeque<Alert> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<Alert>(entry).ok())
        .filter(|alert| alert.validate().is_ok())
        .collect();

    if alerts.len() < total {
        warn!(
            "Recovered {} of {} stored alerts, discarded the rest",
            alerts.len(),
            total
        );
    }
    alerts.truncate(capacity);
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::slot::MemorySlot;
    use alerting::AlertMetadata;
    use proptest::prelude::*;
    use result_router::DetectionResult;
    use std::time::Duration;

    /// Slot whose writes can be switched off
    #[derive(Default)]
    struct FlakySlot {
        inner: MemorySlot,
        failing: AtomicBool,
    }

    impl KeyValueSlot for FlakySlot {
        fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.read(key)
        }

        fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Io("quota exceeded".to_string()));
            }
            self.inner.write(key, value)
        }
    }

    fn alert(confidence: f64, source: AlertSource) -> Alert {
        let detection = DetectionResult::new(1, true, confidence, "accident", 0.1).unwrap();
        Alert::new(detection, source, AlertMetadata::default())
    }

    fn store_with(capacity: usize, slot: Arc<dyn KeyValueSlot>) -> AlertHistoryStore {
        let config = HistoryConfig {
            capacity,
            ..Default::default()
        };
        AlertHistoryStore::open(&config, slot, Arc::new(InProcessBus::default())).unwrap()
    }

    fn memory_store(capacity: usize) -> AlertHistoryStore {
        store_with(capacity, Arc::new(MemorySlot::new()))
    }

    #[test]
    fn test_capacity_eviction() {
        let store = memory_store(50);
        let mut ids = Vec::new();
        for _ in 0..51 {
            let a = alert(0.9, AlertSource::Live);
            ids.push(a.id.clone());
            store.append(a).unwrap();
        }

        let listed = store.list();
        assert_eq!(listed.len(), 50);
        assert!(listed.iter().all(|a| a.id != ids[0]));
        assert_eq!(listed[0].id, ids[50]);
    }

    #[test]
    fn test_idempotent_acknowledge() {
        let store = memory_store(50);
        let a = alert(0.9, AlertSource::Live);
        let id = a.id.clone();
        store.append(a).unwrap();

        assert!(store.acknowledge(&id));
        let first = store.get(&id).unwrap().acknowledged_at;
        assert!(first.is_some());

        assert!(!store.acknowledge(&id));
        assert_eq!(store.get(&id).unwrap().acknowledged_at, first);
        assert!(!store.acknowledge("missing"));
    }

    #[test]
    fn test_idempotent_dismiss() {
        let store = memory_store(50);
        let a = alert(0.6, AlertSource::Upload);
        let id = a.id.clone();
        store.append(a).unwrap();

        assert!(store.dismiss(&id));
        assert!(!store.dismiss(&id));
        assert!(store.get(&id).unwrap().dismissed);
    }

    #[test]
    fn test_round_trip_persistence() {
        let slot: Arc<dyn KeyValueSlot> = Arc::new(MemorySlot::new());
        let store = store_with(50, Arc::clone(&slot));
        for i in 0..5 {
            store.append(alert(0.5 + i as f64 * 0.1, AlertSource::Live)).unwrap();
        }
        let acked = store.list()[2].id.clone();
        store.acknowledge(&acked);

        let reloaded = store_with(50, slot);
        assert_eq!(reloaded.list(), store.list());
        assert!(reloaded.get(&acked).unwrap().acknowledged);
    }

    #[test]
    fn test_file_slot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let slot: Arc<dyn KeyValueSlot> = Arc::new(crate::FileSlot::new(dir.path()).unwrap());
        let store = store_with(10, Arc::clone(&slot));
        store.append(alert(0.9, AlertSource::AdminUpload)).unwrap();
        store.append(alert(0.3, AlertSource::Upload)).unwrap();

        let reloaded = store_with(10, Arc::new(crate::FileSlot::new(dir.path()).unwrap()));
        assert_eq!(reloaded.list(), store.list());
    }

    #[test]
    fn test_corrupted_slot_starts_empty() {
        let slot = Arc::new(MemorySlot::new());
        slot.write(HISTORY_KEY, "{not json").unwrap();
        let store = store_with(50, slot);
        assert!(store.is_empty());

        store.append(alert(0.9, AlertSource::Live)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_partially_corrupted_slot_recovers_valid_entries() {
        let good = alert(0.9, AlertSource::Live);
        let text = serde_json::to_string(&vec![
            serde_json::to_value(&good).unwrap(),
            serde_json::json!({"id": "broken"}),
        ])
        .unwrap();
        let slot = Arc::new(MemorySlot::new());
        slot.write(HISTORY_KEY, &text).unwrap();

        let store = store_with(50, slot);
        assert_eq!(store.list(), vec![good]);
    }

    #[test]
    fn test_write_failure_keeps_memory_authoritative() {
        let slot = Arc::new(FlakySlot::default());
        let store = store_with(50, Arc::clone(&slot) as Arc<dyn KeyValueSlot>);
        store.append(alert(0.9, AlertSource::Live)).unwrap();

        slot.failing.store(true, Ordering::SeqCst);
        store.append(alert(0.7, AlertSource::Live)).unwrap();
        assert_eq!(store.len(), 2);
        let stored: Vec<Value> =
            serde_json::from_str(&slot.read(HISTORY_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 1);

        slot.failing.store(false, Ordering::SeqCst);
        store.append(alert(0.2, AlertSource::Live)).unwrap();
        let reloaded = store_with(50, slot);
        assert_eq!(reloaded.list(), store.list());
    }

    #[test]
    fn test_rejects_invalid_and_duplicate() {
        let store = memory_store(50);
        let mut bad = alert(0.9, AlertSource::Live);
        bad.id = "not-a-uuid".to_string();
        assert!(matches!(store.append(bad), Err(StorageError::Validation(_))));

        let a = alert(0.9, AlertSource::Live);
        store.append(a.clone()).unwrap();
        assert!(matches!(store.append(a), Err(StorageError::Duplicate(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_stats() {
        let store = memory_store(50);
        let live = alert(0.95, AlertSource::Live);
        let upload = alert(0.6, AlertSource::Upload);
        let admin = alert(0.3, AlertSource::AdminUpload);
        let (live_id, upload_id) = (live.id.clone(), upload.id.clone());
        for a in [live, upload, admin] {
            store.append(a).unwrap();
        }
        store.acknowledge(&live_id);
        store.dismiss(&upload_id);

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.dismissed, 1);
        assert_eq!(stats.high_severity, 1);
        assert_eq!(stats.by_source[&AlertSource::Live], 1);
        assert_eq!(stats.by_source[&AlertSource::AdminUpload], 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["bySource"]["adminUpload"], 1);
        assert_eq!(json["highSeverity"], 1);
    }

    #[test]
    fn test_clear() {
        let slot: Arc<dyn KeyValueSlot> = Arc::new(MemorySlot::new());
        let store = store_with(50, Arc::clone(&slot));
        store.append(alert(0.9, AlertSource::Live)).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert!(store_with(50, slot).is_empty());
    }

    #[test]
    fn test_capacity_bounds() {
        let bus: Arc<dyn ChangeBroadcast> = Arc::new(InProcessBus::default());
        for capacity in [0, MAX_CAPACITY + 1] {
            let config = HistoryConfig {
                capacity,
                ..Default::default()
            };
            assert!(AlertHistoryStore::open(&config, Arc::new(MemorySlot::new()), Arc::clone(&bus)).is_err());
        }
    }

    #[tokio::test]
    async fn test_mutations_are_broadcast() {
        let store = memory_store(50);
        let mut changes = store.subscribe();
        let a = alert(0.9, AlertSource::Live);
        let id = a.id.clone();
        store.append(a).unwrap();
        store.acknowledge(&id);

        let first = changes.recv().await.unwrap();
        assert_eq!(first.origin, store.origin());
        assert_eq!(first.kind, ChangeKind::Appended(id.clone()));
        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Acknowledged(id));
    }

    #[tokio::test]
    async fn test_sync_between_consumers() {
        let slot: Arc<dyn KeyValueSlot> = Arc::new(MemorySlot::new());
        let bus: Arc<dyn ChangeBroadcast> = Arc::new(InProcessBus::default());
        let config = HistoryConfig::default();
        let writer = AlertHistoryStore::open(&config, Arc::clone(&slot), Arc::clone(&bus)).unwrap();
        let reader = Arc::new(AlertHistoryStore::open(&config, slot, bus).unwrap());
        let _sync = reader.spawn_sync();

        writer.append(alert(0.9, AlertSource::Live)).unwrap();

        for _ in 0..50 {
            if reader.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reader.list(), writer.list());
    }

    proptest! {
        #[test]
        fn prop_history_never_exceeds_capacity(capacity in 1usize..=20, appends in 0usize..40) {
            let store = memory_store(capacity);
            let mut ids = Vec::new();
            for _ in 0..appends {
                let a = alert(0.9, AlertSource::Live);
                ids.push(a.id.clone());
                store.append(a).unwrap();
            }
            let listed: Vec<String> = store.list().into_iter().map(|a| a.id).collect();
            let expected: Vec<String> = ids.iter().rev().take(capacity).cloned().collect();
            prop_assert_eq!(listed, expected);
        }
    }
}
