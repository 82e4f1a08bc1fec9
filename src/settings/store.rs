//! Settings Store (component C). Grounded on the teacher's
//! `settings::io` atomic write discipline, generalised from a fixed set of
//! Tauri-exposed fields into the typed `SettingKey<T>` registry and a
//! single-writer/lock-free-reader snapshot model (spec §5).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use crate::error::{ClopError, ClopResult};
use crate::settings::io::{config_root, read_json_file, write_json_file};
use crate::settings::keys::SettingKey;
use crate::settings::migrations::{hydrate_defaults, migrate};

const COALESCE_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsDocument {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub values: Map<String, Value>,
}

impl SettingsDocument {
    fn default_hydrated() -> Self {
        Self {
            schema_version: crate::settings::migrations::CURRENT_SCHEMA_VERSION,
            values: hydrate_defaults(),
        }
    }
}

/// A trait from JSON `Value` into the setting's native type, with a
/// fallback to the key's own default on missing/malformed values so
/// `get` is infallible (spec §4.C: "typed API").
pub trait FromSettingValue: Sized {
    fn from_value(value: Option<&Value>) -> Option<Self>;
}

impl FromSettingValue for bool {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_bool)
    }
}

impl FromSettingValue for i64 {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_i64)
    }
}

impl FromSettingValue for f64 {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_f64)
    }
}

impl FromSettingValue for String {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_str).map(str::to_owned)
    }
}

impl FromSettingValue for Vec<String> {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        value.and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
    }
}

pub struct SettingsStore {
    path: PathBuf,
    snapshot: RwLock<Arc<SettingsDocument>>,
    writer_lock: Mutex<()>,
    change_tx: broadcast::Sender<Arc<SettingsDocument>>,
    flush_notify: Arc<Notify>,
}

impl SettingsStore {
    /// Loads `<config_root>/config.json`, creating and atomically writing a
    /// default-hydrated document on first access, then running migrations.
    pub async fn open(app_name: &str) -> ClopResult<Arc<Self>> {
        let root = config_root(app_name).map_err(|e| ClopError::Configuration(e.to_string()))?;
        let path = root.join("config.json");
        let mut doc = if path.exists() {
            read_json_file::<SettingsDocument>(&path)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "settings document unreadable, starting from defaults");
                    SettingsDocument::default_hydrated()
                })
        } else {
            SettingsDocument::default_hydrated()
        };
        migrate(&mut doc);
        write_json_file(&path, &doc).map_err(|e| ClopError::Configuration(e.to_string()))?;

        let (change_tx, _) = broadcast::channel(32);
        let store = Arc::new(Self {
            path,
            snapshot: RwLock::new(Arc::new(doc)),
            writer_lock: Mutex::new(()),
            change_tx,
            flush_notify: Arc::new(Notify::new()),
        });
        store.clone().spawn_flush_task();
        Ok(store)
    }

    /// In-memory only, for tests and embedding contexts that do not want
    /// filesystem side effects.
    pub fn in_memory() -> Arc<Self> {
        let (change_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            path: PathBuf::from("/dev/null/clop-in-memory-config.json"),
            snapshot: RwLock::new(Arc::new(SettingsDocument::default_hydrated())),
            writer_lock: Mutex::new(()),
            change_tx,
            flush_notify: Arc::new(Notify::new()),
        })
    }

    pub fn get<T: FromSettingValue>(&self, key: SettingKey<T>) -> T {
        let snapshot = self.snapshot.read();
        T::from_value(snapshot.values.get(key.name)).unwrap_or_else(key.default)
    }

    pub fn set<T>(&self, key: SettingKey<T>, value: T)
    where
        T: FromSettingValue + Into<Value>,
    {
        let _guard = self.writer_lock.lock();
        let mut next = (**self.snapshot.read()).clone();
        next.values.insert(key.name.to_string(), value.into());
        let next = Arc::new(next);
        *self.snapshot.write() = next.clone();
        let _ = self.change_tx.send(next);
        self.flush_notify.notify_one();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SettingsDocument>> {
        self.change_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<SettingsDocument> {
        self.snapshot.read().clone()
    }

    /// Flushing is decoupled from `set` so bursts of writes within
    /// `COALESCE_WINDOW` collapse into a single disk write (spec §4.C:
    /// "persistence batches within a small coalescing window").
    fn spawn_flush_task(self: Arc<Self>) {
        if self.path.starts_with("/dev/null") {
            return;
        }
        let notify = self.flush_notify.clone();
        tokio::spawn(async move {
            loop {
                notify.notified().await;
                tokio::time::sleep(COALESCE_WINDOW).await;
                let doc = self.snapshot.read().clone();
                if let Err(e) = write_json_file(&self.path, &*doc) {
                    warn!(error = %e, "failed to persist settings document");
                } else {
                    debug!("settings document flushed to disk");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::keys;

    #[test]
    fn get_returns_default_when_key_absent() {
        let store = SettingsStore::in_memory();
        assert_eq!(store.get(keys::MAX_IMAGE_SIZE_MB), 50);
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = SettingsStore::in_memory();
        store.set(keys::MAX_IMAGE_SIZE_MB, 99);
        assert_eq!(store.get(keys::MAX_IMAGE_SIZE_MB), 99);
    }

    #[test]
    fn unknown_keys_in_raw_document_are_retained_across_clone() {
        let store = SettingsStore::in_memory();
        {
            let mut doc = (*store.snapshot()).clone();
            doc.values.insert("SomeFutureKey".into(), Value::String("x".into()));
            *store.snapshot.write() = Arc::new(doc);
        }
        store.set(keys::MAX_IMAGE_SIZE_MB, 12);
        assert_eq!(
            store.snapshot().values.get("SomeFutureKey").and_then(Value::as_str),
            Some("x")
        );
    }

    #[tokio::test]
    async fn subscribe_receives_full_snapshot_on_change() {
        let store = SettingsStore::in_memory();
        let mut rx = store.subscribe();
        store.set(keys::MAX_VIDEO_SIZE_MB, 777);
        let doc = rx.recv().await.unwrap();
        assert_eq!(
            doc.values.get("MaxVideoSizeMb").and_then(Value::as_i64),
            Some(777)
        );
    }
}
