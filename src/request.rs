//! Core data model (spec §3): `Request`, `Result`, `Ticket`, `Progress` and
//! the dynamic metadata helper. Grounded on the teacher's `domain::job::Job`
//! family, stripped of GUI-facing fields (queue order, batch id, taskbar
//! progress) that have no counterpart in a headless engine.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::path::FilePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ItemType {
    Image,
    Video,
    Pdf,
    Document,
    ClipboardImage,
    ClipboardVideo,
}

impl ItemType {
    /// Both clipboard variants are routed through the file-backed optimiser
    /// for the same media family; only the capture mechanism differs.
    pub fn optimiser_key(self) -> ItemType {
        match self {
            ItemType::ClipboardImage => ItemType::Image,
            ItemType::ClipboardVideo => ItemType::Video,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Status {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unsupported,
}

/// Typed wrapper over the request's dynamic `Map<String, Value>` metadata,
/// accepting both raw JSON scalars and the `video.key` / `key` aliasing the
/// sibling implementation relies on (spec §9, "dynamic metadata map").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata(pub HashMap<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(key) {
            return Some(v);
        }
        // Alias: "video.maxWidth" <-> "maxWidth" when no prefixed key is set.
        if let Some(stripped) = key.split_once('.').map(|(_, rest)| rest) {
            return self.0.get(stripped);
        }
        None
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.lookup(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.lookup(key).and_then(Value::as_i64).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.lookup(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.lookup(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: String,
    pub item_type: ItemType,
    pub source_path: FilePath,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimiseOutcome {
    pub request_id: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<FilePathOwned>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration: Duration,
}

/// Serialisable mirror of `FilePath` (which deliberately has no `Serialize`
/// impl of its own, since its invariants are enforced only at construction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePathOwned(pub String);

impl From<&FilePath> for FilePathOwned {
    fn from(p: &FilePath) -> Self {
        Self(p.to_string())
    }
}

impl OptimiseOutcome {
    pub fn succeeded(request_id: impl Into<String>, output_path: &FilePath, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            status: Status::Succeeded,
            output_path: Some(output_path.into()),
            message: Some(message.into()),
            duration,
        }
    }

    pub fn failed(request_id: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            status: Status::Failed,
            output_path: None,
            message: Some(message.into()),
            duration,
        }
    }

    pub fn cancelled(request_id: impl Into<String>, duration: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            status: Status::Cancelled,
            output_path: None,
            message: None,
            duration,
        }
    }

    pub fn unsupported(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: Status::Unsupported,
            output_path: None,
            message: Some("no optimiser registered for item type".into()),
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub request_id: String,
    pub percent: f64,
    pub phase: String,
}

/// Handle returned at submission. Resolves exactly once with the terminal
/// outcome for `request_id`.
pub struct Ticket {
    pub request_id: String,
    receiver: oneshot::Receiver<OptimiseOutcome>,
}

impl Ticket {
    pub fn new(request_id: String) -> (Self, oneshot::Sender<OptimiseOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request_id,
                receiver: rx,
            },
            tx,
        )
    }

    pub async fn wait(self) -> OptimiseOutcome {
        self.receiver.await.unwrap_or_else(|_| OptimiseOutcome {
            request_id: self.request_id,
            status: Status::Cancelled,
            output_path: None,
            message: Some("coordinator dropped without delivering a result".into()),
            duration: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_alias_falls_back_to_unprefixed_key() {
        let mut m = Metadata::new();
        m.set("maxWidth", 720);
        assert_eq!(m.get_i64("video.maxWidth", 0), 720);
    }

    #[test]
    fn metadata_direct_key_takes_priority_over_alias() {
        let mut m = Metadata::new();
        m.set("video.maxWidth", 100);
        m.set("maxWidth", 720);
        assert_eq!(m.get_i64("video.maxWidth", 0), 100);
    }

    #[test]
    fn clipboard_items_route_to_file_optimiser_key() {
        assert_eq!(ItemType::ClipboardImage.optimiser_key(), ItemType::Image);
        assert_eq!(ItemType::ClipboardVideo.optimiser_key(), ItemType::Video);
        assert_eq!(ItemType::Pdf.optimiser_key(), ItemType::Pdf);
    }
}
