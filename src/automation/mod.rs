//! Automation Endpoints (component L): shared envelope types, path resolver
//! and intent dispatch used by both transports (`pipe`, `http`). Grounded on
//! the teacher's `commands::*` Tauri command handlers, which parse a single
//! request DTO and dispatch to the shared engine the same way regardless of
//! which IPC channel carried it in.

pub mod http;
pub mod pipe;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::format;
use crate::path::FilePath;
use crate::request::{ItemType, Metadata, Request, Status};
use crate::settings::{keys, SettingsStore};

#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    pub intent: String,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(rename = "keepAlive", default)]
    pub keep_alive: bool,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponseEnvelope {
    fn ok(data: Option<serde_json::Value>) -> Self {
        Self { status: "ok".to_string(), message: None, data }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self { status: "failed".to_string(), message: Some(message.into()), data: None }
    }
}

#[derive(Debug, Deserialize)]
struct OptimisePayload {
    paths: Vec<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    aggressive: bool,
    #[serde(default)]
    remove_audio: bool,
    playback_speed_factor: Option<f64>,
    #[serde(default)]
    include_types: Vec<String>,
    #[serde(default)]
    exclude_types: Vec<String>,
}

#[derive(Debug, Serialize)]
struct OptimiseResultItem {
    #[serde(rename = "requestId")]
    request_id: String,
    #[serde(rename = "sourcePath")]
    source_path: String,
    #[serde(rename = "outputPath", skip_serializing_if = "Option::is_none")]
    output_path: Option<String>,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub struct AutomationContext {
    pub coordinator: Arc<Coordinator>,
    pub settings: Arc<SettingsStore>,
}

impl AutomationContext {
    pub fn new(coordinator: Arc<Coordinator>, settings: Arc<SettingsStore>) -> Arc<Self> {
        Arc::new(Self { coordinator, settings })
    }

    /// Fixed-time comparison per spec §4.L; an empty configured token
    /// disables auth entirely (the loopback HTTP transport already binds
    /// only 127.0.0.1, so this is a defence-in-depth check, not the only
    /// barrier).
    pub fn authorised(&self, presented: Option<&str>) -> bool {
        let configured = self.settings.get(keys::AUTOMATION_ACCESS_TOKEN);
        if configured.is_empty() {
            return true;
        }
        match presented {
            Some(token) => constant_time_eq(token.as_bytes(), configured.as_bytes()),
            None => false,
        }
    }
}

/// Compares every byte regardless of where the first mismatch occurs, so
/// timing leaks nothing about how much of the token matched.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub async fn handle_intent(ctx: &AutomationContext, envelope: RequestEnvelope) -> ResponseEnvelope {
    match envelope.intent.as_str() {
        "ping" => ResponseEnvelope::ok(Some(serde_json::json!({ "pong": true }))),
        "status" => handle_status(ctx, envelope.payload),
        "shortcuts.list" => ResponseEnvelope::ok(Some(serde_json::json!({
            "shortcuts": ["ping", "status", "shortcuts.list", "pause", "resume", "optimise"]
        }))),
        "pause" => {
            ctx.settings.set(keys::PAUSE_AUTOMATIC_OPTIMISATIONS, true);
            ResponseEnvelope::ok(None)
        }
        "resume" => {
            ctx.settings.set(keys::PAUSE_AUTOMATIC_OPTIMISATIONS, false);
            ResponseEnvelope::ok(None)
        }
        "optimise" => handle_optimise(ctx, envelope.payload).await,
        other => ResponseEnvelope::failed(format!("unknown intent: {other}")),
    }
}

fn handle_status(ctx: &AutomationContext, payload: Option<serde_json::Value>) -> ResponseEnvelope {
    let Some(request_id) = payload.and_then(|p| p.get("requestId").and_then(|v| v.as_str().map(str::to_string))) else {
        return ResponseEnvelope::ok(Some(serde_json::json!({ "paused": ctx.settings.get(keys::PAUSE_AUTOMATIC_OPTIMISATIONS) })));
    };
    match ctx.coordinator.get_status(&request_id) {
        Some(status) => ResponseEnvelope::ok(Some(serde_json::json!({ "status": status_label(status) }))),
        None => ResponseEnvelope::failed("unknown request id"),
    }
}

async fn handle_optimise(ctx: &AutomationContext, payload: Option<serde_json::Value>) -> ResponseEnvelope {
    let Some(payload) = payload else {
        return ResponseEnvelope::failed("optimise requires a payload");
    };
    let payload: OptimisePayload = match serde_json::from_value(payload) {
        Ok(p) => p,
        Err(e) => return ResponseEnvelope::failed(format!("invalid optimise payload: {e}")),
    };

    let work_root = PathBuf::from(ctx.settings.get(keys::WORK_ROOT_DIR));
    let resolved = resolve_paths(&payload, &work_root);
    if resolved.is_empty() {
        return ResponseEnvelope::failed("no files resolved from the given paths");
    }

    let mut items = Vec::with_capacity(resolved.len());
    for (path, item_type) in resolved {
        let Ok(file_path) = FilePath::from_path(&path) else { continue };
        let mut metadata = Metadata::new();
        metadata.set("aggressive", payload.aggressive);
        metadata.set("RemoveAudio", payload.remove_audio);
        if let Some(speed) = payload.playback_speed_factor {
            metadata.set("video.playbackSpeedFactor", speed);
        }
        metadata.set("source", "automation");

        let request = Request {
            request_id: ctx.coordinator.next_request_id(),
            item_type,
            source_path: file_path.clone(),
            metadata,
        };
        let request_id = request.request_id.clone();
        let ticket = ctx.coordinator.enqueue(request, CancellationToken::new());
        items.push((request_id, file_path, ticket));
    }

    let mut results = Vec::with_capacity(items.len());
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for (request_id, source_path, ticket) in items {
        let outcome = tokio::time::timeout(Duration::from_secs(3600), ticket.wait())
            .await
            .unwrap_or_else(|_| crate::request::OptimiseOutcome::failed(request_id.clone(), "timed out waiting for completion", Duration::ZERO));
        match outcome.status {
            Status::Succeeded => succeeded += 1,
            Status::Failed | Status::Cancelled | Status::Unsupported => failed += 1,
            Status::Queued | Status::Running => {}
        }
        results.push(OptimiseResultItem {
            request_id,
            source_path: source_path.to_string(),
            output_path: outcome.output_path.map(|p| p.0),
            status: status_label(outcome.status).to_string(),
            message: outcome.message,
        });
    }

    let aggregate = if failed == 0 {
        "ok"
    } else if succeeded > 0 {
        "partial"
    } else {
        "failed"
    };

    ResponseEnvelope {
        status: aggregate.to_string(),
        message: None,
        data: Some(serde_json::json!({ "results": results })),
    }
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Queued => "Queued",
        Status::Running => "Running",
        Status::Succeeded => "Succeeded",
        Status::Failed => "Failed",
        Status::Cancelled => "Cancelled",
        Status::Unsupported => "Unsupported",
    }
}

const TYPE_ALIASES: &[(&str, &[&str])] = &[
    ("image", format::IMAGE_EXTENSIONS),
    ("images", format::IMAGE_EXTENSIONS),
    ("video", format::VIDEO_EXTENSIONS),
    ("videos", format::VIDEO_EXTENSIONS),
    ("pdf", format::PDF_EXTENSIONS),
    ("pdfs", format::PDF_EXTENSIONS),
    ("document", format::DOCUMENT_EXTENSIONS),
    ("documents", format::DOCUMENT_EXTENSIONS),
];

fn alias_extensions(alias: &str) -> Vec<&'static str> {
    TYPE_ALIASES
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(alias))
        .flat_map(|(_, exts)| exts.iter().copied())
        .collect()
}

/// Expands directories (recursing if requested), filters by include/exclude
/// type aliases, rejects paths under the work root, and deduplicates
/// case-insensitively (spec §4.L).
fn resolve_paths(payload: &OptimisePayload, work_root: &Path) -> Vec<(PathBuf, ItemType)> {
    let include: Vec<&str> = payload.include_types.iter().flat_map(|t| alias_extensions(t)).collect();
    let exclude: Vec<&str> = payload.exclude_types.iter().flat_map(|t| alias_extensions(t)).collect();

    let mut candidates = Vec::new();
    for raw in &payload.paths {
        let path = PathBuf::from(raw);
        if path.is_dir() {
            collect_directory(&path, payload.recursive, &mut candidates);
        } else {
            candidates.push(path);
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut resolved = Vec::new();
    for path in candidates {
        if path.starts_with(work_root) {
            continue;
        }
        let Some(extension) = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) else {
            continue;
        };
        if !include.is_empty() && !include.contains(&extension.as_str()) {
            continue;
        }
        if exclude.contains(&extension.as_str()) {
            continue;
        }
        let Some(item_type) = format::classify_extension(&extension) else {
            continue;
        };

        let dedup_key = path.to_string_lossy().to_ascii_lowercase();
        if !seen.insert(dedup_key) {
            continue;
        }
        resolved.push((path, item_type));
    }
    resolved
}

fn collect_directory(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) {
    let walker = walkdir::WalkDir::new(dir).max_depth(if recursive { usize::MAX } else { 1 });
    for entry in walker.into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            out.push(entry.path().to_path_buf());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_expands_to_known_extensions() {
        let exts = alias_extensions("images");
        assert!(exts.contains(&"jpg"));
        assert!(exts.contains(&"png"));
    }

    #[test]
    fn unknown_alias_yields_empty() {
        assert!(alias_extensions("not-a-type").is_empty());
    }

    #[test]
    fn resolve_paths_rejects_work_root() {
        let dir = tempfile::tempdir().unwrap();
        let work_root = dir.path().join("workroot");
        std::fs::create_dir_all(&work_root).unwrap();
        let file = work_root.join("a.jpg");
        std::fs::write(&file, b"x").unwrap();

        let payload = OptimisePayload {
            paths: vec![file.to_string_lossy().to_string()],
            recursive: false,
            aggressive: false,
            remove_audio: false,
            playback_speed_factor: None,
            include_types: Vec::new(),
            exclude_types: Vec::new(),
        };
        let resolved = resolve_paths(&payload, &work_root);
        assert!(resolved.is_empty());
    }

    #[test]
    fn resolve_paths_dedups_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();
        let upper = file.to_string_lossy().to_string().to_uppercase();

        let payload = OptimisePayload {
            paths: vec![file.to_string_lossy().to_string(), upper],
            recursive: false,
            aggressive: false,
            remove_audio: false,
            playback_speed_factor: None,
            include_types: Vec::new(),
            exclude_types: Vec::new(),
        };
        let resolved = resolve_paths(&payload, Path::new("/definitely/not/a/work/root"));
        assert_eq!(resolved.len(), 1);
    }
}
