//! Directory Watcher Pipeline (component K). No sibling example wires
//! `notify` into a tokio runtime, so the std-channel-to-tokio-channel bridge
//! here follows the same "spawn a task, forward into an async channel" shape
//! `coordinator::Coordinator` already uses for its worker pool, applied to
//! `notify`'s synchronous event callback instead of a blocking queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::events::CoordinatorEvent;
use crate::coordinator::Coordinator;
use crate::fingerprint::Fingerprint;
use crate::path::FilePath;
use crate::request::{ItemType, Metadata, Request};
use crate::settings::{keys, SettingsStore};

const STABILISATION_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);
const STABILISATION_MAX_PROBES: u32 = 60;
const REQUEUE_BASE_BACKOFF: Duration = Duration::from_millis(250);
const REQUEUE_MAX_BACKOFF: Duration = Duration::from_secs(5);
const REQUEUE_MAX_ATTEMPTS: u32 = 24;
const OPTIMISED_MARKER: &str = ".clop.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedType {
    Image,
    Video,
    Pdf,
    Document,
}

impl WatchedType {
    fn item_type(self) -> ItemType {
        match self {
            WatchedType::Image => ItemType::Image,
            WatchedType::Video => ItemType::Video,
            WatchedType::Pdf => ItemType::Pdf,
            WatchedType::Document => ItemType::Document,
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            WatchedType::Image => crate::format::IMAGE_EXTENSIONS,
            WatchedType::Video => crate::format::VIDEO_EXTENSIONS,
            WatchedType::Pdf => crate::format::PDF_EXTENSIONS,
            WatchedType::Document => crate::format::DOCUMENT_EXTENSIONS,
        }
    }

    fn label(self) -> &'static str {
        match self {
            WatchedType::Image => "image",
            WatchedType::Video => "video",
            WatchedType::Pdf => "pdf",
            WatchedType::Document => "document",
        }
    }

    fn size_limit_mb(self, settings: &SettingsStore) -> i64 {
        match self {
            WatchedType::Image => settings.get(keys::MAX_IMAGE_SIZE_MB),
            WatchedType::Video => settings.get(keys::MAX_VIDEO_SIZE_MB),
            WatchedType::Pdf => settings.get(keys::MAX_PDF_SIZE_MB),
            WatchedType::Document => settings.get(keys::MAX_DOCUMENT_SIZE_MB),
        }
    }

    fn concurrency_cap(self, settings: &SettingsStore) -> i64 {
        match self {
            WatchedType::Image => settings.get(keys::MAX_IMAGE_FILE_COUNT),
            WatchedType::Video => settings.get(keys::MAX_VIDEO_FILE_COUNT),
            WatchedType::Pdf => settings.get(keys::MAX_PDF_FILE_COUNT),
            WatchedType::Document => settings.get(keys::MAX_DOCUMENT_FILE_COUNT),
        }
    }
}

/// Suppresses paths and content fingerprints the pipeline already optimised
/// within the configured time window, so a watcher event fired by our own
/// write doesn't re-enqueue the file it just produced.
struct RecentRegistry {
    paths: DashMap<PathBuf, Instant>,
    fingerprints: DashMap<[u8; 32], Instant>,
    window: Duration,
}

impl RecentRegistry {
    fn new(window: Duration) -> Self {
        Self {
            paths: DashMap::new(),
            fingerprints: DashMap::new(),
            window,
        }
    }

    fn register(&self, path: &Path, fingerprint: Option<&Fingerprint>) {
        self.paths.insert(path.to_path_buf(), Instant::now());
        if let Some(fp) = fingerprint {
            self.fingerprints.insert(fp.prefix_sha256, Instant::now());
        }
    }

    fn recently_seen(&self, path: &Path, fingerprint: Option<&Fingerprint>) -> bool {
        if let Some(seen_at) = self.paths.get(path) {
            if seen_at.elapsed() < self.window {
                return true;
            }
        }
        if let Some(fp) = fingerprint {
            if let Some(seen_at) = self.fingerprints.get(&fp.prefix_sha256) {
                if seen_at.elapsed() < self.window {
                    return true;
                }
            }
        }
        false
    }
}

struct WatchedEvent {
    path: PathBuf,
    watched_type: WatchedType,
    root: PathBuf,
}

pub struct WatcherPipeline {
    coordinator: Arc<Coordinator>,
    settings: Arc<SettingsStore>,
    recent: Arc<RecentRegistry>,
    in_flight: Arc<DashMap<PathBuf, ()>>,
    concurrency: Arc<DashMap<WatchedType, Arc<tokio::sync::Semaphore>>>,
    retry_attempts: Arc<DashMap<PathBuf, u32>>,
    _watchers: Vec<RecommendedWatcher>,
    cancellation: CancellationToken,
}

impl WatcherPipeline {
    /// Read-only snapshot of in-flight requeue attempts per path, for
    /// diagnostics (spec B: "retry/backoff counters are observable").
    /// A path absent from the snapshot is either settled or was never
    /// requeued.
    pub fn retry_snapshot(&self) -> std::collections::HashMap<PathBuf, u32> {
        self.retry_attempts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Starts one recursive `notify` watcher per `(type, root)` pair and a
    /// single coalescing consumer task. Returns immediately; watching
    /// continues on background tasks until `cancellation` fires.
    pub fn start(
        coordinator: Arc<Coordinator>,
        settings: Arc<SettingsStore>,
        roots_by_type: Vec<(WatchedType, Vec<PathBuf>)>,
        cancellation: CancellationToken,
    ) -> WatcherPipeline {
        let window_seconds = settings.get(keys::WATCHER_SUPPRESSION_WINDOW_SECONDS).max(0) as u64;
        let recent = Arc::new(RecentRegistry::new(Duration::from_secs(window_seconds)));
        let in_flight = Arc::new(DashMap::new());

        let mut concurrency = DashMap::new();
        for (watched_type, _) in &roots_by_type {
            let cap = watched_type.concurrency_cap(&settings).max(1) as usize;
            concurrency.insert(*watched_type, Arc::new(tokio::sync::Semaphore::new(cap)));
        }
        let concurrency = Arc::new(concurrency);
        let retry_attempts = Arc::new(DashMap::new());

        let (tx, rx) = mpsc::unbounded_channel::<WatchedEvent>();
        let mut watchers = Vec::new();

        for (watched_type, roots) in &roots_by_type {
            for root in roots {
                match spawn_root_watcher(*watched_type, root.clone(), tx.clone()) {
                    Ok(watcher) => watchers.push(watcher),
                    Err(e) => warn!(root = %root.display(), error = %e, "failed to start watcher"),
                }
            }
        }

        let pipeline = WatcherPipeline {
            coordinator: coordinator.clone(),
            settings: settings.clone(),
            recent: recent.clone(),
            in_flight: in_flight.clone(),
            concurrency: concurrency.clone(),
            retry_attempts: retry_attempts.clone(),
            _watchers: watchers,
            cancellation: cancellation.clone(),
        };

        let consumer = WatcherConsumer {
            coordinator,
            settings,
            recent,
            in_flight,
            concurrency,
            retry_attempts,
            cancellation,
        };
        tokio::spawn(consumer.run(rx));

        pipeline
    }
}

fn spawn_root_watcher(
    watched_type: WatchedType,
    root: PathBuf,
    tx: mpsc::UnboundedSender<WatchedEvent>,
) -> notify::Result<RecommendedWatcher> {
    let root_for_callback = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let Ok(event) = res else { return };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in event.paths {
            let _ = tx.send(WatchedEvent {
                path,
                watched_type,
                root: root_for_callback.clone(),
            });
        }
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

struct WatcherConsumer {
    coordinator: Arc<Coordinator>,
    settings: Arc<SettingsStore>,
    recent: Arc<RecentRegistry>,
    in_flight: Arc<DashMap<PathBuf, ()>>,
    concurrency: Arc<DashMap<WatchedType, Arc<tokio::sync::Semaphore>>>,
    retry_attempts: Arc<DashMap<PathBuf, u32>>,
    cancellation: CancellationToken,
}

impl WatcherConsumer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<WatchedEvent>) {
        let mut events_rx = self.coordinator.subscribe();
        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    info!("watcher pipeline shutting down");
                    return;
                }
                event = rx.recv() => {
                    let Some(event) = event else { return };
                    self.handle_event(event).await;
                }
                completion = events_rx.recv() => {
                    if let Ok(CoordinatorEvent::RequestCompleted(outcome) | CoordinatorEvent::RequestFailed(outcome)) = completion {
                        if let Some(output) = &outcome.output_path {
                            if let Ok(path) = std::path::PathBuf::from(&output.0).canonicalize() {
                                self.recent.register(&path, None);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: WatchedEvent) {
        let WatchedEvent { path, watched_type, root } = event;

        if self.settings.get(keys::PAUSE_AUTOMATIC_OPTIMISATIONS) {
            return;
        }
        let work_root = PathBuf::from(self.settings.get(keys::WORK_ROOT_DIR));
        if path.starts_with(&work_root) {
            return;
        }
        if path_carries_optimised_marker(&path) {
            return;
        }
        let Some(extension) = path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) else {
            return;
        };
        if !watched_type.extensions().contains(&extension.as_str()) {
            return;
        }
        let skip_list = match watched_type {
            WatchedType::Image => Some(self.settings.get(keys::IMAGE_FORMATS_TO_SKIP)),
            WatchedType::Video => Some(self.settings.get(keys::VIDEO_FORMATS_TO_SKIP)),
            WatchedType::Pdf | WatchedType::Document => None,
        };
        if let Some(skip) = skip_list {
            if skip.iter().any(|s| s.eq_ignore_ascii_case(&extension)) {
                debug!(path = %path.display(), extension, "extension in skip list, ignoring");
                return;
            }
        }

        if self.in_flight.insert(path.clone(), ()).is_some() {
            debug!(path = %path.display(), "duplicate event for in-flight path dropped");
            return;
        }

        self.process_with_retry(path, watched_type, root, 0).await;
    }

    async fn process_with_retry(&self, path: PathBuf, watched_type: WatchedType, root: PathBuf, attempt: u32) {
        let fingerprint = Fingerprint::try_create(&path);
        if self.recent.recently_seen(&path, fingerprint.as_ref()) {
            self.in_flight.remove(&path);
            self.retry_attempts.remove(&path);
            return;
        }

        let max_size_bytes = watched_type.size_limit_mb(&self.settings).max(0) as u64 * 1024 * 1024;
        if let Ok(metadata) = tokio::fs::metadata(&path).await {
            if metadata.len() > max_size_bytes {
                self.in_flight.remove(&path);
                self.retry_attempts.remove(&path);
                return;
            }
        }

        let Some(semaphore) = self.concurrency.get(&watched_type).map(|s| s.clone()) else {
            self.in_flight.remove(&path);
            self.retry_attempts.remove(&path);
            return;
        };

        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.requeue_later(path, watched_type, root, attempt).await;
                return;
            }
        };

        if !wait_for_stable(&path).await {
            drop(permit);
            self.requeue_later(path, watched_type, root, attempt).await;
            return;
        }

        let Ok(file_path) = FilePath::from_path(&path) else {
            self.in_flight.remove(&path);
            self.retry_attempts.remove(&path);
            return;
        };

        let mut metadata = Metadata::new();
        metadata.set("source", "watcher");
        metadata.set("watcher.type", watched_type.label());
        metadata.set("watcher.root", root.display().to_string());

        let request = Request {
            request_id: self.coordinator.next_request_id(),
            item_type: watched_type.item_type(),
            source_path: file_path,
            metadata,
        };

        let ticket = self
            .coordinator
            .enqueue(request, CancellationToken::new());

        self.recent.register(&path, fingerprint.as_ref());
        self.in_flight.remove(&path);
        self.retry_attempts.remove(&path);

        let coordinator_ticket = ticket;
        tokio::spawn(async move {
            let _ = coordinator_ticket.wait().await;
            drop(permit);
        });
    }

    async fn requeue_later(&self, path: PathBuf, watched_type: WatchedType, root: PathBuf, attempt: u32) {
        if attempt >= REQUEUE_MAX_ATTEMPTS {
            warn!(path = %path.display(), attempt, "giving up on watcher requeue after exceeding attempt limit");
            self.in_flight.remove(&path);
            self.retry_attempts.remove(&path);
            return;
        }
        self.retry_attempts.insert(path.clone(), attempt + 1);
        let backoff = (REQUEUE_BASE_BACKOFF * (attempt + 1)).min(REQUEUE_MAX_BACKOFF);
        let coordinator = self.coordinator.clone();
        let settings = self.settings.clone();
        let recent = self.recent.clone();
        let in_flight = self.in_flight.clone();
        let concurrency = self.concurrency.clone();
        let retry_attempts = self.retry_attempts.clone();
        let cancellation = self.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if cancellation.is_cancelled() {
                in_flight.remove(&path);
                retry_attempts.remove(&path);
                return;
            }
            let consumer = WatcherConsumer {
                coordinator,
                settings,
                recent,
                in_flight,
                concurrency,
                retry_attempts,
                cancellation,
            };
            consumer.process_with_retry(path, watched_type, root, attempt + 1).await;
        });
    }
}

fn path_carries_optimised_marker(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains(OPTIMISED_MARKER))
        .unwrap_or(false)
}

/// Polls for a reopenable, non-zero-length file whose length is unchanged
/// across two samples 200 ms apart, up to 60 probes (spec §4.K step 6).
async fn wait_for_stable(path: &Path) -> bool {
    let mut last_len: Option<u64> = None;
    for _ in 0..STABILISATION_MAX_PROBES {
        let opened = std::fs::File::open(path);
        let Ok(file) = opened else {
            tokio::time::sleep(STABILISATION_SAMPLE_INTERVAL).await;
            continue;
        };
        let Ok(metadata) = file.metadata() else {
            tokio::time::sleep(STABILISATION_SAMPLE_INTERVAL).await;
            continue;
        };
        let len = metadata.len();
        if len == 0 {
            tokio::time::sleep(STABILISATION_SAMPLE_INTERVAL).await;
            continue;
        }
        if last_len == Some(len) {
            return true;
        }
        last_len = Some(len);
        tokio::time::sleep(STABILISATION_SAMPLE_INTERVAL).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimised_marker_detected_in_filename() {
        assert!(path_carries_optimised_marker(Path::new("/tmp/photo.clop.jpg")));
        assert!(!path_carries_optimised_marker(Path::new("/tmp/photo.jpg")));
    }

    #[test]
    fn recent_registry_suppresses_within_window() {
        let registry = RecentRegistry::new(Duration::from_secs(60));
        let path = PathBuf::from("/tmp/a.jpg");
        assert!(!registry.recently_seen(&path, None));
        registry.register(&path, None);
        assert!(registry.recently_seen(&path, None));
    }

    #[test]
    fn recent_registry_expires_after_window() {
        let registry = RecentRegistry::new(Duration::from_millis(0));
        let path = PathBuf::from("/tmp/a.jpg");
        registry.register(&path, None);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!registry.recently_seen(&path, None));
    }

    #[tokio::test]
    async fn stable_file_is_detected_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.bin");
        std::fs::write(&path, b"hello world").unwrap();
        assert!(wait_for_stable(&path).await);
    }

    #[tokio::test]
    async fn retry_snapshot_reports_requeued_attempts() {
        let settings = SettingsStore::in_memory();
        let registry = Arc::new(crate::optimiser::OptimiserRegistry::new());
        let coordinator = Coordinator::start(settings.clone(), registry, 1);
        let retry_attempts = Arc::new(DashMap::new());
        let consumer = WatcherConsumer {
            coordinator,
            settings,
            recent: Arc::new(RecentRegistry::new(Duration::from_secs(60))),
            in_flight: Arc::new(DashMap::new()),
            concurrency: Arc::new(DashMap::new()),
            retry_attempts: retry_attempts.clone(),
            cancellation: CancellationToken::new(),
        };

        let path = PathBuf::from("/tmp/stuck-file.jpg");
        consumer
            .requeue_later(path.clone(), WatchedType::Image, PathBuf::from("/tmp"), 0)
            .await;

        assert_eq!(retry_attempts.get(&path).map(|v| *v), Some(1));
    }

    #[tokio::test]
    async fn extension_in_skip_list_is_never_enqueued() {
        let settings = SettingsStore::in_memory();
        settings.set(keys::IMAGE_FORMATS_TO_SKIP, vec!["bmp".to_string()]);
        let registry = Arc::new(crate::optimiser::OptimiserRegistry::new());
        let coordinator = Coordinator::start(settings.clone(), registry, 1);
        let in_flight = Arc::new(DashMap::new());
        let consumer = WatcherConsumer {
            coordinator,
            settings,
            recent: Arc::new(RecentRegistry::new(Duration::from_secs(60))),
            in_flight: in_flight.clone(),
            concurrency: Arc::new(DashMap::new()),
            retry_attempts: Arc::new(DashMap::new()),
            cancellation: CancellationToken::new(),
        };

        let path = PathBuf::from("/tmp/not-watched.bmp");
        consumer
            .handle_event(WatchedEvent {
                path: path.clone(),
                watched_type: WatchedType::Image,
                root: PathBuf::from("/tmp"),
            })
            .await;

        assert!(!in_flight.contains_key(&path));
    }
}
