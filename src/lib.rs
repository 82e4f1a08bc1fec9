//! `clop_core`: a headless concurrent media optimisation engine for images,
//! video, PDFs, and office documents. Assembled the way the teacher's own
//! `main.rs` wires its tray app together — settings store, optimiser
//! registry, coordinator, watcher, and automation transports all owned by
//! one top-level handle that callers construct once and share.

pub mod automation;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod image;
pub mod optimiser;
pub mod output_planner;
pub mod path;
pub mod pdf;
pub mod probe;
pub mod process;
pub mod request;
pub mod settings;
pub mod video;
pub mod watcher;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use automation::{AutomationContext, http, pipe};
use coordinator::Coordinator;
use document::DocumentOptimiser;
use error::ClopResult;
use image::ImageOptimiser;
use optimiser::OptimiserRegistry;
use pdf::PdfOptimiser;
use settings::{SettingsStore, keys};
use video::VideoOptimiser;
use watcher::{WatchedType, WatcherPipeline};

const DEFAULT_WORKER_COUNT: usize = 2;

/// Top-level handle to a running engine: the coordinator, the directory
/// watcher, and both automation transports all share the same settings
/// store and optimiser registry this owns.
pub struct Engine {
    pub settings: Arc<SettingsStore>,
    pub coordinator: Arc<Coordinator>,
    pub automation: Arc<AutomationContext>,
    watcher: WatcherPipeline,
    shutdown: CancellationToken,
}

impl Engine {
    /// Loads settings from `<config_root>/config.json` (spec §6), creating
    /// one with defaults on first run, and starts the coordinator and
    /// directory watcher against it. Automation transports are started
    /// separately via [`Engine::serve_automation`] since they're long-running.
    pub async fn open(app_name: &str) -> ClopResult<Self> {
        let settings = SettingsStore::open(app_name).await?;
        Ok(Self::with_settings(settings))
    }

    /// In-memory settings only, for embedding and tests that should not
    /// touch the filesystem.
    pub fn in_memory() -> Self {
        Self::with_settings(SettingsStore::in_memory())
    }

    fn with_settings(settings: Arc<SettingsStore>) -> Self {
        let registry = Arc::new(default_registry());
        let coordinator = Coordinator::start(settings.clone(), registry, DEFAULT_WORKER_COUNT);
        let automation = AutomationContext::new(coordinator.clone(), settings.clone());
        let shutdown = CancellationToken::new();
        let watcher = WatcherPipeline::start(
            coordinator.clone(),
            settings.clone(),
            watched_roots(&settings),
            shutdown.clone(),
        );

        Self {
            settings,
            coordinator,
            automation,
            watcher,
            shutdown,
        }
    }

    /// Runs the loopback HTTP and named-pipe automation transports until
    /// cancelled. Both share one `AutomationContext`; a failure in either
    /// is logged and that transport alone stops, the other keeps serving.
    /// Idles on cancellation instead of binding anything when
    /// `EnableCrossAppAutomation` is off.
    pub async fn serve_automation(&self) {
        if !self.settings.get(keys::ENABLE_CROSS_APP_AUTOMATION) {
            info!("cross-app automation disabled by settings; not starting automation transports");
            self.shutdown.cancelled().await;
            return;
        }

        let port = self.settings.get(keys::AUTOMATION_HTTP_PORT).max(1) as u16;
        let http_ctx = self.automation.clone();
        let http_cancel = self.shutdown.clone();
        let pipe_ctx = self.automation.clone();
        let pipe_cancel = self.shutdown.clone();

        let http_task = tokio::spawn(async move {
            if let Err(e) = http::serve(http_ctx, port, http_cancel).await {
                tracing::warn!(error = %e, "automation HTTP transport stopped");
            }
        });
        let pipe_task = tokio::spawn(async move {
            if let Err(e) = pipe::serve(pipe_ctx, pipe_cancel).await {
                tracing::warn!(error = %e, "automation pipe transport stopped");
            }
        });

        let _ = tokio::join!(http_task, pipe_task);
    }

    /// Diagnostic snapshot of paths the watcher is currently backing off
    /// on, with their retry attempt count.
    pub fn watcher_retry_snapshot(&self) -> std::collections::HashMap<PathBuf, u32> {
        self.watcher.retry_snapshot()
    }

    /// Signals the watcher and both automation transports to stop, then
    /// stops the coordinator from accepting further work. Dropping the
    /// returned handle's watcher field tears down the `notify` watches.
    pub fn shutdown(self) {
        self.shutdown.cancel();
        self.coordinator.stop();
        drop(self.watcher);
        info!("engine shut down");
    }
}

fn default_registry() -> OptimiserRegistry {
    let mut registry = OptimiserRegistry::new();
    registry.register(Arc::new(ImageOptimiser));
    registry.register(Arc::new(VideoOptimiser));
    registry.register(Arc::new(PdfOptimiser));
    registry.register(Arc::new(DocumentOptimiser));
    registry
}

/// Each type's watch list is additionally gated on its own `Enable*` flag so
/// a disabled family's directories are never even handed to `notify`.
fn watched_roots(settings: &SettingsStore) -> Vec<(WatchedType, Vec<PathBuf>)> {
    let mut roots = Vec::new();
    if settings.get(keys::ENABLE_AUTOMATIC_IMAGE_OPTIMISATIONS) {
        roots.push((WatchedType::Image, dirs_from(settings, keys::IMAGE_DIRS)));
    }
    if settings.get(keys::ENABLE_AUTOMATIC_VIDEO_OPTIMISATIONS) {
        roots.push((WatchedType::Video, dirs_from(settings, keys::VIDEO_DIRS)));
    }
    if settings.get(keys::ENABLE_AUTOMATIC_PDF_OPTIMISATIONS) {
        roots.push((WatchedType::Pdf, dirs_from(settings, keys::PDF_DIRS)));
    }
    if settings.get(keys::AUTO_CONVERT_DOCUMENTS_TO_PDF) {
        roots.push((WatchedType::Document, dirs_from(settings, keys::DOCUMENT_DIRS)));
    }
    roots.into_iter().filter(|(_, roots)| !roots.is_empty()).collect()
}

fn dirs_from(settings: &SettingsStore, key: settings::keys::SettingKey<Vec<String>>) -> Vec<PathBuf> {
    settings.get(key).into_iter().map(PathBuf::from).collect()
}

/// Installs a `tracing-subscriber` formatting layer honouring `RUST_LOG`,
/// defaulting to `info` when unset. Call once at process start.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
