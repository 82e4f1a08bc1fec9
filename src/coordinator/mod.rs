//! Optimisation Coordinator (component D). Grounded on the teacher's
//! `engine::worker::enqueue` — an `Arc<Inner>` guarding queue state with a
//! counter and per-job bookkeeping — ported from the teacher's blocking
//! `Mutex`/`Condvar` queue to an async `tokio::mpsc` channel shared by a
//! fixed worker pool, since the whole engine runs on the tokio runtime here.

pub mod events;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ClopError;
use crate::optimiser::{OptimiserContext, OptimiserRegistry};
use crate::request::{ItemType, OptimiseOutcome, Progress, Request, Status, Ticket};
use crate::settings::keys;
use crate::settings::SettingsStore;

use events::CoordinatorEvent;

struct WorkItem {
    request: Request,
    cancellation: CancellationToken,
    started_at: Instant,
    result_tx: tokio::sync::oneshot::Sender<OptimiseOutcome>,
}

pub struct Coordinator {
    settings: Arc<SettingsStore>,
    registry: Arc<OptimiserRegistry>,
    sender: mpsc::UnboundedSender<WorkItem>,
    statuses: Arc<DashMap<String, Status>>,
    events_tx: broadcast::Sender<CoordinatorEvent>,
    shutdown: CancellationToken,
    request_counter: AtomicU64,
    worker_count: usize,
}

impl Coordinator {
    /// Spawns `worker_count` worker tasks (default 2, spec §4.D) that share
    /// a single receiver behind an async mutex — each worker locks it only
    /// long enough to pull the next item, so FIFO pop is exclusive but the
    /// actual optimisation work runs fully concurrently.
    pub fn start(
        settings: Arc<SettingsStore>,
        registry: Arc<OptimiserRegistry>,
        worker_count: usize,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel::<WorkItem>();
        let (events_tx, _) = broadcast::channel(256);
        let coordinator = Arc::new(Self {
            settings,
            registry,
            sender,
            statuses: Arc::new(DashMap::new()),
            events_tx,
            shutdown: CancellationToken::new(),
            request_counter: AtomicU64::new(0),
            worker_count: worker_count.max(1),
        });

        let receiver = Arc::new(AsyncMutex::new(receiver));
        for worker_id in 0..coordinator.worker_count {
            let coordinator = coordinator.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                coordinator.run_worker(worker_id, receiver).await;
            });
        }
        coordinator
    }

    pub fn next_request_id(&self) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed);
        format!("req-{n:010}-{}", crate::path::nano_id_default(6))
    }

    /// Always O(1): records `Queued` and returns immediately. A request
    /// submitted with an already-cancelled token resolves `Cancelled`
    /// without ever touching the channel (spec §4.D).
    pub fn enqueue(&self, request: Request, cancellation: CancellationToken) -> Ticket {
        let (ticket, result_tx) = Ticket::new(request.request_id.clone());

        if cancellation.is_cancelled() {
            let _ = result_tx.send(OptimiseOutcome::cancelled(request.request_id, std::time::Duration::ZERO));
            return ticket;
        }

        self.statuses.insert(request.request_id.clone(), Status::Queued);
        self.emit(CoordinatorEvent::ProgressChanged(Progress {
            request_id: request.request_id.clone(),
            percent: 0.0,
            phase: "Queued".to_string(),
        }));

        let item = WorkItem {
            request,
            cancellation,
            started_at: Instant::now(),
            result_tx,
        };
        if self.sender.send(item).is_err() {
            warn!("coordinator channel closed, cannot enqueue");
        }
        ticket
    }

    pub fn get_status(&self, request_id: &str) -> Option<Status> {
        self.statuses.get(request_id).map(|s| *s)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events_tx.subscribe()
    }

    /// Closes intake and cancels every queued/running request. In-flight
    /// work is allowed to observe cancellation cooperatively rather than
    /// being forcibly killed here (workers already honour the token).
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn run_worker(
        self: Arc<Self>,
        worker_id: usize,
        receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>>,
    ) {
        loop {
            let item = {
                let mut guard = receiver.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => None,
                    item = guard.recv() => item,
                }
            };
            let Some(item) = item else {
                info!(worker_id, "coordinator worker shutting down");
                return;
            };
            self.process(item).await;
        }
    }

    async fn process(&self, item: WorkItem) {
        let request_id = item.request.request_id.clone();

        if item.cancellation.is_cancelled() {
            let outcome = OptimiseOutcome::cancelled(request_id.clone(), item.started_at.elapsed());
            self.finish(item.result_tx, Status::Cancelled, outcome);
            return;
        }

        let is_clipboard = matches!(
            item.request.item_type,
            ItemType::ClipboardImage | ItemType::ClipboardVideo
        );
        if is_clipboard && !self.settings.get(keys::ENABLE_CLIPBOARD_OPTIMISER) {
            let outcome = OptimiseOutcome::unsupported(request_id.clone());
            self.finish(item.result_tx, Status::Unsupported, outcome);
            return;
        }

        let Some(optimiser) = self.registry.lookup(item.request.item_type) else {
            let outcome = OptimiseOutcome::unsupported(request_id.clone());
            self.finish(item.result_tx, Status::Unsupported, outcome);
            return;
        };

        self.statuses.insert(request_id.clone(), Status::Running);
        self.emit(CoordinatorEvent::ProgressChanged(Progress {
            request_id: request_id.clone(),
            percent: 1.0,
            phase: "Running".to_string(),
        }));

        let context = OptimiserContext {
            settings: self.settings.clone(),
            registry: self.registry.clone(),
        };

        let outcome = match optimiser
            .optimise(&item.request, &context, item.cancellation.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(ClopError::Cancelled) => {
                OptimiseOutcome::cancelled(request_id.clone(), item.started_at.elapsed())
            }
            Err(e) => OptimiseOutcome::failed(request_id.clone(), e.to_string(), item.started_at.elapsed()),
        };

        let status = outcome.status;
        self.finish(item.result_tx, status, outcome);
    }

    fn finish(
        &self,
        result_tx: tokio::sync::oneshot::Sender<OptimiseOutcome>,
        status: Status,
        outcome: OptimiseOutcome,
    ) {
        self.statuses.insert(outcome.request_id.clone(), status);
        let event = match status {
            Status::Succeeded | Status::Unsupported => CoordinatorEvent::RequestCompleted(outcome.clone()),
            _ => CoordinatorEvent::RequestFailed(outcome.clone()),
        };
        self.emit(event);
        let _ = result_tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimiser::{BoxFuture, Optimiser};
    use std::time::Duration;

    struct EchoOptimiser;

    impl Optimiser for EchoOptimiser {
        fn item_type(&self) -> ItemType {
            ItemType::Image
        }

        fn optimise<'a>(
            &'a self,
            request: &'a Request,
            _context: &'a OptimiserContext,
            _cancellation: CancellationToken,
        ) -> BoxFuture<'a, Result<OptimiseOutcome, ClopError>> {
            Box::pin(async move {
                Ok(OptimiseOutcome::succeeded(
                    request.request_id.clone(),
                    &request.source_path,
                    "ok",
                    Duration::ZERO,
                ))
            })
        }
    }

    fn sample_request(id: &str, item_type: ItemType) -> Request {
        Request {
            request_id: id.to_string(),
            item_type,
            source_path: crate::path::FilePath::from_str("/tmp/clop/sample.jpg").unwrap(),
            metadata: crate::request::Metadata::new(),
        }
    }

    #[tokio::test]
    async fn unsupported_item_type_resolves_without_optimiser() {
        let settings = SettingsStore::in_memory();
        let registry = Arc::new(OptimiserRegistry::new());
        let coordinator = Coordinator::start(settings, registry, 1);
        let ticket = coordinator.enqueue(sample_request("r1", ItemType::Video), CancellationToken::new());
        let outcome = ticket.wait().await;
        assert_eq!(outcome.status, Status::Unsupported);
    }

    #[tokio::test]
    async fn registered_optimiser_resolves_succeeded() {
        let settings = SettingsStore::in_memory();
        let mut registry = OptimiserRegistry::new();
        registry.register(Arc::new(EchoOptimiser));
        let coordinator = Coordinator::start(settings, Arc::new(registry), 1);
        let ticket = coordinator.enqueue(sample_request("r2", ItemType::Image), CancellationToken::new());
        let outcome = ticket.wait().await;
        assert_eq!(outcome.status, Status::Succeeded);
    }

    #[tokio::test]
    async fn clipboard_item_is_unsupported_when_clipboard_optimiser_disabled() {
        let settings = SettingsStore::in_memory();
        settings.set(keys::ENABLE_CLIPBOARD_OPTIMISER, false);
        let mut registry = OptimiserRegistry::new();
        registry.register(Arc::new(EchoOptimiser));
        let coordinator = Coordinator::start(settings, Arc::new(registry), 1);
        let ticket = coordinator.enqueue(sample_request("r4", ItemType::ClipboardImage), CancellationToken::new());
        let outcome = ticket.wait().await;
        assert_eq!(outcome.status, Status::Unsupported);
    }

    #[tokio::test]
    async fn pre_cancelled_token_resolves_cancelled_without_enqueue() {
        let settings = SettingsStore::in_memory();
        let registry = Arc::new(OptimiserRegistry::new());
        let coordinator = Coordinator::start(settings, registry, 1);
        let token = CancellationToken::new();
        token.cancel();
        let ticket = coordinator.enqueue(sample_request("r3", ItemType::Image), token);
        let outcome = ticket.wait().await;
        assert_eq!(outcome.status, Status::Cancelled);
    }
}
