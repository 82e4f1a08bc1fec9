//! The `Optimiser` capability set (spec §9: "a narrow polymorphic capability
//! set `{item_type, optimise(request, context, cancellation) -> Result}`").
//! No `async_trait` in this workspace's dependency stack, so the trait
//! returns a boxed future directly — the same pattern the corpus uses
//! wherever it needs object-safe async dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ClopResult;
use crate::request::{ItemType, OptimiseOutcome, Request};
use crate::settings::SettingsStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared read-only context every optimiser needs: settings and a handle to
/// spawn child helper requests (Document -> Pdf) through the same registry.
pub struct OptimiserContext {
    pub settings: Arc<SettingsStore>,
    pub registry: Arc<OptimiserRegistry>,
}

pub trait Optimiser: Send + Sync {
    fn item_type(&self) -> ItemType;

    fn optimise<'a>(
        &'a self,
        request: &'a Request,
        context: &'a OptimiserContext,
        cancellation: CancellationToken,
    ) -> BoxFuture<'a, ClopResult<OptimiseOutcome>>;
}

/// Maps `ItemType` to the optimiser that owns it. Clipboard variants are
/// normalised to their file-backed counterpart at lookup time.
#[derive(Default)]
pub struct OptimiserRegistry {
    by_type: HashMap<ItemType, Arc<dyn Optimiser>>,
}

impl OptimiserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, optimiser: Arc<dyn Optimiser>) {
        self.by_type.insert(optimiser.item_type(), optimiser);
    }

    pub fn lookup(&self, item_type: ItemType) -> Option<Arc<dyn Optimiser>> {
        self.by_type.get(&item_type.optimiser_key()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NoopOptimiser;

    impl Optimiser for NoopOptimiser {
        fn item_type(&self) -> ItemType {
            ItemType::Image
        }

        fn optimise<'a>(
            &'a self,
            request: &'a Request,
            _context: &'a OptimiserContext,
            _cancellation: CancellationToken,
        ) -> BoxFuture<'a, ClopResult<OptimiseOutcome>> {
            Box::pin(async move {
                Ok(OptimiseOutcome::succeeded(
                    request.request_id.clone(),
                    &request.source_path,
                    "noop",
                    Duration::ZERO,
                ))
            })
        }
    }

    #[test]
    fn registry_resolves_clipboard_alias_to_registered_image_optimiser() {
        let mut registry = OptimiserRegistry::new();
        registry.register(Arc::new(NoopOptimiser));
        assert!(registry.lookup(ItemType::ClipboardImage).is_some());
        assert!(registry.lookup(ItemType::Video).is_none());
    }
}
