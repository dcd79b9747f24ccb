use inference::NativeService;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Holds the service once startup loading finishes. Empty until then, and
/// for good if loading failed.
#[derive(Clone, Default)]
pub struct ModelSlot(Arc<OnceLock<Arc<NativeService>>>);

impl ModelSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn loaded(service: NativeService) -> Self {
        let slot = Self::default();
        slot.fill(service);
        slot
    }

    pub fn get(&self) -> Option<Arc<NativeService>> {
        self.0.get().cloned()
    }

    /// Returns false if the slot was already filled.
    pub fn fill(&self, service: NativeService) -> bool {
        self.0.set(Arc::new(service)).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.0.get().is_some()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub slot: ModelSlot,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(slot: ModelSlot, request_timeout: Duration) -> Self {
        Self {
            slot,
            request_timeout,
        }
    }
}
