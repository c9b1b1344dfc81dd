use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::error::CatalogError;

/// Process-wide single-slot limiter: at most one provider request is in
/// flight at any instant, whichever user or artist task issued it.
///
/// Clones share the same slot. Hold the permit only around the network
/// exchange itself, never across backoff sleeps or parsing.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slot: Arc<Semaphore>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub async fn admit(&self) -> Result<SemaphorePermit<'_>, CatalogError> {
        self.slot
            .acquire()
            .await
            .map_err(|_| CatalogError::GateClosed)
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}
