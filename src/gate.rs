use super::errors::{DispatchError, DispatchResult};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore bounding concurrent blocking executions.
///
/// Occupancy lives inside the semaphore itself, so it can never exceed
/// the capacity or go negative.
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    high_water_mark: Arc<AtomicUsize>,
}

/// One occupied slot. Dropping it releases the slot.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            high_water_mark: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Suspends the caller while the gate is full.
    pub async fn acquire(&self) -> DispatchResult<AdmissionPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::SemaphoreClosed)?;
        self.high_water_mark
            .fetch_max(self.occupancy(), Ordering::Relaxed);
        Ok(AdmissionPermit { _permit: permit })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    #[inline]
    pub fn occupancy(&self) -> usize {
        self.capacity - self.available()
    }

    #[inline]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark.load(Ordering::Relaxed)
    }

    /// Fails every pending and future `acquire`. Held permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
