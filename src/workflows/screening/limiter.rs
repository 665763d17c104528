use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrency bound shared by every in-flight completion call.
///
/// `resize` swaps in a fresh semaphore rather than mutating the bound:
/// permits already granted against the old one drain on their own and are
/// never cancelled.
pub struct Limiter {
    slots: Mutex<Arc<Semaphore>>,
    capacity: AtomicUsize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(Arc::new(Semaphore::new(capacity))),
            capacity: AtomicUsize::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        let slots = self.slots.lock().expect("limiter mutex poisoned").clone();
        slots
            .acquire_owned()
            .await
            .expect("limiter semaphore never closes")
    }

    /// Rebuild the bound when the configured budget changes between calls.
    pub fn resize(&self, capacity: usize) {
        let capacity = capacity.max(1);
        if self.capacity.swap(capacity, Ordering::Relaxed) == capacity {
            return;
        }
        let mut slots = self.slots.lock().expect("limiter mutex poisoned");
        *slots = Arc::new(Semaphore::new(capacity));
    }
}
