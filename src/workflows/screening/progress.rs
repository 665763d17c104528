use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Host-facing run feedback. Implementations must tolerate calls from
/// concurrently resolving evaluations.
pub trait RunObserver: Send + Sync {
    fn on_progress(&self, _fraction: f64) {}
    fn on_status(&self, _message: &str) {}
}

/// Observer for hosts that do not surface progress.
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Share of the progress range reserved for the planner's record scan; the
/// remaining range belongs to the batched evaluations.
pub const SCAN_SHARE: f64 = 0.10;

/// Progress accumulator counting one unit per (applicant, criterion)
/// attempt, skips included, so the fraction reaches exactly 1.0 on every
/// branch of a run.
pub struct ProgressCounter {
    observer: Arc<dyn RunObserver>,
    done: AtomicU64,
    total: u64,
}

impl ProgressCounter {
    pub fn new(observer: Arc<dyn RunObserver>, total_units: u64) -> Self {
        Self {
            observer,
            done: AtomicU64::new(0),
            total: total_units.max(1),
        }
    }

    /// Atomic add: sibling evaluations record units between the same awaits.
    pub fn record_unit(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.report(done);
    }

    /// Raise the unit count to a batch boundary, covering units that
    /// abandoned evaluations never recorded. Monotonic.
    pub fn settle(&self, floor_units: u64) {
        let previous = self.done.fetch_max(floor_units, Ordering::Relaxed);
        if floor_units > previous {
            self.report(floor_units);
        }
    }

    fn report(&self, done: u64) {
        let fraction = SCAN_SHARE + (1.0 - SCAN_SHARE) * done as f64 / self.total as f64;
        self.observer.on_progress(fraction.min(1.0));
    }
}
