use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between the orchestrator, the
/// downloader and the media processor. Checked at chunk / progress-line
/// granularity, never preemptive.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Normalizes raw progress signals (byte deltas, frame counts, elapsed
/// time) into a 0-100 percentage for one bound operation at a time.
///
/// The reported percentage is monotonically non-decreasing between two
/// `reset` calls and clamped to 100 even when the raw counters overshoot
/// the estimated total (frame totals computed from duration * frame rate
/// are heuristic). An unknown or zero total reports 0 until `complete`
/// snaps to 100.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    done: u64,
    high_water: u8,
    cancel: CancelFlag,
}

impl ProgressTracker {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            total: 0,
            done: 0,
            high_water: 0,
            cancel,
        }
    }

    /// Bind the tracker to a new operation with `total` raw units.
    /// Pass 0 when the total is unknown.
    pub fn reset(&mut self, total: u64) {
        self.total = total;
        self.done = 0;
        self.high_water = 0;
    }

    /// Record `delta` raw units of completed work. A no-op once
    /// cancellation has been signaled.
    pub fn advance(&mut self, delta: u64) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.done = self.done.saturating_add(delta);
        let current = self.current_percent();
        if current > self.high_water {
            self.high_water = current;
        }
    }

    /// Snap to 100 at the end of the bound operation, covering the
    /// unknown-total case where no intermediate percentage was reported.
    pub fn complete(&mut self) {
        if !self.cancel.is_cancelled() {
            self.high_water = 100;
        }
    }

    pub fn percent(&self) -> u8 {
        self.high_water
    }

    fn current_percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = self.done.saturating_mul(100) / self.total;
        pct.min(100) as u8
    }
}
