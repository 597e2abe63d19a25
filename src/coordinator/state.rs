//! Coordinator lifecycle state and counters

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Lifecycle of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoordinatorState {
    /// Created, not started
    Idle = 0,
    /// Producer, workers and monitor are running
    Running = 1,
    /// Overflow detected; draining and requeueing
    Degraded = 2,
    /// All activities have exited
    Stopped = 3,
}

impl CoordinatorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Degraded,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Shared, lock-free state cell
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(CoordinatorState::Idle as u8))
    }

    pub(crate) fn get(&self) -> CoordinatorState {
        CoordinatorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: CoordinatorState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if the current state is not `from`
    pub(crate) fn transition(&self, from: CoordinatorState, to: CoordinatorState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Coordinator counters (thread-safe)
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    /// Items popped from the durable queue
    pub popped: AtomicU64,

    /// Items the processor accepted
    pub processed: AtomicU64,

    /// Items the processor rejected or panicked on
    pub failed: AtomicU64,

    /// Items pushed back to the durable queue
    pub requeued: AtomicU64,

    /// Items that could not be pushed back
    pub lost: AtomicU64,

    /// Items waiting in the local queue
    pub local_depth: AtomicUsize,
}

impl CoordinatorStats {
    pub(crate) fn record_popped(&self) {
        self.popped.fetch_add(1, Ordering::Relaxed);
        self.local_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_dequeued(&self) {
        // Saturating: a drain after a failed send must not wrap
        let _ = self
            .local_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| Some(d.saturating_sub(1)));
    }

    pub(crate) fn record_outcome(&self, success: bool) {
        if success {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_requeue(&self, requeued: usize, lost: usize) {
        self.requeued.fetch_add(requeued as u64, Ordering::Relaxed);
        self.lost.fetch_add(lost as u64, Ordering::Relaxed);
    }

    /// Current local queue depth
    pub fn depth(&self) -> usize {
        self.local_depth.load(Ordering::Acquire)
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            popped: self.popped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            local_depth: self.depth(),
        }
    }
}

/// Snapshot of coordinator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub popped: u64,
    pub processed: u64,
    pub failed: u64,
    pub requeued: u64,
    pub lost: u64,
    pub local_depth: usize,
}

impl StatsSnapshot {
    /// Success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.processed + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.processed as f64 / total as f64
    }
}
