//! Progress reporting and cooperative cancellation for long runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Observer polled by the engines between units of work (patches, wall pixels).
pub trait Progress: Sync {
    /// `completed` of `total` units are done.
    fn update(&self, completed: usize, total: usize);

    /// Checked between units; `true` stops the run early.
    fn is_cancelled(&self) -> bool;
}

/// Ignores progress and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn update(&self, _completed: usize, _total: usize) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Shared atomic counter; clones observe the same run, so one clone can be
/// handed to the engine while another is polled or cancelled elsewhere.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    completed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Completed share in [0, 1]; zero before a run reports its size.
    pub fn fraction(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.completed() as f32 / total as f32).min(1.0)
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clear progress and any pending cancellation before a new run.
    pub fn reset(&self) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

impl Progress for ProgressCounter {
    fn update(&self, completed: usize, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        if completed == 0 {
            // Engines report 0 once at the start of a run
            self.completed.store(0, Ordering::SeqCst);
        } else {
            self.completed.fetch_max(completed, Ordering::SeqCst);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of a cancellable run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Complete(T),
    /// Stopped early; `partial` holds only the first `completed` of `total`
    /// units and must not be mistaken for a finished result.
    Cancelled {
        partial: T,
        completed: usize,
        total: usize,
    },
}

impl<T> Outcome<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Complete(_))
    }

    /// The finished value, or `None` if the run was cancelled.
    pub fn complete(self) -> Option<T> {
        match self {
            Outcome::Complete(v) => Some(v),
            Outcome::Cancelled { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Complete(v) => Outcome::Complete(f(v)),
            Outcome::Cancelled {
                partial,
                completed,
                total,
            } => Outcome::Cancelled {
                partial: f(partial),
                completed,
                total,
            },
        }
    }
}
