//! Process-wide atomic counters.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits
//! all values as one `info!` event; `Team::run` calls it on return.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    messages_published: AtomicU64,
    rounds_completed: AtomicU64,
    generation_retries: AtomicU64,
    plan_updates_rejected: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            messages_published: AtomicU64::new(0),
            rounds_completed: AtomicU64::new(0),
            generation_retries: AtomicU64::new(0),
            plan_updates_rejected: AtomicU64::new(0),
        }
    }

    pub fn inc_messages_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rounds_completed(&self) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_generation_retries(&self) {
        self.generation_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "generation_retries", "counter incremented");
    }

    pub fn inc_plan_updates_rejected(&self) {
        self.plan_updates_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "plan_updates_rejected", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            messages_published = self.messages_published(),
            rounds_completed = self.rounds_completed(),
            generation_retries = self.generation_retries(),
            plan_updates_rejected = self.plan_updates_rejected(),
        );
    }

    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Relaxed)
    }

    pub fn generation_retries(&self) -> u64 {
        self.generation_retries.load(Ordering::Relaxed)
    }

    pub fn plan_updates_rejected(&self) -> u64 {
        self.plan_updates_rejected.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.messages_published.store(0, Ordering::Relaxed);
        self.rounds_completed.store(0, Ordering::Relaxed);
        self.generation_retries.store(0, Ordering::Relaxed);
        self.plan_updates_rejected.store(0, Ordering::Relaxed);
    }
}
