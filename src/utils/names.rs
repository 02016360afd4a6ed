//! Fresh-name generation for kernels and per-thread temporaries.
//!
//! Generated names must be unique across every transformation performed in
//! a run, so a single counter is shared by all of them and never reset. The
//! counter is atomic; transformations may run on several threads.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter handing out unique suffixes.
#[derive(Debug, Default)]
pub struct NameGenerator {
    next: AtomicU64,
}

/// Process-wide generator used when the caller does not supply one.
static GLOBAL_NAMES: Lazy<NameGenerator> = Lazy::new(NameGenerator::new);

impl NameGenerator {
    /// Generator whose first name ends in `0`.
    pub fn new() -> Self {
        Self { next: AtomicU64::new(0) }
    }

    /// Start counting at `first` (useful when resuming a run).
    pub fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }

    /// The process-wide generator.
    pub fn global() -> &'static NameGenerator {
        &GLOBAL_NAMES
    }

    /// Next raw counter value.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// `prefix` followed by the next counter value.
    pub fn fresh(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.next_id())
    }

    /// Value the next call will hand out.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
