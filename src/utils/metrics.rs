//! Operation counters for regions, policy binds and affinity changes.
//!
//! Counters are process-wide relaxed atomics. They exist for diagnostics and
//! impose no ordering on the operations they count.
//!
//! Only the crate records operations; callers read snapshots.
//!
//! ```compile_fail
//! numabind::utils::metrics::record_operation(numabind::utils::metrics::Operation::Alloc, 4096);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation types for metrics tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    /// A region was allocated.
    Alloc,

    /// A region was freed.
    Free,

    /// A memory policy was applied to an address range or thread.
    Bind,

    /// A thread's CPU affinity was changed.
    Affinity,
}

/// Snapshot of the operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionStats {
    /// Regions allocated.
    pub alloc_count: u64,

    /// Regions freed.
    pub free_count: u64,

    /// Bytes allocated across all regions.
    pub bytes_allocated: u64,

    /// Bytes released across all regions.
    pub bytes_freed: u64,

    /// Policy binds applied.
    pub bind_count: u64,

    /// Affinity changes applied.
    pub affinity_count: u64,
}

impl RegionStats {
    /// Regions allocated and not yet freed.
    #[inline]
    pub fn live_regions(&self) -> u64 {
        self.alloc_count.saturating_sub(self.free_count)
    }

    /// Bytes allocated and not yet freed.
    #[inline]
    pub fn live_bytes(&self) -> u64 {
        self.bytes_allocated.saturating_sub(self.bytes_freed)
    }
}

static ALLOC_COUNT: AtomicU64 = AtomicU64::new(0);
static FREE_COUNT: AtomicU64 = AtomicU64::new(0);
static BYTES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static BYTES_FREED: AtomicU64 = AtomicU64::new(0);
static BIND_COUNT: AtomicU64 = AtomicU64::new(0);
static AFFINITY_COUNT: AtomicU64 = AtomicU64::new(0);

/// Record one operation touching `size` bytes.
#[inline]
pub(crate) fn record_operation(op: Operation, size: usize) {
    match op {
        Operation::Alloc => {
            ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
            BYTES_ALLOCATED.fetch_add(size as u64, Ordering::Relaxed);
        }
        Operation::Free => {
            FREE_COUNT.fetch_add(1, Ordering::Relaxed);
            BYTES_FREED.fetch_add(size as u64, Ordering::Relaxed);
        }
        Operation::Bind => {
            BIND_COUNT.fetch_add(1, Ordering::Relaxed);
        }
        Operation::Affinity => {
            AFFINITY_COUNT.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Get the current operation counters.
#[inline]
pub fn get_stats() -> RegionStats {
    RegionStats {
        alloc_count: ALLOC_COUNT.load(Ordering::Relaxed),
        free_count: FREE_COUNT.load(Ordering::Relaxed),
        bytes_allocated: BYTES_ALLOCATED.load(Ordering::Relaxed),
        bytes_freed: BYTES_FREED.load(Ordering::Relaxed),
        bind_count: BIND_COUNT.load(Ordering::Relaxed),
        affinity_count: AFFINITY_COUNT.load(Ordering::Relaxed),
    }
}
