//! Exclusive-operation lock and cooperative cancellation.
//!
//! # Responsibility
//! - Serialize persist/export against each other and against edits.
//! - Let long-running operations stop early on request.
//!
//! # Invariants
//! - At most one `ExclusiveGuard` per lock exists at a time; a second
//!   acquire attempt fails instead of waiting.
//! - Dropping the guard always releases the lock, including on error paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between caller and operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Non-blocking lock guarding exclusive operations of one session.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveLock {
    busy: Arc<AtomicBool>,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `operation`, or returns `None` when another
    /// exclusive operation is in flight.
    pub fn try_acquire(&self, operation: &'static str) -> Option<ExclusiveGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ExclusiveGuard {
                busy: Arc::clone(&self.busy),
                operation,
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Held for the duration of one exclusive operation.
#[derive(Debug)]
pub struct ExclusiveGuard {
    busy: Arc<AtomicBool>,
    operation: &'static str,
}

impl ExclusiveGuard {
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}
