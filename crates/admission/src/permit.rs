//! One bounded pool of execution permits.
//!
//! A `PermitSet` pairs a tokio semaphore (for waiting) with atomic
//! bookkeeping (for observability and leak detection). The semaphore is the
//! source of blocking behavior; `current` mirrors the number of available
//! permits so the health check can compare it against `expected` without
//! touching semaphore internals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use inquest_core::error::AdmissionError;

/// Which tier a permit pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermitKind {
    Global,
    Backend,
    Session,
}

/// A bounded pool of execution permits.
///
/// Invariant: `0 <= current <= capacity` at all times; `current == expected`
/// at rest. Any other resting state is a leak.
pub struct PermitSet {
    kind: PermitKind,
    key: String,
    capacity: u32,
    semaphore: Arc<Semaphore>,
    /// Available permits, mirrored from the semaphore.
    current: AtomicI64,
    /// Permits currently held by live leases.
    inflight: AtomicI64,
    /// Set once a leak recovery has run; surfaces as `degraded` status.
    degraded: AtomicBool,
}

impl PermitSet {
    pub fn new(kind: PermitKind, key: impl Into<String>, capacity: u32) -> Self {
        Self {
            kind,
            key: key.into(),
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            current: AtomicI64::new(capacity as i64),
            inflight: AtomicI64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> PermitKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Available permits right now.
    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    /// The resting value of `current`: the full capacity.
    pub fn expected(&self) -> i64 {
        self.capacity as i64
    }

    /// Permits held by live leases.
    pub fn inflight(&self) -> i64 {
        self.inflight.load(Ordering::Acquire)
    }

    /// Fraction of capacity currently held.
    pub fn utilization(&self) -> f32 {
        let held = (self.expected() - self.current()).max(0);
        held as f32 / self.capacity as f32
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Whether the pool is idle at full capacity (safe to drop for
    /// session pools).
    pub fn is_idle(&self) -> bool {
        self.inflight() == 0 && self.current() == self.expected()
    }

    /// Acquire one permit, waiting at most `deadline`.
    ///
    /// On success the returned semaphore permit is held by the caller's
    /// lease; the bookkeeping is adjusted here and reversed in
    /// [`PermitSet::on_release`].
    pub(crate) async fn acquire(
        &self,
        deadline: Duration,
    ) -> Result<OwnedSemaphorePermit, AdmissionError> {
        let acquired = tokio::time::timeout(deadline, self.semaphore.clone().acquire_owned()).await;

        match acquired {
            Ok(Ok(permit)) => {
                self.current.fetch_sub(1, Ordering::AcqRel);
                self.inflight.fetch_add(1, Ordering::AcqRel);
                debug!(pool = %self.key, current = self.current(), "Permit acquired");
                Ok(permit)
            }
            Ok(Err(_)) => Err(AdmissionError::PoolClosed(self.key.clone())),
            Err(_) => Err(AdmissionError::Exhausted {
                pool: self.key.clone(),
                waited_secs: deadline.as_secs(),
                retry_after_secs: (deadline.as_secs() / 2).max(1),
                current: self.current(),
                expected: self.expected(),
            }),
        }
    }

    /// Bookkeeping counterpart of dropping the semaphore permit.
    pub(crate) fn on_release(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        debug!(pool = %self.key, current = self.current(), "Permit released");
    }

    /// Permits missing from the pool that no live lease accounts for.
    pub(crate) fn unaccounted(&self) -> i64 {
        (self.expected() - self.current()) - self.inflight()
    }

    /// Best-effort recovery: return unaccounted permits to the pool and
    /// mark the pool degraded. Returns how many were restored.
    pub(crate) fn recover(&self) -> i64 {
        let leaked = self.unaccounted();
        if leaked <= 0 {
            return 0;
        }
        self.semaphore.add_permits(leaked as usize);
        self.current.fetch_add(leaked, Ordering::AcqRel);
        self.degraded.store(true, Ordering::Release);
        leaked
    }

    /// Simulate a leak: take a permit that no lease will ever return.
    #[cfg(test)]
    pub(crate) fn leak_one_for_test(&self) {
        let permit = self.semaphore.clone().try_acquire_owned().expect("pool has permits");
        std::mem::forget(permit);
        self.current.fetch_sub(1, Ordering::AcqRel);
    }
}
