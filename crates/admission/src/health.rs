//! Leak detection and the pull-based health surface.
//!
//! The monitor is operational self-healing: recoveries are logged, never
//! raised to callers. The scope-guaranteed release discipline in
//! [`crate::Lease`] is the correctness mechanism; this is the backstop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::controller::AdmissionController;
use crate::permit::PermitSet;

/// Remaining-capacity fraction at or below which a pool reports `warning`.
const HIGH_WATER_REMAINING: f32 = 0.10;

/// Health status of one permit pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Healthy,
    Warning,
    Degraded,
    Exhausted,
}

/// Point-in-time health of one permit pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolHealth {
    pub current: i64,
    pub expected: i64,
    pub utilization: f32,
    pub status: PoolStatus,
}

impl PoolHealth {
    fn of(pool: &PermitSet) -> Self {
        let current = pool.current();
        let expected = pool.expected();
        let utilization = pool.utilization();

        let remaining = current as f32 / expected as f32;
        let status = if current <= 0 {
            PoolStatus::Exhausted
        } else if remaining <= HIGH_WATER_REMAINING {
            PoolStatus::Warning
        } else if pool.is_degraded() {
            PoolStatus::Degraded
        } else {
            PoolStatus::Healthy
        };

        Self { current, expected, utilization, status }
    }
}

/// The full health snapshot served for external polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub global: PoolHealth,
    pub backends: HashMap<String, PoolHealth>,
}

/// Periodic leak detector.
pub struct HealthMonitor {
    controller: Arc<AdmissionController>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(controller: Arc<AdmissionController>, interval: Duration) -> Self {
        Self { controller, interval }
    }

    /// Start the background sweep loop. The handle never completes on its
    /// own; the daemon aborts it on shutdown.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // First tick completes immediately; skip it so startup isn't
            // reported as a sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep(&self.controller).await;
                self.controller.prune_idle_sessions().await;
            }
        })
    }
}

/// One leak-detection pass over every pool.
///
/// Exposed for tests and for the doctor command; the monitor calls this on
/// its interval.
pub async fn sweep(controller: &AdmissionController) {
    for pool in controller.all_pools().await {
        let leaked = pool.unaccounted();
        if leaked > 0 {
            let restored = pool.recover();
            warn!(
                pool = %pool.key(),
                restored,
                current = pool.current(),
                expected = pool.expected(),
                "Permit leak recovered; pool marked degraded"
            );
        }

        let current = pool.current();
        let remaining = current as f32 / pool.expected() as f32;
        if current <= 0 {
            error!(
                pool = %pool.key(),
                current,
                expected = pool.expected(),
                "CRITICAL: permit pool exhausted"
            );
        } else if remaining <= HIGH_WATER_REMAINING {
            warn!(
                pool = %pool.key(),
                current,
                expected = pool.expected(),
                "Permit pool near capacity"
            );
        } else {
            debug!(pool = %pool.key(), current, "Pool healthy");
        }
    }
    info!("Admission health sweep complete");
}

/// Build the pull-based health snapshot.
pub async fn snapshot(controller: &AdmissionController) -> HealthSnapshot {
    let global = PoolHealth::of(controller.global());
    let backends = controller
        .backends()
        .iter()
        .map(|(name, pool)| (name.clone(), PoolHealth::of(pool)))
        .collect();
    HealthSnapshot { global, backends }
}
