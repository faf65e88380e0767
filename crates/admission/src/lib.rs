//! Admission control — bounded concurrency with guaranteed release.
//!
//! Every admitted request holds permits from up to three tiers: global,
//! per-backend, and per-session. Acquisition order is always
//! Global → Backend → Session; release is the exact reverse, on every exit
//! path, via the RAII [`Lease`].
//!
//! The periodic [`HealthMonitor`] is a backstop, not a correctness
//! mechanism: it detects and repairs permit-count drift that the release
//! discipline should make impossible.

mod controller;
mod health;
mod permit;

pub use controller::{AdmissionController, Lease};
pub use health::{HealthMonitor, HealthSnapshot, PoolHealth, PoolStatus, snapshot, sweep};
pub use permit::{PermitKind, PermitSet};
