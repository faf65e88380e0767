//! The admission controller and its RAII lease.
//!
//! Owns every permit pool in the process: one global pool, one pool per
//! configured backend, and lazily-created per-session pools. All
//! request-handling tasks share one controller instance constructed at
//! daemon start — there is no global registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, RwLock};
use tracing::{debug, info};

use inquest_config::AdmissionConfig;
use inquest_core::error::AdmissionError;

use crate::permit::{PermitKind, PermitSet};

/// Proof of admission.
///
/// Holds the acquired permits in acquisition order and releases them in
/// reverse order exactly once — on explicit [`Lease::release`] or on drop,
/// whichever comes first. Dropping on an error or cancellation path is the
/// release; there is no path out of scope that keeps a permit.
pub struct Lease {
    held: Vec<(Arc<PermitSet>, OwnedSemaphorePermit)>,
}

impl Lease {
    fn empty() -> Self {
        Self { held: Vec::new() }
    }

    fn push(&mut self, set: Arc<PermitSet>, permit: OwnedSemaphorePermit) {
        self.held.push((set, permit));
    }

    /// Keys of the pools this lease holds, in acquisition order.
    pub fn pools(&self) -> Vec<String> {
        self.held.iter().map(|(set, _)| set.key().to_string()).collect()
    }

    /// Release all held permits in reverse acquisition order.
    ///
    /// Idempotent: calling this more than once (or after drop) decrements
    /// each pool exactly once.
    pub fn release(&mut self) {
        while let Some((set, permit)) = self.held.pop() {
            drop(permit);
            set.on_release();
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("pools", &self.pools()).finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns all permit pools and admits requests against them.
pub struct AdmissionController {
    global: Arc<PermitSet>,
    backends: HashMap<String, Arc<PermitSet>>,
    sessions: RwLock<HashMap<String, Arc<PermitSet>>>,
    wait_timeout: Duration,
    session_capacity: u32,
}

impl AdmissionController {
    /// Build the controller at daemon start.
    ///
    /// `backend_capacities` fixes the set of known backends; requests
    /// naming any other backend are rejected before any permit is taken.
    pub fn new(config: &AdmissionConfig, backend_capacities: HashMap<String, u32>) -> Self {
        let backends = backend_capacities
            .into_iter()
            .map(|(name, capacity)| {
                let key = format!("backend:{name}");
                (name, Arc::new(PermitSet::new(PermitKind::Backend, key, capacity)))
            })
            .collect();

        Self {
            global: Arc::new(PermitSet::new(
                PermitKind::Global,
                "global",
                config.global_capacity,
            )),
            backends,
            sessions: RwLock::new(HashMap::new()),
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            session_capacity: config.session_capacity,
        }
    }

    /// Admit a request: acquire Global → Backend → Session.
    ///
    /// A failure at any tier drops the partially built lease, which
    /// releases the earlier tiers in reverse order before the error
    /// propagates.
    pub async fn acquire(
        &self,
        backend: Option<&str>,
        session: Option<&str>,
    ) -> Result<Lease, AdmissionError> {
        // Resolve the backend pool up front so an unknown name costs nothing.
        let backend_pool = match backend {
            Some(name) => Some(
                self.backends
                    .get(name)
                    .cloned()
                    .ok_or_else(|| AdmissionError::UnknownBackend(name.to_string()))?,
            ),
            None => None,
        };

        let mut lease = Lease::empty();

        let permit = self.global.acquire(self.wait_timeout).await?;
        lease.push(self.global.clone(), permit);

        if let Some(pool) = backend_pool {
            let permit = pool.acquire(self.wait_timeout).await?;
            lease.push(pool, permit);
        }

        if let Some(session_id) = session {
            let pool = self.session_pool(session_id).await;
            let permit = pool.acquire(self.wait_timeout).await?;
            lease.push(pool, permit);
        }

        debug!(pools = ?lease.pools(), "Request admitted");
        Ok(lease)
    }

    /// Acquire only a backend permit, for nested calls made by an
    /// already-admitted request (e.g. the expert analysis dispatch). The
    /// request's own global permit stays held; taking a second one here
    /// would double-count the request against the global ceiling.
    pub async fn acquire_backend(&self, backend: &str) -> Result<Lease, AdmissionError> {
        let pool = self
            .backends
            .get(backend)
            .cloned()
            .ok_or_else(|| AdmissionError::UnknownBackend(backend.to_string()))?;

        let mut lease = Lease::empty();
        let permit = pool.acquire(self.wait_timeout).await?;
        lease.push(pool, permit);
        Ok(lease)
    }

    /// Get or lazily create the permit pool for a session.
    async fn session_pool(&self, session_id: &str) -> Arc<PermitSet> {
        {
            let sessions = self.sessions.read().await;
            if let Some(pool) = sessions.get(session_id) {
                return pool.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!(session_id, "Creating session permit pool");
                Arc::new(PermitSet::new(
                    PermitKind::Session,
                    format!("session:{session_id}"),
                    self.session_capacity,
                ))
            })
            .clone()
    }

    /// The global pool.
    pub fn global(&self) -> &Arc<PermitSet> {
        &self.global
    }

    /// All backend pools, keyed by backend name.
    pub fn backends(&self) -> &HashMap<String, Arc<PermitSet>> {
        &self.backends
    }

    /// Every pool in the process, for the health sweep.
    pub async fn all_pools(&self) -> Vec<Arc<PermitSet>> {
        let mut pools = vec![self.global.clone()];
        pools.extend(self.backends.values().cloned());
        pools.extend(self.sessions.read().await.values().cloned());
        pools
    }

    /// Drop session pools that are idle at full capacity. Bounds the
    /// session map without touching pools that still hold permits.
    pub async fn prune_idle_sessions(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, pool| !pool.is_idle());
        let pruned = before - sessions.len();
        if pruned > 0 {
            debug!(pruned, "Pruned idle session pools");
        }
        pruned
    }

    /// Number of live session pools.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
