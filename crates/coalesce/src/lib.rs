//! Request coalescing — one execution per fingerprint.
//!
//! Concurrent identical requests (same tool + normalized arguments) are
//! deduplicated: the first caller executes, everyone else waits on the
//! shared result. A bounded-TTL cache additionally serves identical
//! fingerprints submitted shortly after a prior completion.

mod fingerprint;

pub use fingerprint::Fingerprint;

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, trace};

use inquest_config::CoalescerConfig;

/// Broadcast channel depth per in-flight entry. One send ever happens; the
/// depth only needs to cover subscribers that haven't polled yet.
const WAITER_CHANNEL_CAPACITY: usize = 8;

struct CachedResult<T> {
    value: T,
    stored_at: Instant,
}

/// Deduplicates concurrent identical requests and caches recent results.
///
/// Linearizable on the fingerprint key: two submissions with the same
/// fingerprint are guaranteed to observe the same result.
pub struct RequestCoalescer<T: Clone + Send + 'static> {
    inflight: Mutex<HashMap<Fingerprint, broadcast::Sender<T>>>,
    cache: Mutex<HashMap<Fingerprint, CachedResult<T>>>,
    ttl: Duration,
    capacity: usize,
}

impl<T: Clone + Send + 'static> RequestCoalescer<T> {
    pub fn new(config: &CoalescerConfig) -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            capacity: config.cache_capacity,
        }
    }

    /// Submit work under a fingerprint.
    ///
    /// Exactly one concurrent caller per fingerprint runs `work`; the rest
    /// receive the same result (success or failure alike — `T` carries
    /// both). Results stay servable from cache for the configured TTL.
    pub async fn submit<F>(&self, fingerprint: Fingerprint, work: F) -> T
    where
        F: Future<Output = T>,
    {
        if let Some(cached) = self.cache_lookup(&fingerprint).await {
            debug!(fingerprint = %fingerprint, "Coalescer cache hit");
            return cached;
        }

        // Either become the leader for this fingerprint or join as a waiter.
        let mut rx = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&fingerprint) {
                Some(tx) => {
                    debug!(fingerprint = %fingerprint, "Joining in-flight request");
                    Some(tx.subscribe())
                }
                None => {
                    let (tx, _) = broadcast::channel(WAITER_CHANNEL_CAPACITY);
                    inflight.insert(fingerprint.clone(), tx);
                    None
                }
            }
        };
        let is_leader = rx.is_none();

        if let Some(rx) = rx.as_mut() {
            if let Ok(result) = rx.recv().await {
                return result;
            }
            // The leader vanished without broadcasting (cancelled mid-run).
            // Fall through and execute ourselves rather than hang.
            trace!(fingerprint = %fingerprint, "In-flight leader gone, executing directly");
        }

        let result = work.await;

        // Only the leader owns the in-flight entry; a fallen-through waiter
        // must not remove a newer leader's entry.
        if is_leader {
            let waiters = {
                let mut inflight = self.inflight.lock().await;
                inflight.remove(&fingerprint)
            };
            if let Some(tx) = waiters {
                // No receivers is fine: nobody else asked.
                let _ = tx.send(result.clone());
            }
        }

        self.cache_store(fingerprint, result.clone()).await;
        result
    }

    async fn cache_lookup(&self, fingerprint: &Fingerprint) -> Option<T> {
        let mut cache = self.cache.lock().await;
        match cache.get(fingerprint) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.value.clone()),
            Some(_) => {
                cache.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    async fn cache_store(&self, fingerprint: Fingerprint, value: T) {
        let mut cache = self.cache.lock().await;
        cache.retain(|_, entry| entry.stored_at.elapsed() <= self.ttl);

        // Still over capacity after dropping stale entries: evict oldest.
        while cache.len() >= self.capacity {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    cache.remove(&key);
                }
                None => break,
            }
        }

        cache.insert(fingerprint, CachedResult { value, stored_at: Instant::now() });
    }

    /// Number of requests currently executing.
    pub async fn inflight_count(&self) -> usize {
        self.inflight.lock().await.len()
    }

    /// Number of cached results (including not-yet-evicted stale entries).
    pub async fn cached_count(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coalescer() -> Arc<RequestCoalescer<String>> {
        Arc::new(RequestCoalescer::new(&CoalescerConfig {
            cache_ttl_secs: 60,
            cache_capacity: 8,
        }))
    }

    fn fp(tool: &str, args: serde_json::Value) -> Fingerprint {
        Fingerprint::compute(tool, args.as_object().unwrap())
    }

    #[tokio::test]
    async fn concurrent_identical_requests_execute_once() {
        let coalescer = coalescer();
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coalescer = coalescer.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .submit(fp("chat", serde_json::json!({"prompt": "hi"})), async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        "result".to_string()
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1, "work must run exactly once");
        assert!(results.iter().all(|r| r == "result"));
    }

    #[tokio::test]
    async fn different_fingerprints_execute_independently() {
        let coalescer = coalescer();
        let executions = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let executions = executions.clone();
            coalescer
                .submit(fp("chat", serde_json::json!({ "prompt": i })), async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    "r".to_string()
                })
                .await;
        }

        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cache_serves_repeat_submissions() {
        let coalescer = coalescer();
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let executions = executions.clone();
            let result = coalescer
                .submit(fp("chat", serde_json::json!({"prompt": "same"})), async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    "cached".to_string()
                })
                .await;
            assert_eq!(result, "cached");
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.cached_count().await, 1);
    }

    #[tokio::test]
    async fn expired_cache_entries_re_execute() {
        let coalescer = Arc::new(RequestCoalescer::new(&CoalescerConfig {
            cache_ttl_secs: 0,
            cache_capacity: 8,
        }));
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let executions = executions.clone();
            coalescer
                .submit(fp("chat", serde_json::json!({"prompt": "x"})), async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    "r".to_string()
                })
                .await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_capacity_is_bounded() {
        let coalescer = Arc::new(RequestCoalescer::new(&CoalescerConfig {
            cache_ttl_secs: 600,
            cache_capacity: 4,
        }));

        for i in 0..10 {
            coalescer
                .submit(fp("chat", serde_json::json!({ "prompt": i })), async move {
                    "r".to_string()
                })
                .await;
        }

        assert!(coalescer.cached_count().await <= 4);
    }

    #[tokio::test]
    async fn failures_are_shared_like_successes() {
        let coalescer: Arc<RequestCoalescer<Result<String, String>>> =
            Arc::new(RequestCoalescer::new(&CoalescerConfig {
                cache_ttl_secs: 60,
                cache_capacity: 8,
            }));
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coalescer = coalescer.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .submit(fp("chat", serde_json::json!({"prompt": "boom"})), async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err::<String, String>("backend down".into())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err("backend down".to_string()));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
