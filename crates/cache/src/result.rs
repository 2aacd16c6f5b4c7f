//! Deadline-bounded caching of remote computations
//!
//! Diagnostic producers ask nodes for thread dumps, system properties,
//! metrics and the like. Any of those calls can stall on a slow or flaky
//! channel, and a collection run must never stall with it. [`ResultCache`]
//! wraps each such computation: the caller waits at most its deadline, a
//! computation that overruns keeps running in the background, and whatever
//! it eventually produces is served to later callers.
//!
//! One instance covers one kind of computation (one "slot"); entries inside
//! it are keyed by node.

use chrono::{DateTime, Utc};
use fleetdiag_core::{CacheKey, ChannelStatus, NodeIdentity, RemoteResult};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A value produced by a remote computation, with its production time.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    /// The computed value.
    pub value: T,
    /// When the computation completed on the controller's clock.
    pub produced_at: DateTime<Utc>,
}

type InFlight<T> = Shared<BoxFuture<'static, Option<T>>>;

struct Slot<T> {
    cached: Option<CachedValue<T>>,
    inflight: Option<InFlight<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            cached: None,
            inflight: None,
        }
    }
}

type Entries<T> = Arc<Mutex<HashMap<CacheKey, Slot<T>>>>;

/// Per-node cache for one kind of remote computation.
///
/// The contract of [`get`](Self::get): it always resolves to a value within
/// the caller's deadline, it never cancels work it started, and it never
/// propagates node unavailability as an error. Logging is the only visible
/// side effect of the failure paths.
#[derive(Clone)]
pub struct ResultCache<T> {
    name: Arc<str>,
    entries: Entries<T>,
}

impl<T> ResultCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a cache; `name` identifies the slot in log output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().into(),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch the value for `node`, waiting at most `deadline`.
    ///
    /// - No usable channel: the last cached value, else `fallback`,
    ///   immediately; no remote attempt is made.
    /// - Cached value present: it is returned immediately and a refresh is
    ///   started (or joined) in the background for the next caller.
    /// - Otherwise the computation is started (or an in-flight one for the
    ///   same node is joined rather than duplicated) and awaited up to
    ///   `deadline`. On completion the value is stored and returned; at the
    ///   deadline the computation is left running and `fallback` is
    ///   returned. A failed computation logs once at low severity.
    pub async fn get<C, F, Fut>(
        &self,
        channel: &C,
        node: &NodeIdentity,
        compute: F,
        deadline: Duration,
        fallback: T,
    ) -> T
    where
        C: ChannelStatus + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<T>> + Send + 'static,
    {
        let key = CacheKey::of(node);
        if !channel.is_connected(node) {
            debug!(slot = %self.name, node = %node.name, "no channel; serving cached value");
            return self.cached_or(&key, fallback);
        }

        let cached = self.cached(node).map(|c| c.value);
        let inflight = self.join_or_start(&key, node, compute);
        if let Some(value) = cached {
            // Serve what we have; the refresh feeds the next call.
            return value;
        }

        match tokio::time::timeout(deadline, inflight).await {
            Ok(Some(value)) => value,
            // Failure was already logged by the computation task.
            Ok(None) => self.cached_or(&key, fallback),
            Err(_) => {
                debug!(
                    slot = %self.name,
                    node = %node.name,
                    deadline_ms = deadline.as_millis() as u64,
                    "deadline elapsed; computation continues in background"
                );
                self.cached_or(&key, fallback)
            }
        }
    }

    /// The cached value for `node`, if any.
    #[must_use]
    pub fn cached(&self, node: &NodeIdentity) -> Option<CachedValue<T>> {
        let key = CacheKey::of(node);
        self.entries.lock().get(&key).and_then(|s| s.cached.clone())
    }

    /// Drop the entry for one node; returns whether a value was present.
    ///
    /// Called when the fleet directory reports a node removed; removal,
    /// not mere disconnection, is what ends an entry's lifetime.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries
            .lock()
            .remove(key)
            .is_some_and(|slot| slot.cached.is_some())
    }

    /// Drop every entry whose node is no longer in the active set.
    pub fn retain(&self, active: &HashSet<CacheKey>) {
        self.entries.lock().retain(|key, _| active.contains(key));
    }

    /// Number of nodes with a cached value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|slot| slot.cached.is_some())
            .count()
    }

    /// True when no node has a cached value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached_or(&self, key: &CacheKey, fallback: T) -> T {
        self.entries
            .lock()
            .get(key)
            .and_then(|slot| slot.cached.as_ref().map(|c| c.value.clone()))
            .unwrap_or(fallback)
    }

    /// Join the in-flight computation for `key`, or start one.
    ///
    /// The spawned task owns the cache update so a caller that stops
    /// waiting changes nothing about the outcome.
    fn join_or_start<F, Fut>(&self, key: &CacheKey, node: &NodeIdentity, compute: F) -> InFlight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RemoteResult<T>> + Send + 'static,
    {
        let mut entries = self.entries.lock();
        let slot = entries.entry(key.clone()).or_default();
        if let Some(inflight) = &slot.inflight {
            return inflight.clone();
        }

        let fut = compute();
        let entries_handle = Arc::clone(&self.entries);
        let slot_name = Arc::clone(&self.name);
        let node_name = node.name.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let _clear = InflightGuard {
                entries: Arc::clone(&entries_handle),
                key: task_key.clone(),
            };
            match fut.await {
                Ok(value) => {
                    let mut entries = entries_handle.lock();
                    let slot = entries.entry(task_key).or_default();
                    slot.cached = Some(CachedValue {
                        value: value.clone(),
                        produced_at: Utc::now(),
                    });
                    Some(value)
                }
                Err(err) => {
                    debug!(
                        slot = %slot_name,
                        node = %node_name,
                        error = %err,
                        "remote computation failed; keeping cached value"
                    );
                    None
                }
            }
        });

        let inflight: InFlight<T> = task.map(|joined| joined.ok().flatten()).boxed().shared();
        slot.inflight = Some(inflight.clone());
        inflight
    }
}

/// Clears the in-flight marker when the computation task ends, however it
/// ends; a panicking computation must not wedge the slot.
struct InflightGuard<T> {
    entries: Entries<T>,
    key: CacheKey,
}

impl<T> Drop for InflightGuard<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.entries.lock().get_mut(&self.key) {
            slot.inflight = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetdiag_core::RemoteError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct Channel(bool);

    impl ChannelStatus for Channel {
        fn is_connected(&self, _node: &NodeIdentity) -> bool {
            self.0
        }
    }

    fn node() -> NodeIdentity {
        NodeIdentity::new("builder-1", "/var/lib/agent")
    }

    #[tokio::test]
    async fn disconnected_node_returns_fallback_without_computing() {
        let cache: ResultCache<String> = ResultCache::new("thread-dump");
        let value = cache
            .get(
                &Channel(false),
                &node(),
                || async { Ok("real".to_string()) },
                Duration::from_secs(1),
                "N/A".to_string(),
            )
            .await;
        assert_eq!(value, "N/A");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn fast_computation_is_returned_and_cached() {
        let cache: ResultCache<String> = ResultCache::new("thread-dump");
        let value = cache
            .get(
                &Channel(true),
                &node(),
                || async { Ok("real".to_string()) },
                Duration::from_millis(500),
                "N/A".to_string(),
            )
            .await;
        assert_eq!(value, "real");
        assert_eq!(cache.cached(&node()).map(|c| c.value), Some("real".into()));
    }

    #[tokio::test]
    async fn slow_computation_yields_fallback_at_the_deadline() {
        let cache: ResultCache<String> = ResultCache::new("thread-dump");
        let start = Instant::now();
        let value = cache
            .get(
                &Channel(true),
                &node(),
                || async {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                    Ok("real".to_string())
                },
                Duration::from_millis(50),
                "N/A".to_string(),
            )
            .await;
        assert_eq!(value, "N/A");
        // Returned at the deadline, not after the computation.
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn background_completion_feeds_the_next_call() {
        let cache: ResultCache<String> = ResultCache::new("thread-dump");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let calls = Arc::clone(&calls);
            cache
                .get(
                    &Channel(true),
                    &node(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok("real".to_string())
                    },
                    Duration::from_millis(30),
                    "N/A".to_string(),
                )
                .await
        };
        assert_eq!(first, "N/A");

        // Let the abandoned computation finish in the background.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let start = Instant::now();
        let second = {
            let calls = Arc::clone(&calls);
            cache
                .get(
                    &Channel(true),
                    &node(),
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Ok("fresh".to_string())
                    },
                    Duration::from_millis(30),
                    "N/A".to_string(),
                )
                .await
        };
        assert_eq!(second, "real");
        assert!(start.elapsed() < Duration::from_millis(30));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let cache: ResultCache<u32> = ResultCache::new("plugin-list");
        let calls = Arc::new(AtomicUsize::new(0));

        let compute = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(7u32)
            }
        };

        let node = node();
        let channel = Channel(true);
        let (a, b) = tokio::join!(
            cache.get(
                &channel,
                &node,
                compute(Arc::clone(&calls)),
                Duration::from_millis(500),
                0,
            ),
            cache.get(
                &channel,
                &node,
                compute(Arc::clone(&calls)),
                Duration::from_millis(500),
                0,
            ),
        );

        assert_eq!((a, b), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_computation_resolves_to_fallback() {
        let cache: ResultCache<String> = ResultCache::new("env-vars");
        let value = cache
            .get(
                &Channel(true),
                &node(),
                || async { Err(RemoteError::Disconnected) },
                Duration::from_millis(200),
                "N/A".to_string(),
            )
            .await;
        assert_eq!(value, "N/A");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn disconnect_after_success_serves_the_stale_value() {
        let cache: ResultCache<String> = ResultCache::new("env-vars");
        let first = cache
            .get(
                &Channel(true),
                &node(),
                || async { Ok("real".to_string()) },
                Duration::from_millis(200),
                "N/A".to_string(),
            )
            .await;
        assert_eq!(first, "real");

        let second = cache
            .get(
                &Channel(false),
                &node(),
                || async { Ok("never".to_string()) },
                Duration::from_millis(200),
                "N/A".to_string(),
            )
            .await;
        assert_eq!(second, "real");
    }

    #[tokio::test]
    async fn retain_drops_departed_nodes() {
        let cache: ResultCache<u32> = ResultCache::new("uptime");
        let kept = NodeIdentity::new("kept", "/srv/kept");
        let gone = NodeIdentity::new("gone", "/srv/gone");

        for n in [&kept, &gone] {
            let got = cache
                .get(
                    &Channel(true),
                    n,
                    || async { Ok(1u32) },
                    Duration::from_millis(200),
                    0,
                )
                .await;
            assert_eq!(got, 1);
        }
        assert_eq!(cache.len(), 2);

        let active: HashSet<CacheKey> = [CacheKey::of(&kept)].into_iter().collect();
        cache.retain(&active);
        assert_eq!(cache.len(), 1);
        assert!(cache.cached(&gone).is_none());
        assert!(cache.cached(&kept).is_some());

        assert!(cache.invalidate(&CacheKey::of(&kept)));
        assert!(cache.is_empty());
    }
}
