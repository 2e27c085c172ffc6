//! Tether store: the deduplicating, rate-limited work queue feeding the
//! reconcile workers.
//!
//! Semantics follow the classic controller work queue:
//! - a key that is already pending is not queued twice (coalescing);
//! - a key being processed is never handed to a second worker; re-adds during
//!   processing are parked and released by [`WorkQueue::done`];
//! - failures are retried with per-key exponential backoff until
//!   [`WorkQueue::forget`] resets the counter.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use metrics::{counter, gauge};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Per-key exponential backoff: `base * 2^(failures-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ItemBackoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(5), max: Duration::from_secs(1000) }
    }
}

impl ItemBackoff {
    pub fn new(base: Duration, max: Duration) -> Self { Self { base, max: max.max(base) } }

    /// Delay before retry number `failures` (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base.checked_mul(1u32 << exp).unwrap_or(self.max).min(self.max)
    }
}

struct Inner<K> {
    queue: VecDeque<K>,
    dirty: FxHashSet<K>,
    processing: FxHashSet<K>,
    failures: FxHashMap<K, u32>,
    shutting_down: bool,
}

struct Shared<K> {
    name: String,
    inner: Mutex<Inner<K>>,
    notify: Notify,
    backoff: ItemBackoff,
}

/// Cloneable handle to one named work queue.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self { Self { shared: Arc::clone(&self.shared) } }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(name: impl Into<String>, backoff: ItemBackoff) -> Self {
        let inner = Inner {
            queue: VecDeque::new(),
            dirty: FxHashSet::default(),
            processing: FxHashSet::default(),
            failures: FxHashMap::default(),
            shutting_down: false,
        };
        Self {
            shared: Arc::new(Shared { name: name.into(), inner: Mutex::new(inner), notify: Notify::new(), backoff }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        // Every critical section leaves the sets consistent before it can panic.
        self.shared.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Add `key` unless it is already pending.
    pub fn add(&self, key: K) {
        let mut inner = self.lock();
        if inner.shutting_down { return; }
        counter!("tether_queue_adds", 1u64);
        if !inner.dirty.insert(key.clone()) {
            trace!(queue = %self.shared.name, ?key, "coalesced");
            return;
        }
        if inner.processing.contains(&key) {
            // released by `done`
            return;
        }
        inner.queue.push_back(key);
        gauge!("tether_queue_depth", inner.queue.len() as f64);
        drop(inner);
        self.shared.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed. Needs a tokio runtime.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() { return; }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.add(key);
        });
    }

    /// Re-add `key` after its next backoff step.
    pub fn add_rate_limited(&self, key: K) {
        let failures = {
            let mut inner = self.lock();
            let n = inner.failures.entry(key.clone()).or_insert(0);
            *n = n.saturating_add(1);
            *n
        };
        let delay = self.shared.backoff.delay(failures);
        counter!("tether_queue_retries", 1u64);
        debug!(queue = %self.shared.name, ?key, failures, delay_ms = delay.as_millis() as u64, "requeue with backoff");
        self.add_after(key, delay);
    }

    /// Reset the failure counter for `key`.
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    let more = !inner.queue.is_empty();
                    gauge!("tether_queue_depth", inner.queue.len() as f64);
                    drop(inner);
                    if more {
                        // pass the wakeup on to the next idle worker
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as processed, releasing a re-add that arrived meanwhile.
    pub fn done(&self, key: &K) {
        let mut inner = self.lock();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.shared.notify.notify_one();
        }
    }

    /// Stop handing out keys. Blocked and future `get` calls return `None`;
    /// keys already handed out stay owned by their workers until `done`.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.shutting_down { return; }
        inner.shutting_down = true;
        inner.queue.clear();
        inner.dirty.clear();
        drop(inner);
        debug!(queue = %self.shared.name, "work queue shutting down");
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool { self.lock().shutting_down }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize { self.lock().queue.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Number of keys currently owned by workers.
    pub fn in_flight(&self) -> usize { self.lock().processing.len() }
}
