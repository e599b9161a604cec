//! De-duplicating, rate-limited work queue.
//!
//! Semantics follow the classic controller work queue:
//! - adding a key that is already queued is a no-op
//! - adding a key that is being processed marks it dirty; it is queued again
//!   once, when the in-flight attempt calls `done`
//! - a key is handed to at most one worker at a time
//! - `get` waits until a key is available; after shutdown it returns `None`
//!   even if keys are still queued
//!
//! Delayed adds run on spawned tokio timers, so `add_after` and
//! `add_rate_limited` must be called from within a runtime.

use crate::backoff::{ExponentialBackoff, ItemBackoff};
use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Key bound for queue items.
pub trait QueueKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Non-blocking enqueue handle.
///
/// Event sources only get this capability, never the queue consumer side.
pub trait Enqueue<K>: Send + Sync {
    /// Queue `key` for processing.
    fn add(&self, key: K);
}

#[derive(Debug)]
struct QueueState<K> {
    /// Keys waiting for a worker, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    /// Set once by `shut_down`; `get` returns `None` from then on
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<QueueState<K>>,
    /// Per-key failure counters for `add_rate_limited`
    backoff: Mutex<ItemBackoff<K>>,
    /// Wakes a waiting `get` after an add or shutdown
    notify: Notify,
}

/// Rate-limited work queue. Cloning yields another handle to the same queue.
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl<K: QueueKey> WorkQueue<K> {
    /// Creates an empty queue using `backoff` for rate-limited requeues.
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                backoff: Mutex::new(ItemBackoff::new(backoff)),
                notify: Notify::new(),
            }),
        }
    }

    /// Marks `key` for processing.
    pub fn add(&self, key: K) {
        let mut state = lock(&self.inner.state);
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(?key, "already queued");
            return;
        }
        if state.processing.contains(&key) {
            trace!(?key, "in flight, marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Adds `key` after the backoff delay for its consecutive failure count.
    pub fn add_rate_limited(&self, key: K) {
        let delay = lock(&self.inner.backoff).when(&key);
        trace!(?key, ?delay, "rate limited requeue");
        self.add_after(key, delay);
    }

    /// Consecutive rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        lock(&self.inner.backoff).num_requeues(key)
    }

    /// Resets the failure counter of `key`.
    pub fn forget(&self, key: &K) {
        lock(&self.inner.backoff).forget(key);
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    ///
    /// The returned key must be handed back with `done`.
    pub async fn get(&self) -> Option<K> {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            // Register interest before inspecting state so a concurrent add or
            // shutdown between the check and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = lock(&self.inner.state);
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.processing.insert(key.clone());
                    state.dirty.remove(&key);
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on; notify_one may have been consumed by us.
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Marks processing of `key` finished. A key re-added while in flight is
    /// queued again now.
    pub fn done(&self, key: &K) {
        let mut state = lock(&self.inner.state);
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stops accepting keys and wakes every waiting `get`.
    pub fn shut_down(&self) {
        lock(&self.inner.state).shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Whether `shut_down` has been called.
    pub fn is_shutting_down(&self) -> bool {
        lock(&self.inner.state).shutting_down
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    /// True when no key is waiting for a worker.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: QueueKey> Enqueue<K> for WorkQueue<K> {
    fn add(&self, key: K) {
        WorkQueue::add(self, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> WorkQueue<String> {
        WorkQueue::default()
    }

    #[tokio::test]
    async fn test_duplicate_adds_are_coalesced() {
        let q = queue();
        q.add("a".to_string());
        q.add("a".to_string());
        q.add("b".to_string());

        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert_eq!(q.get().await.as_deref(), Some("b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_once_after_done() {
        let q = queue();
        q.add("a".to_string());
        let key = q.get().await.unwrap();

        // Many re-adds while in flight
        for _ in 0..10 {
            q.add("a".to_string());
        }
        // Not handed out while in flight
        assert!(q.is_empty());

        q.done(&key);
        assert_eq!(q.len(), 1);
        let again = q.get().await.unwrap();
        q.done(&again);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_get_returns_none_after_shutdown() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;

        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        // Adds after shutdown are ignored
        q.add("a".to_string());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queued_keys() {
        let q = queue();
        q.add("a".to_string());
        q.shut_down();

        assert!(q.is_shutting_down());
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn test_blocked_get_wakes_on_add() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;

        q.add("a".to_string());
        assert_eq!(waiter.await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_delays_delivery() {
        let q = queue();
        q.add_after("a".to_string(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(q.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_counts_and_forget() {
        let q = queue();
        let key = "a".to_string();

        q.add_rate_limited(key.clone());
        q.add_rate_limited(key.clone());
        assert_eq!(q.num_requeues(&key), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(q.len(), 1);

        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_worker_per_key() {
        let q = queue();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let passes = Arc::new(AtomicUsize::new(0));

        q.add("key".to_string());

        let mut workers = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            let passes = Arc::clone(&passes);
            workers.push(tokio::spawn(async move {
                while let Some(key) = q.get().await {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    passes.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    q.done(&key);
                }
            }));
        }

        // Wait for the first pass to be in flight, then flood re-adds
        while passes.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let adders: Vec<_> = (0..16)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.add("key".to_string()) })
            })
            .collect();
        for adder in adders {
            adder.await.unwrap();
        }

        // Let the follow-up pass run, then stop
        tokio::time::sleep(Duration::from_millis(500)).await;
        q.shut_down();
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(passes.load(Ordering::SeqCst), 2);
    }
}
