//! Deduplicating, rate-limited work queue
//!
//! Decouples watch notifications from reconciliation. Keys added while a
//! reconcile for the same key is in flight collapse into a single
//! redelivery, so at most one worker processes a given key at any time.
//! Failed keys are re-added after a per-key exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

/// First retry delay for a failing key
pub(crate) const BASE_BACKOFF: Duration = Duration::from_millis(5);

/// Upper bound on the per-key retry delay
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(1000);

/// Exponential per-key backoff, doubling from [`BASE_BACKOFF`] and
/// capped at [`MAX_BACKOFF`].
pub(crate) fn backoff_for(retries: u32) -> Duration {
    // 5ms << 18 already exceeds the cap
    let shift = retries.min(18);
    (BASE_BACKOFF * (1u32 << shift)).min(MAX_BACKOFF)
}

struct QueueState<T> {
    pending: VecDeque<T>,
    /// Keys awaiting delivery, including keys marked for redelivery
    /// while they are still being processed.
    dirty: HashSet<T>,
    /// Keys handed to a worker and not yet released via `done`.
    processing: HashSet<T>,
    /// Consecutive failure count per key, cleared by `forget`.
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

/// Work queue with per-key deduplication and in-flight tracking.
///
/// Every successful [`get`](WorkQueue::get) must be paired with exactly
/// one [`done`](WorkQueue::done) call for the returned key; without it,
/// re-enqueues of that key are suppressed indefinitely.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().expect("work queue mutex poisoned")
    }

    /// Enqueue a key for processing.
    ///
    /// Duplicate keys collapse: a key already pending is not enqueued
    /// again, and a key currently being processed is marked for a single
    /// redelivery once its `done` call releases it. Adds after shutdown
    /// are ignored.
    pub fn add(&self, item: T) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.pending.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue a key after a delay.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Enqueue a failed key with exponential backoff.
    ///
    /// Each call for the same key doubles the delay until
    /// [`forget`](WorkQueue::forget) resets it or [`MAX_BACKOFF`] caps it.
    pub fn requeue_rate_limited(self: &Arc<Self>, item: T) {
        let delay = {
            let mut state = self.state();
            let retries = state.failures.entry(item.clone()).or_insert(0);
            let delay = backoff_for(*retries);
            *retries += 1;
            delay
        };
        self.add_after(item, delay);
    }

    /// Clear the failure count for a key after a successful reconcile.
    pub fn forget(&self, item: &T) {
        self.state().failures.remove(item);
    }

    /// Consecutive failures recorded for a key.
    pub fn retries(&self, item: &T) -> u32 {
        self.state().failures.get(item).copied().unwrap_or(0)
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue has been shut down and drained.
    /// The returned key is marked in flight until `done` is called.
    pub async fn get(&self) -> Option<T> {
        loop {
            // Register for wakeups before inspecting state, so a
            // notification between the check and the await is not lost.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if let Some(item) = state.pending.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release the in-flight marker for a key.
    ///
    /// If the key was re-added while it was being processed, it moves
    /// back to the pending queue for one redelivery.
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.pending.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Close intake and wake all blocked `get` callers.
    ///
    /// Keys already pending are still delivered; once drained, `get`
    /// returns `None`.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys awaiting delivery.
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
