//! Single-flight work queue keyed by resource.
//!
//! A key is in at most one of three places: waiting in the queue, being
//! processed by exactly one worker, or both processing and marked dirty
//! (re-triggered while in flight). A dirty key is re-queued once when its
//! worker calls [`WorkQueue::done`], so any number of re-triggers during a
//! pass collapse into a single follow-up pass.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

/// Coalescing, single-flight work queue.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

struct QueueState<K> {
    /// Keys ready to hand out, in arrival order.
    queue: VecDeque<K>,

    /// Keys that need a pass: queued, or re-triggered while processing.
    dirty: HashSet<K>,

    /// Keys currently handed out to a worker.
    processing: HashSet<K>,

    shut_down: bool,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shut_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        // Queue state stays consistent across a panicking holder: every
        // mutation is a single set/deque operation.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a key as needing a pass.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shut_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "Key in flight, deferring");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add a key after a delay.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration)
    where
        K: Send + Sync + 'static,
    {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key to process.
    ///
    /// Returns `None` once the queue has been shut down. The caller must
    /// call [`WorkQueue::done`] with the key when the pass finishes.
    pub async fn next(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shut_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing a key, re-queueing it if it was re-triggered.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shut_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    /// Returns true once [`WorkQueue::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns true if no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently being processed.
    pub fn in_flight(&self) -> usize {
        self.lock().processing.len()
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
