//! Per-kind reconcile queue.
//!
//! Keys are deduplicated while queued and never handed to two workers at once: a key added
//! while it is being processed is parked as dirty and queued again on [`WorkQueue::done`].
//! [`WorkQueue::add`] waits for capacity, re-adds from reconcilers and retries do not, so
//! that workers never block on each other's queues.

use getset::CopyGetters;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Exponential per-key retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
pub struct Backoff {
    #[getset(get_copy = "pub")]
    base: Duration,

    #[getset(get_copy = "pub")]
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `failures` (starting at 1).
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

struct Queued<K> {
    key: K,
    holds_permit: bool,
}

struct QueueState<K> {
    queue: VecDeque<Queued<K>>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    failures: HashMap<K, u32>,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processing: HashSet::new(),
            dirty: HashSet::new(),
            failures: HashMap::new(),
        }
    }
}

enum Admission {
    Duplicate,
    Parked,
    NeedsSlot,
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    fn admit(&mut self, key: &K) -> Admission {
        if self.queued.contains(key) {
            Admission::Duplicate
        } else if self.processing.contains(key) {
            self.dirty.insert(key.clone());
            Admission::Parked
        } else {
            Admission::NeedsSlot
        }
    }

    fn push(&mut self, key: K, holds_permit: bool) {
        self.queued.insert(key.clone());
        self.queue.push_back(Queued { key, holds_permit });
    }
}

pub struct WorkQueue<K> {
    name: &'static str,
    state: Mutex<QueueState<K>>,
    available: Notify,
    capacity: Semaphore,
    backoff: Backoff,
    shutdown: CancellationToken,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        capacity: usize,
        backoff: Backoff,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            capacity: Semaphore::new(capacity.max(1)),
            backoff,
            shutdown,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues `key`, waiting for a free slot if the queue is full. Returns `false` once the
    /// queue is shut down.
    pub async fn add(&self, key: K) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        {
            let mut state = self.state.lock().await;
            if !matches!(state.admit(&key), Admission::NeedsSlot) {
                return true;
            }
        }

        let permit = tokio::select! {
            () = self.shutdown.cancelled() => return false,
            permit = self.capacity.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        let mut state = self.state.lock().await;
        if matches!(state.admit(&key), Admission::NeedsSlot) {
            permit.forget();
            trace!("Queued key; queue.name={} object.ref={key}", self.name);
            state.push(key, true);
            self.available.notify_one();
        }
        true
    }

    /// Queues `key` without waiting for capacity.
    pub async fn requeue(&self, key: K) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let mut state = self.state.lock().await;
        if matches!(state.admit(&key), Admission::NeedsSlot) {
            trace!("Requeued key; queue.name={} object.ref={key}", self.name);
            state.push(key, false);
            self.available.notify_one();
        }
    }

    /// Queues `key` after `delay`, unless the queue shuts down first.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = queue.shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.requeue(key).await,
            }
        });
    }

    /// Waits for the next key. `None` means the queue was shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }

            {
                let mut state = self.state.lock().await;
                if let Some(Queued { key, holds_permit }) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    if holds_permit {
                        self.capacity.add_permits(1);
                    }
                    return Some(key);
                }
            }

            tokio::select! {
                () = self.shutdown.cancelled() => return None,
                () = self.available.notified() => {}
            }
        }
    }

    /// Marks `key` as processed, queueing it again if it was added meanwhile.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.queued.contains(key) {
            state.push(key.clone(), false);
            self.available.notify_one();
        }
    }

    /// Schedules a retry of `key` with a delay growing per consecutive failure.
    pub async fn requeue_after_failure(self: &Arc<Self>, key: K) -> Duration {
        let failures = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_default();
            *failures += 1;
            *failures
        };

        let delay = self.backoff.delay(failures);
        debug!(
            "Retrying after failure; queue.name={} object.ref={key} failures={failures} delay={delay:?}",
            self.name
        );
        self.add_after(key, delay);
        delay
    }

    pub async fn failures(&self, key: &K) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    /// Clears the failure history of `key`.
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.failures.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.available.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_some;
    use rstest::rstest;
    use tokio_test::{assert_pending, assert_ready};

    fn queue(capacity: usize) -> Arc<WorkQueue<String>> {
        WorkQueue::new(
            "test",
            capacity,
            Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
            CancellationToken::new(),
        )
    }

    #[rstest]
    #[case(1, Duration::from_millis(100))]
    #[case(2, Duration::from_millis(200))]
    #[case(4, Duration::from_millis(800))]
    #[case(5, Duration::from_secs(1))]
    #[case(64, Duration::from_secs(1))]
    fn test_backoff_delay(#[case] failures: u32, #[case] expected: Duration) {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.delay(failures), expected);
    }

    #[tokio::test]
    async fn test_duplicates_are_collapsed() {
        let queue = queue(10);
        queue.add("a".to_string()).await;
        queue.add("b".to_string()).await;
        queue.add("a".to_string()).await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(assert_some!(queue.get().await), "a");
        assert_eq!(assert_some!(queue.get().await), "b");
    }

    #[tokio::test]
    async fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = queue(10);
        queue.add("a".to_string()).await;
        let key = assert_some!(queue.get().await);

        queue.add("a".to_string()).await;
        assert!(queue.is_empty().await);

        queue.done(&key).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(assert_some!(queue.get().await), "a");
    }

    #[tokio::test]
    async fn test_add_waits_for_capacity() {
        let queue = queue(1);
        queue.add("a".to_string()).await;

        let mut blocked = tokio_test::task::spawn(queue.add("b".to_string()));
        assert_pending!(blocked.poll());

        assert_eq!(assert_some!(queue.get().await), "a");
        assert!(blocked.is_woken());
        assert!(assert_ready!(blocked.poll()));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_until_forgotten() {
        let queue = queue(10);
        let key = "a".to_string();

        assert_eq!(
            queue.requeue_after_failure(key.clone()).await,
            Duration::from_millis(100)
        );
        assert_eq!(
            queue.requeue_after_failure(key.clone()).await,
            Duration::from_millis(200)
        );
        assert_eq!(queue.failures(&key).await, 2);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(assert_some!(queue.get().await), "a");

        queue.forget(&key).await;
        assert_eq!(queue.failures(&key).await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiting_workers() {
        let queue = queue(10);
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.shutdown();

        assert_eq!(worker.await.ok().flatten(), None);
        assert!(!queue.add("a".to_string()).await);
    }
}
