//! Process-wide mapping from GatewayClass name to its [`Resources`] snapshot.
//!
//! Every accepted mutation is delivered to all subscribers while the store lock is held, so
//! subscribers observe writes in exactly the order the store applied them. Writes that would
//! not change the stored value are dropped before reaching subscribers.

mod instrumentation;

use crate::resources::Resources;
use getset::{CopyGetters, Getters};
use instrumentation::{record_write_applied, record_write_conflict, record_write_skipped};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Snapshot {key} was modified concurrently (expected {expected:?}, found {found:?})")]
    Conflict {
        key: String,
        expected: Option<Revision>,
        found: Option<Revision>,
    },
    #[error("Snapshot {key} kept conflicting after {attempts} attempts")]
    RetriesExhausted { key: String, attempts: usize },
}

/// Monotonic write counter identifying one stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(u64);

#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct Versioned {
    #[getset(get_copy = "pub")]
    revision: Revision,

    #[getset(get = "pub")]
    resources: Arc<Resources>,
}

/// The result of a read-modify-write step.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Keep,
    Store(Resources),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Unchanged,
    Stored,
    Deleted,
}

#[derive(Debug, Clone, Getters, CopyGetters)]
pub struct SnapshotUpdate {
    #[getset(get = "pub")]
    key: String,

    /// The new value, or the last stored value for deletions.
    #[getset(get = "pub")]
    resources: Arc<Resources>,

    #[getset(get_copy = "pub")]
    deleted: bool,
}

#[derive(Clone)]
struct Entry {
    revision: Revision,
    resources: Arc<Resources>,
}

#[derive(Default)]
struct StoreInner {
    entries: BTreeMap<String, Entry>,
    subscribers: Vec<UnboundedSender<SnapshotUpdate>>,
    last_revision: u64,
}

impl StoreInner {
    fn next_revision(&mut self) -> Revision {
        self.last_revision += 1;
        Revision(self.last_revision)
    }

    fn publish(&mut self, update: &SnapshotUpdate) {
        self.subscribers
            .retain(|subscriber| subscriber.send(update.clone()).is_ok());
    }

    fn apply(&mut self, key: &str, mutation: Mutation) -> WriteOutcome {
        match mutation {
            Mutation::Keep => WriteOutcome::Unchanged,
            Mutation::Store(resources) => {
                if let Some(existing) = self.entries.get(key)
                    && *existing.resources == resources
                {
                    record_write_skipped(key);
                    return WriteOutcome::Unchanged;
                }

                let resources = Arc::new(resources);
                let revision = self.next_revision();
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        revision,
                        resources: resources.clone(),
                    },
                );

                record_write_applied(key, false);
                self.publish(&SnapshotUpdate {
                    key: key.to_string(),
                    resources,
                    deleted: false,
                });
                WriteOutcome::Stored
            }
            Mutation::Delete => match self.entries.remove(key) {
                None => WriteOutcome::Unchanged,
                Some(entry) => {
                    record_write_applied(key, true);
                    self.publish(&SnapshotUpdate {
                        key: key.to_string(),
                        resources: entry.resources,
                        deleted: true,
                    });
                    WriteOutcome::Deleted
                }
            },
        }
    }
}

pub struct SnapshotStore {
    inner: Mutex<StoreInner>,
    max_conflict_retries: usize,
}

impl SnapshotStore {
    pub fn new(max_conflict_retries: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_conflict_retries: max_conflict_retries.max(1),
        }
    }

    pub async fn load(&self, key: &str) -> Option<Arc<Resources>> {
        let inner = self.inner.lock().await;
        inner.entries.get(key).map(|entry| entry.resources.clone())
    }

    pub async fn load_versioned(&self, key: &str) -> Option<Versioned> {
        let inner = self.inner.lock().await;
        inner.entries.get(key).map(|entry| Versioned {
            revision: entry.revision,
            resources: entry.resources.clone(),
        })
    }

    /// Every stored snapshot, read under one lock.
    pub async fn entries(&self) -> Vec<(String, Arc<Resources>)> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.resources.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Replaces the value for `key`. Equal values are not re-delivered.
    pub async fn store(&self, key: &str, resources: Resources) -> WriteOutcome {
        let mut inner = self.inner.lock().await;
        inner.apply(key, Mutation::Store(resources))
    }

    pub async fn delete(&self, key: &str) -> WriteOutcome {
        let mut inner = self.inner.lock().await;
        inner.apply(key, Mutation::Delete)
    }

    /// Applies `mutation` only if the entry still has the `expected` revision (`None` meaning
    /// the entry must be absent).
    pub async fn compare_and_store(
        &self,
        key: &str,
        expected: Option<Revision>,
        mutation: Mutation,
    ) -> Result<WriteOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let found = inner.entries.get(key).map(|entry| entry.revision);
        if found != expected {
            record_write_conflict(key);
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }

        Ok(inner.apply(key, mutation))
    }

    /// Optimistic read-modify-write: `f` receives the current value and is re-run against a
    /// fresh read whenever another writer got in between.
    pub async fn update<F>(&self, key: &str, mut f: F) -> Result<WriteOutcome, StoreError>
    where
        F: FnMut(Option<&Resources>) -> Mutation,
    {
        for attempt in 1..=self.max_conflict_retries {
            let current = self.load_versioned(key).await;
            let expected = current.as_ref().map(Versioned::revision);
            let mutation = f(current.as_ref().map(|versioned| versioned.resources.as_ref()));

            if matches!(mutation, Mutation::Keep) {
                return Ok(WriteOutcome::Unchanged);
            }

            match self.compare_and_store(key, expected, mutation).await {
                Ok(outcome) => return Ok(outcome),
                Err(StoreError::Conflict { .. }) => {
                    debug!("Retrying conflicting snapshot update; snapshot.key={key} attempt={attempt}");
                    tokio::task::yield_now().await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(StoreError::RetriesExhausted {
            key: key.to_string(),
            attempts: self.max_conflict_retries,
        })
    }

    /// Streams every current entry followed by all later writes.
    pub async fn subscribe(&self) -> UnboundedReceiverStream<SnapshotUpdate> {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.inner.lock().await;

        for (key, entry) in &inner.entries {
            let _ = tx.send(SnapshotUpdate {
                key: key.clone(),
                resources: entry.resources.clone(),
                deleted: false,
            });
        }
        inner.subscribers.push(tx);

        UnboundedReceiverStream::new(rx)
    }
}
