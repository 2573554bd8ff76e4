//! Per-kind reconcilers. Each one recomputes the snapshot slices one object can affect from
//! the cluster caches, writes them through the store and syncs the object's status.

mod gateway;
mod gateway_class;
mod routes;
mod services;

use crate::controller::Queues;
use crate::kubernetes::objects::{ObjectRef, WatchedKind};
use crate::kubernetes::state::ClusterState;
use crate::options::Options;
use crate::resources::{RecordError, Resources};
use crate::status::{StatusSynchronizer, WriteError};
use crate::store::{SnapshotStore, StoreError};
use futures::FutureExt;
use futures::future::BoxFuture;
use getset::Getters;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug_span};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A write lost against a concurrent change; retried from a fresh read.
    #[error("Conflicting write: {0}")]
    Conflict(String),
    /// Cluster I/O failed; retried with backoff.
    #[error("Transient failure: {0}")]
    Transient(String),
    /// The cached state contradicts itself; retried a bounded number of times.
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl From<WriteError> for ReconcileError {
    fn from(err: WriteError) -> Self {
        match err {
            // The deletion notification follows, retrying re-reads the cache
            WriteError::Conflict(_) | WriteError::NotFound(_) => Self::Conflict(err.to_string()),
            WriteError::Transient { .. } => Self::Transient(err.to_string()),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl From<RecordError> for ReconcileError {
    fn from(err: RecordError) -> Self {
        Self::Invariant(err.to_string())
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Invariant(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Requeue {
    #[default]
    Done,
    After(Duration),
}

/// Everything a reconciler reads from or writes to.
#[derive(Clone, Getters)]
pub struct Context {
    #[getset(get = "pub")]
    options: Arc<Options>,

    #[getset(get = "pub")]
    state: Arc<ClusterState>,

    #[getset(get = "pub")]
    store: Arc<SnapshotStore>,

    #[getset(get = "pub")]
    status: Arc<StatusSynchronizer>,

    queues: Arc<Queues>,
}

impl Context {
    pub fn new(
        options: Arc<Options>,
        state: Arc<ClusterState>,
        store: Arc<SnapshotStore>,
        status: Arc<StatusSynchronizer>,
        queues: Arc<Queues>,
    ) -> Self {
        Self {
            options,
            state,
            store,
            status,
            queues,
        }
    }

    /// The caches, as the source for records materialized into snapshots.
    pub fn records(&self) -> &ClusterState {
        &self.state
    }

    pub async fn enqueue(&self, key: ObjectRef) {
        self.queues.requeue(key).await;
    }

    pub async fn enqueue_all<I: IntoIterator<Item = ObjectRef>>(&self, keys: I) {
        let keys = keys.into_iter().collect_vec();
        for key in keys {
            self.enqueue(key).await;
        }
    }

    /// Whether the cached GatewayClass `name` is bound to this controller.
    pub fn owns_class(&self, name: &str) -> bool {
        self.state
            .gateway_classes()
            .get(&ObjectRef::cluster_scoped(WatchedKind::GatewayClass, name))
            .is_some_and(|class| &class.spec.controller_name == self.options.controller_name())
    }

    /// Snapshot keys whose value satisfies `predicate`.
    pub async fn classes_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&Resources) -> bool,
    {
        let snapshots = self.store.entries().await;
        snapshots
            .into_iter()
            .filter_map(|(key, resources)| predicate(&resources).then_some(key))
            .collect()
    }
}

/// Reconciles the object behind `key`. Boxed so worker tasks only hold a `Send` trait object.
pub fn reconcile<'a>(
    ctx: &'a Context,
    key: &'a ObjectRef,
) -> BoxFuture<'a, Result<Requeue, ReconcileError>> {
    let span = debug_span!("reconcile", "object.ref" = %key);
    async move {
        match key.kind() {
            WatchedKind::GatewayClass => gateway_class::reconcile(ctx, key).await,
            WatchedKind::Gateway => gateway::reconcile(ctx, key).await,
            WatchedKind::HTTPRoute | WatchedKind::TLSRoute => routes::reconcile(ctx, key).await,
            WatchedKind::Service => services::reconcile_service(ctx, key).await,
            WatchedKind::Namespace => services::reconcile_namespace(ctx, key).await,
            WatchedKind::Deployment => services::reconcile_deployment(ctx, key).await,
        }
    }
    .instrument(span)
    .boxed()
}
