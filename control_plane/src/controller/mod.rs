//! Wires watch notifications to the per-kind work queues and runs the reconcile workers.

mod instrumentation;

use self::instrumentation::{
    record_reconcile_dropped, record_reconcile_failed, record_reconcile_succeeded,
};
use crate::kubernetes::objects::{ObjectRef, WatchedKind};
use crate::kubernetes::state::ClusterState;
use crate::options::Options;
use crate::queue::{Backoff, WorkQueue};
use crate::reconcilers::{Context, ReconcileError, Requeue, reconcile};
use crate::status::{StatusSynchronizer, StatusWriter};
use crate::store::SnapshotStore;
use futures::FutureExt;
use futures::future::BoxFuture;
use getset::{CopyGetters, Getters};
use portico_core::continue_until_cancelled;
use portico_core::sync::signal::{Receiver, Sender, signal};
use portico_core::task::Builder as TaskBuilder;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

/// An observed create, update or delete that is worth a reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct Notification {
    #[getset(get = "pub")]
    object: ObjectRef,

    #[getset(get_copy = "pub")]
    deleted: bool,
}

impl Notification {
    pub fn applied(object: ObjectRef) -> Self {
        Self {
            object,
            deleted: false,
        }
    }

    pub fn removed(object: ObjectRef) -> Self {
        Self {
            object,
            deleted: true,
        }
    }
}

/// One work queue per watched kind.
pub struct Queues {
    queues: HashMap<WatchedKind, Arc<WorkQueue<ObjectRef>>>,
}

impl Queues {
    pub fn new(options: &Options, shutdown: &CancellationToken) -> Self {
        let backoff = Backoff::new(options.retry_backoff_base(), options.retry_backoff_max());
        let queues = WatchedKind::iter()
            .map(|kind| {
                let queue = WorkQueue::new(
                    kind.into(),
                    options.queue_capacity(),
                    backoff,
                    shutdown.child_token(),
                );
                (kind, queue)
            })
            .collect();

        Self { queues }
    }

    pub fn queue(&self, kind: WatchedKind) -> Option<&Arc<WorkQueue<ObjectRef>>> {
        self.queues.get(&kind)
    }

    /// Queues `key` from a watch, waiting for capacity.
    pub async fn add(&self, key: ObjectRef) -> bool {
        match self.queue(key.kind()) {
            Some(queue) => queue.add(key).await,
            None => false,
        }
    }

    /// Queues `key` from a reconciler, never waiting for capacity.
    pub async fn requeue(&self, key: ObjectRef) {
        if let Some(queue) = self.queue(key.kind()) {
            queue.requeue(key).await;
        }
    }

    /// Keys waiting across every queue.
    pub async fn len(&self) -> usize {
        let mut len = 0;
        for queue in self.queues.values() {
            len += queue.len().await;
        }
        len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn shutdown(&self) {
        for queue in self.queues.values() {
            queue.shutdown();
        }
    }
}

#[derive(TypedBuilder)]
pub struct ControllerParams {
    options: Arc<Options>,
    state: Arc<ClusterState>,
    store: Arc<SnapshotStore>,
    status_writer: Arc<dyn StatusWriter>,
    shutdown: CancellationToken,
}

/// Owns the queues and the reconcile context. Workers start reconciling once every kind
/// reported its initial list.
pub struct Controller {
    context: Context,
    queues: Arc<Queues>,
    synced_tx: Sender<BTreeSet<WatchedKind>>,
    synced_rx: Receiver<BTreeSet<WatchedKind>>,
    shutdown: CancellationToken,
}

impl Controller {
    pub fn new(params: ControllerParams) -> Self {
        let queues = Arc::new(Queues::new(&params.options, &params.shutdown));
        let status = Arc::new(StatusSynchronizer::new(params.status_writer));
        let context = Context::new(
            params.options,
            params.state,
            params.store,
            status,
            queues.clone(),
        );
        let (synced_tx, synced_rx) = signal("synced_kinds");

        Self {
            context,
            queues,
            synced_tx,
            synced_rx,
            shutdown: params.shutdown,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn queues(&self) -> &Arc<Queues> {
        &self.queues
    }

    /// Queues the object behind `notification` for a reconcile.
    pub async fn notify(&self, notification: Notification) -> bool {
        debug!(
            "Received notification; object.ref={} object.deleted={}",
            notification.object(),
            notification.deleted()
        );

        // Workers wait for the initial lists, so those cannot wait for capacity
        if self.is_synced().await {
            self.queues.add(notification.object).await
        } else {
            self.queues.requeue(notification.object).await;
            true
        }
    }

    /// Records that the cache of `kind` holds a complete list.
    pub async fn mark_synced(&self, kind: WatchedKind) {
        let changed = self
            .synced_tx
            .modify(|synced| {
                let mut synced = synced.unwrap_or_default();
                synced.insert(kind);
                Some(synced)
            })
            .await;

        if changed {
            info!("Initial list complete; kind={kind}");
        }
    }

    pub async fn is_synced(&self) -> bool {
        self.synced_rx
            .get()
            .await
            .as_ref()
            .is_some_and(all_kinds_synced)
    }

    /// Spawns `workers_per_kind` workers for every kind.
    pub fn spawn_workers(&self, tasks: &TaskBuilder) {
        let workers = self.context.options().workers_per_kind().max(1);
        let max_invariant_retries = self.context.options().max_invariant_retries();

        for kind in WatchedKind::iter() {
            let Some(queue) = self.queues.queue(kind) else {
                continue;
            };

            for _ in 0..workers {
                let context = self.context.clone();
                let queue = queue.clone();
                let synced = self.synced_rx.clone();
                let shutdown = self.shutdown.clone();

                tasks.new_task(kind.into()).spawn(async move {
                    if wait_for_sync(synced, shutdown).await {
                        run_worker(context, queue, max_invariant_retries).await;
                    }
                });
            }
        }

        let queues = self.queues.clone();
        tasks.new_task("queues").spawn_on_shutdown(async move {
            queues.shutdown();
        });
    }
}

fn all_kinds_synced(kinds: &BTreeSet<WatchedKind>) -> bool {
    kinds.len() == WatchedKind::iter().count()
}

/// Resolves to `true` once every kind is synced, or `false` on shutdown.
fn wait_for_sync(
    synced: Receiver<BTreeSet<WatchedKind>>,
    shutdown: CancellationToken,
) -> BoxFuture<'static, bool> {
    async move {
        loop {
            if synced.get().await.as_ref().is_some_and(all_kinds_synced) {
                return true;
            }
            continue_until_cancelled!(shutdown, synced.changed());
        }
        false
    }
    .boxed()
}

/// Processes keys until the queue shuts down.
pub fn run_worker(
    context: Context,
    queue: Arc<WorkQueue<ObjectRef>>,
    max_invariant_retries: u32,
) -> BoxFuture<'static, ()> {
    async move {
        while let Some(key) = queue.get().await {
            let result = reconcile(&context, &key).await;
            handle_result(queue.clone(), key.clone(), result, max_invariant_retries).await;
            queue.done(&key).await;
        }

        debug!("Worker stopped; queue.name={}", queue.name());
    }
    .boxed()
}

async fn handle_result(
    queue: Arc<WorkQueue<ObjectRef>>,
    key: ObjectRef,
    result: Result<Requeue, ReconcileError>,
    max_invariant_retries: u32,
) {
    let kind = key.kind();

    match result {
        Ok(requeue) => {
            record_reconcile_succeeded(kind);
            queue.forget(&key).await;
            if let Requeue::After(delay) = requeue {
                queue.add_after(key, delay);
            }
        }
        Err(err @ ReconcileError::Conflict(_)) => {
            record_reconcile_failed(kind, "conflict");
            debug!("Reconcile conflicted, retrying; object.ref={key} error={err}");
            queue.requeue_after_failure(key).await;
        }
        Err(err @ ReconcileError::Transient(_)) => {
            record_reconcile_failed(kind, "transient");
            warn!("Reconcile failed, retrying; object.ref={key} error={err}");
            queue.requeue_after_failure(key).await;
        }
        Err(err @ ReconcileError::Invariant(_)) => {
            record_reconcile_failed(kind, "invariant");
            if queue.failures(&key).await >= max_invariant_retries {
                record_reconcile_dropped(kind);
                error!("Giving up on object after repeated invariant violations; object.ref={key} error={err}");
                queue.forget(&key).await;
            } else {
                error!("Invariant violated during reconcile; object.ref={key} error={err}");
                queue.requeue_after_failure(key).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MockStatusWriter;
    use std::time::Duration;
    use tokio::time::timeout;

    fn controller(shutdown: &CancellationToken) -> Controller {
        Controller::new(
            ControllerParams::builder()
                .options(Arc::new(Options::default()))
                .state(Arc::new(ClusterState::default()))
                .store(Arc::new(SnapshotStore::new(3)))
                .status_writer(Arc::new(MockStatusWriter::new()))
                .shutdown(shutdown.clone())
                .build(),
        )
    }

    #[tokio::test]
    async fn test_workers_wait_for_every_kind() {
        let tasks = TaskBuilder::default();
        let controller = controller(&tasks.shutdown_token());
        controller.spawn_workers(&tasks);

        let gateway = ObjectRef::namespaced(WatchedKind::Gateway, "ns1", "gw1");
        controller.notify(Notification::applied(gateway)).await;
        for kind in WatchedKind::iter().skip(1) {
            controller.mark_synced(kind).await;
        }
        assert!(!controller.is_synced().await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.queues().len().await, 1);

        controller.mark_synced(WatchedKind::GatewayClass).await;
        assert!(controller.is_synced().await);
        let drained = timeout(Duration::from_secs(1), async {
            while !controller.queues().is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(drained.is_ok());

        tasks.shutdown();
        assert!(timeout(Duration::from_secs(1), tasks.join_all()).await.is_ok());
    }

    #[tokio::test]
    async fn test_workers_stop_on_shutdown_before_sync() {
        let tasks = TaskBuilder::default();
        let controller = controller(&tasks.shutdown_token());
        controller.spawn_workers(&tasks);

        tasks.shutdown();
        assert!(timeout(Duration::from_secs(1), tasks.join_all()).await.is_ok());
    }
}
