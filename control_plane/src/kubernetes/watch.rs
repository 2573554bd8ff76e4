use crate::controller::{Controller, Notification};
use crate::kubernetes::objects::{ObjectCache, ObjectRef, ObjectRefError};
use crate::kubernetes::state::ClusterState;
use futures::StreamExt;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{Config, Event, watcher};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Picks the cache of one kind out of the cluster state.
pub type CacheOf<K> = fn(&ClusterState) -> &ObjectCache<K>;

/// Stores `object` in its cache and notifies the controller if the kind's change filter
/// admits the update. Returns whether a notification was sent.
pub async fn observe_applied<K: Resource>(
    controller: &Controller,
    cache: &ObjectCache<K>,
    object: K,
) -> Result<bool, ObjectRefError> {
    let (object_ref, change) = cache.apply(object)?;
    let filter = controller.context().options().change_filter(cache.kind());

    if !filter.admits(change) {
        trace!("Ignoring update; object.ref={object_ref} change={change:?}");
        return Ok(false);
    }

    Ok(controller.notify(Notification::applied(object_ref)).await)
}

/// Drops `object_ref` from its cache and notifies the controller if it was cached.
pub async fn observe_deleted<K: Resource>(
    controller: &Controller,
    cache: &ObjectCache<K>,
    object_ref: &ObjectRef,
) -> bool {
    if cache.remove(object_ref).is_none() {
        return false;
    }

    controller
        .notify(Notification::removed(object_ref.clone()))
        .await
}

/// Mirrors every object of one kind into its cache until shutdown. Relists prune objects that
/// disappeared while the watch was down.
pub async fn watch_objects<K>(
    api: Api<K>,
    cache_of: CacheOf<K>,
    controller: Arc<Controller>,
    shutdown: CancellationToken,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let cache = cache_of(controller.context().state());
    let kind = cache.kind();
    let mut events = pin!(watcher(api, Config::default()).default_backoff());
    let mut seen = HashSet::new();

    debug!("Watching objects; kind={kind}");

    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.next() => event,
        };

        let Some(event) = event else {
            warn!("Watch stream ended; kind={kind}");
            break;
        };

        match event {
            Ok(Event::Init) => {
                debug!("Relisting; kind={kind}");
                seen.clear();
            }
            Ok(Event::InitApply(object)) => {
                match ObjectRef::for_object(kind, &object) {
                    Ok(object_ref) => {
                        seen.insert(object_ref);
                    }
                    Err(err) => {
                        warn!("Skipping malformed object; kind={kind} error={err}");
                        continue;
                    }
                }
                if let Err(err) = observe_applied(&controller, cache, object).await {
                    warn!("Skipping malformed object; kind={kind} error={err}");
                }
            }
            Ok(Event::InitDone) => {
                for object_ref in cache.retain_only(&seen) {
                    debug!("Object disappeared during relist; object.ref={object_ref}");
                    controller.notify(Notification::removed(object_ref)).await;
                }
                seen.clear();
                controller.mark_synced(kind).await;
            }
            Ok(Event::Apply(object)) => {
                if let Err(err) = observe_applied(&controller, cache, object).await {
                    warn!("Skipping malformed object; kind={kind} error={err}");
                }
            }
            Ok(Event::Delete(object)) => match ObjectRef::for_object(kind, &object) {
                Ok(object_ref) => {
                    observe_deleted(&controller, cache, &object_ref).await;
                }
                Err(err) => warn!("Skipping malformed object; kind={kind} error={err}"),
            },
            Err(err) => warn!("Watch failed, backing off; kind={kind} error={err}"),
        }
    }

    debug!("Stopped watching objects; kind={kind}");
}
