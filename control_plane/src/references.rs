//! Reference-counted cleanup of backend Services.
//!
//! Each snapshot carries an index from Service identity to the Routes referencing it. The
//! index only ever changes inside a snapshot read-modify-write, so whichever writer observes a
//! set dropping to empty is the one that removes the Service, and a conflicting writer
//! recomputes against the index it lost to.

use crate::kubernetes::objects::ObjectRef;
use crate::resources::{RecordSource, Resources, RouteRecord};
use crate::store::{Mutation, SnapshotStore, StoreError, WriteOutcome};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceReferences {
    routes_by_service: BTreeMap<ObjectRef, BTreeSet<ObjectRef>>,
}

impl ServiceReferences {
    pub fn is_referenced(&self, service: &ObjectRef) -> bool {
        self.routes_by_service.contains_key(service)
    }

    pub fn routes_referencing(&self, service: &ObjectRef) -> impl Iterator<Item = &ObjectRef> {
        self.routes_by_service.get(service).into_iter().flatten()
    }

    /// Services `route` is currently counted against.
    pub fn services_of(&self, route: &ObjectRef) -> BTreeSet<ObjectRef> {
        self.routes_by_service
            .iter()
            .filter(|(_, routes)| routes.contains(route))
            .map(|(service, _)| service.clone())
            .collect()
    }

    pub fn services(&self) -> impl Iterator<Item = &ObjectRef> {
        self.routes_by_service.keys()
    }

    /// Returns `true` when `service` went from unreferenced to referenced.
    fn add(&mut self, service: &ObjectRef, route: &ObjectRef) -> bool {
        let routes = self.routes_by_service.entry(service.clone()).or_default();
        let was_empty = routes.is_empty();
        routes.insert(route.clone());
        was_empty
    }

    /// Returns `true` when the last reference to `service` went away.
    fn remove(&mut self, service: &ObjectRef, route: &ObjectRef) -> bool {
        let Some(routes) = self.routes_by_service.get_mut(service) else {
            return false;
        };

        routes.remove(route);
        if routes.is_empty() {
            self.routes_by_service.remove(service);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReferenceDelta {
    /// Services that gained their first reference and were materialized.
    pub added: Vec<ObjectRef>,
    /// Services that lost their last reference and were removed.
    pub removed: Vec<ObjectRef>,
    /// Services that gained their first reference but do not exist (yet).
    pub unresolved: Vec<ObjectRef>,
}

/// Replaces (or with `None` removes) `route` in `resources`, moving its Service references
/// from what the snapshot currently counts to what `route` now references.
pub fn apply_route_change(
    resources: &mut Resources,
    route: &ObjectRef,
    record: Option<RouteRecord>,
    source: &impl RecordSource,
) -> ReferenceDelta {
    let old_backends = resources.service_references().services_of(route);
    let new_backends = record
        .as_ref()
        .map(RouteRecord::backend_services)
        .unwrap_or_default();

    match record {
        Some(record) => resources.upsert_route(record),
        None => {
            resources.remove_route(route);
        }
    }

    let mut delta = ReferenceDelta::default();
    let references = resources.service_references_mut();

    for service in old_backends.difference(&new_backends) {
        if references.remove(service, route) {
            delta.removed.push(service.clone());
        }
    }

    let mut newly_referenced = Vec::new();
    for service in new_backends.difference(&old_backends) {
        if references.add(service, route) {
            newly_referenced.push(service.clone());
        }
    }

    for service in &delta.removed {
        resources.remove_service(service);
    }

    for service in newly_referenced {
        match source.service(&service) {
            Some(record) => {
                resources.upsert_service(record);
                delta.added.push(service);
            }
            None => delta.unresolved.push(service),
        }
    }

    resources.sync_namespaces(source);
    delta
}

/// Applies a Route change to the snapshot of `gateway_class`, retrying on concurrent writes.
/// A missing snapshot is left alone.
pub async fn on_route_changed(
    store: &SnapshotStore,
    gateway_class: &str,
    route: &ObjectRef,
    record: Option<&RouteRecord>,
    source: &impl RecordSource,
) -> Result<WriteOutcome, StoreError> {
    store
        .update(gateway_class, |current| {
            let Some(current) = current else {
                return Mutation::Keep;
            };

            let mut next = current.clone();
            let delta = apply_route_change(&mut next, route, record.cloned(), source);
            if delta != ReferenceDelta::default() {
                debug!(
                    "Service references changed; route.ref={route} gateway_class={gateway_class} added={:?} removed={:?} unresolved={:?}",
                    delta.added, delta.removed, delta.unresolved
                );
            }
            Mutation::Store(next)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::objects::WatchedKind;
    use crate::kubernetes::specs::project_value;
    use crate::resources::fixtures::{StaticSource, class_record, service_record};
    use assertables::{assert_ok, assert_some};
    use serde_json::json;
    use std::sync::Arc;

    fn route(kind: WatchedKind, name: &str, services: &[&str]) -> RouteRecord {
        let backends: Vec<_> = services
            .iter()
            .map(|service| json!({ "name": service, "port": 80 }))
            .collect();
        let view = assert_ok!(project_value(json!({
            "parentRefs": [{ "name": "gw1" }],
            "rules": [{ "backendRefs": backends }]
        })));
        RouteRecord::from_view(ObjectRef::namespaced(kind, "ns1", name), &view)
    }

    fn source(services: &[&str]) -> StaticSource {
        let mut source = StaticSource::default();
        for name in services {
            let record = service_record("ns1", name);
            source.services.insert(record.key().clone(), record);
        }
        source
    }

    fn service_names(resources: &Resources) -> Vec<String> {
        resources
            .services()
            .iter()
            .map(|service| service.key().name().clone())
            .collect()
    }

    #[test]
    fn test_service_removed_with_last_reference() {
        let source = source(&["svc1"]);
        let mut resources = Resources::new(class_record("gc1"));
        let r1 = route(WatchedKind::HTTPRoute, "r1", &["svc1"]);
        let r2 = route(WatchedKind::TLSRoute, "r2", &["svc1"]);

        let delta = apply_route_change(&mut resources, &r1.key().clone(), Some(r1.clone()), &source);
        assert_eq!(delta.added.len(), 1);
        apply_route_change(&mut resources, &r2.key().clone(), Some(r2.clone()), &source);
        assert_eq!(service_names(&resources), vec!["svc1"]);

        let delta = apply_route_change(&mut resources, r1.key(), None, &source);
        assert!(delta.removed.is_empty());
        assert_eq!(service_names(&resources), vec!["svc1"]);

        let delta = apply_route_change(&mut resources, r2.key(), None, &source);
        assert_eq!(delta.removed.len(), 1);
        assert!(resources.services().is_empty());
        assert!(resources.routes().is_empty());
        assert!(resources.namespaces().is_empty());
    }

    #[test]
    fn test_backend_change_moves_references() {
        let source = source(&["svc1", "svc2"]);
        let mut resources = Resources::new(class_record("gc1"));
        let original = route(WatchedKind::HTTPRoute, "r1", &["svc1"]);
        let key = original.key().clone();

        apply_route_change(&mut resources, &key, Some(original), &source);
        let delta = apply_route_change(
            &mut resources,
            &key,
            Some(route(WatchedKind::HTTPRoute, "r1", &["svc2"])),
            &source,
        );

        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(service_names(&resources), vec!["svc2"]);
    }

    #[test]
    fn test_missing_service_is_tolerated() {
        let source = source(&[]);
        let mut resources = Resources::new(class_record("gc1"));
        let r1 = route(WatchedKind::HTTPRoute, "r1", &["ghost"]);
        let key = r1.key().clone();

        let delta = apply_route_change(&mut resources, &key, Some(r1), &source);

        assert_eq!(delta.unresolved.len(), 1);
        assert!(resources.services().is_empty());
        assert!(
            resources
                .service_references()
                .is_referenced(&ObjectRef::namespaced(WatchedKind::Service, "ns1", "ghost"))
        );
        assert_eq!(resources.routes().len(), 1);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_concurrent_route_deletions_remove_service_once() {
        for _ in 0..20 {
            let source = Arc::new(source(&["svc1"]));
            let store = Arc::new(SnapshotStore::new(64));
            let r1 = route(WatchedKind::HTTPRoute, "r1", &["svc1"]);
            let r2 = route(WatchedKind::HTTPRoute, "r2", &["svc1"]);

            let mut resources = Resources::new(class_record("gc1"));
            apply_route_change(&mut resources, &r1.key().clone(), Some(r1.clone()), &*source);
            apply_route_change(&mut resources, &r2.key().clone(), Some(r2.clone()), &*source);
            store.store("gc1", resources).await;

            let tasks: Vec<_> = [r1, r2]
                .into_iter()
                .map(|route| {
                    let store = store.clone();
                    let source = source.clone();
                    tokio::spawn(async move {
                        on_route_changed(&store, "gc1", route.key(), None, &*source).await
                    })
                })
                .collect();

            for task in tasks {
                assert_ok!(assert_ok!(task.await));
            }

            let stored = assert_some!(store.load("gc1").await);
            assert!(stored.services().is_empty());
            assert!(stored.routes().is_empty());
            assert_eq!(stored.service_references(), &ServiceReferences::default());
        }
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_left_alone() {
        let store = SnapshotStore::new(3);
        let r1 = route(WatchedKind::HTTPRoute, "r1", &["svc1"]);

        let outcome = on_route_changed(&store, "gc1", r1.key(), Some(&r1), &source(&["svc1"])).await;
        assert_eq!(assert_ok!(outcome), WriteOutcome::Unchanged);
        assert!(store.is_empty().await);
    }
}
