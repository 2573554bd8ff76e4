//! The per-GatewayClass snapshot unit handed to the translator.

mod gateway;
mod route;
mod service;

pub use gateway::*;
pub use route::*;
pub use service::*;

use crate::kubernetes::objects::ObjectRef;
use crate::references::ServiceReferences;
use getset::Getters;
use std::collections::BTreeSet;

/// Read access to the current projections of cluster objects, used when a record has to be
/// (re)materialized inside a snapshot.
pub trait RecordSource {
    fn service(&self, key: &ObjectRef) -> Option<ServiceRecord>;

    fn namespace(&self, name: &str) -> Option<NamespaceRecord>;
}

/// Everything the translator needs for one GatewayClass. Each list is kept sorted by identity
/// so that equal cluster states always produce equal values.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct Resources {
    #[getset(get = "pub")]
    gateway_class: GatewayClassRecord,

    #[getset(get = "pub")]
    gateways: Vec<GatewayRecord>,

    #[getset(get = "pub")]
    routes: Vec<RouteRecord>,

    #[getset(get = "pub")]
    services: Vec<ServiceRecord>,

    #[getset(get = "pub")]
    namespaces: Vec<NamespaceRecord>,

    #[getset(get = "pub")]
    service_references: ServiceReferences,
}

impl Resources {
    pub fn new(gateway_class: GatewayClassRecord) -> Self {
        Self {
            gateway_class,
            gateways: Vec::new(),
            routes: Vec::new(),
            services: Vec::new(),
            namespaces: Vec::new(),
            service_references: ServiceReferences::default(),
        }
    }

    pub fn set_gateway_class(&mut self, gateway_class: GatewayClassRecord) {
        self.gateway_class = gateway_class;
    }

    pub fn gateway(&self, key: &ObjectRef) -> Option<&GatewayRecord> {
        find(&self.gateways, key, GatewayRecord::key)
    }

    pub fn upsert_gateway(&mut self, gateway: GatewayRecord) {
        upsert(&mut self.gateways, gateway, GatewayRecord::key);
    }

    pub fn remove_gateway(&mut self, key: &ObjectRef) -> Option<GatewayRecord> {
        remove(&mut self.gateways, key, GatewayRecord::key)
    }

    pub fn route(&self, key: &ObjectRef) -> Option<&RouteRecord> {
        find(&self.routes, key, RouteRecord::key)
    }

    pub(crate) fn upsert_route(&mut self, route: RouteRecord) {
        upsert(&mut self.routes, route, RouteRecord::key);
    }

    pub(crate) fn remove_route(&mut self, key: &ObjectRef) -> Option<RouteRecord> {
        remove(&mut self.routes, key, RouteRecord::key)
    }

    pub fn service(&self, key: &ObjectRef) -> Option<&ServiceRecord> {
        find(&self.services, key, ServiceRecord::key)
    }

    pub(crate) fn upsert_service(&mut self, service: ServiceRecord) {
        upsert(&mut self.services, service, ServiceRecord::key);
    }

    pub(crate) fn remove_service(&mut self, key: &ObjectRef) -> Option<ServiceRecord> {
        remove(&mut self.services, key, ServiceRecord::key)
    }

    pub(crate) fn service_references_mut(&mut self) -> &mut ServiceReferences {
        &mut self.service_references
    }

    /// Replaces the projection of a referenced Service. Unreferenced Services are never added.
    pub fn refresh_service(&mut self, key: &ObjectRef, service: Option<ServiceRecord>) {
        if !self.service_references.is_referenced(key) {
            return;
        }

        match service {
            Some(service) => self.upsert_service(service),
            None => {
                self.remove_service(key);
            }
        }
    }

    /// Replaces the projection of a namespace if it is a member of this snapshot.
    pub fn refresh_namespace(&mut self, namespace: NamespaceRecord) {
        if let Ok(index) = self
            .namespaces
            .binary_search_by(|existing| existing.name().cmp(namespace.name()))
        {
            self.namespaces[index] = namespace;
        }
    }

    /// Names of every namespace holding a Gateway, Route or Service of this snapshot.
    pub fn member_namespaces(&self) -> BTreeSet<String> {
        self.gateways
            .iter()
            .map(GatewayRecord::namespace)
            .chain(self.routes.iter().map(RouteRecord::namespace))
            .chain(self.services.iter().map(ServiceRecord::namespace))
            .map(ToString::to_string)
            .collect()
    }

    /// Recomputes namespace membership. Existing records are reused, new members are looked up
    /// in `source` and fall back to a name-only record.
    pub fn sync_namespaces(&mut self, source: &impl RecordSource) {
        let previous = std::mem::take(&mut self.namespaces);

        self.namespaces = self
            .member_namespaces()
            .into_iter()
            .map(|name| {
                previous
                    .iter()
                    .find(|record| record.name() == &name)
                    .cloned()
                    .or_else(|| source.namespace(&name))
                    .unwrap_or_else(|| NamespaceRecord::named(name))
            })
            .collect();
    }
}

fn find<'a, T>(items: &'a [T], key: &ObjectRef, key_of: fn(&T) -> &ObjectRef) -> Option<&'a T> {
    items
        .binary_search_by(|item| key_of(item).cmp(key))
        .ok()
        .map(|index| &items[index])
}

fn upsert<T>(items: &mut Vec<T>, item: T, key_of: fn(&T) -> &ObjectRef) {
    match items.binary_search_by(|existing| key_of(existing).cmp(key_of(&item))) {
        Ok(index) => items[index] = item,
        Err(index) => items.insert(index, item),
    }
}

fn remove<T>(items: &mut Vec<T>, key: &ObjectRef, key_of: fn(&T) -> &ObjectRef) -> Option<T> {
    items
        .binary_search_by(|item| key_of(item).cmp(key))
        .ok()
        .map(|index| items.remove(index))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::kubernetes::objects::WatchedKind;

    #[test]
    fn test_upsert_keeps_lists_sorted() {
        let mut resources = Resources::new(class_record("gc1"));
        resources.upsert_service(service_record("ns2", "b"));
        resources.upsert_service(service_record("ns1", "z"));
        resources.upsert_service(service_record("ns1", "a"));
        resources.upsert_service(service_record("ns1", "a"));

        let keys: Vec<String> = resources
            .services()
            .iter()
            .map(|service| service.key().to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["Service/ns1/a", "Service/ns1/z", "Service/ns2/b"]
        );
    }

    #[test]
    fn test_sync_namespaces_tracks_members() {
        let mut source = StaticSource::default();
        source.namespaces.insert(
            "ns1".to_string(),
            NamespaceRecord::from_labels("ns1", [("team", "edge")]),
        );

        let mut resources = Resources::new(class_record("gc1"));
        resources.upsert_service(service_record("ns1", "svc1"));
        resources.upsert_service(service_record("ns2", "svc2"));
        resources.sync_namespaces(&source);

        assert_eq!(resources.namespaces().len(), 2);
        assert_eq!(
            resources.namespaces()[0].labels().get("team").map(String::as_str),
            Some("edge")
        );
        assert!(resources.namespaces()[1].labels().is_empty());

        resources.remove_service(&ObjectRef::namespaced(WatchedKind::Service, "ns2", "svc2"));
        resources.sync_namespaces(&source);
        assert_eq!(resources.namespaces().len(), 1);
        assert_eq!(resources.namespaces()[0].name(), "ns1");
    }

    #[test]
    fn test_refresh_service_ignores_unreferenced() {
        let mut resources = Resources::new(class_record("gc1"));
        let service = service_record("ns1", "svc1");

        resources.refresh_service(service.key(), Some(service.clone()));
        assert!(resources.services().is_empty());
    }
}
