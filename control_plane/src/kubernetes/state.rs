use crate::kubernetes::objects::{ObjectCache, ObjectRef, WatchedKind};
use crate::kubernetes::specs::{RouteSpecView, project, project_value};
use crate::resources::{NamespaceRecord, RecordSource, ServiceRecord};
use crate::status::Observed;
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_api::apis::standard::gateways::Gateway;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use getset::Getters;
use itertools::Itertools;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::core::DynamicObject;
use serde_json::Value;
use tracing::warn;

/// A Route of any kind, read through its common view.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct RouteObject {
    #[getset(get = "pub")]
    spec: RouteSpecView,

    #[getset(get = "pub")]
    observed: Observed,

    #[getset(get = "pub")]
    deleting: bool,
}

/// Latest observed copy of every watched object, one cache per kind.
#[derive(Getters)]
pub struct ClusterState {
    #[getset(get = "pub")]
    gateway_classes: ObjectCache<GatewayClass>,

    #[getset(get = "pub")]
    gateways: ObjectCache<Gateway>,

    #[getset(get = "pub")]
    http_routes: ObjectCache<HTTPRoute>,

    /// TLSRoute is only served at `v1alpha2`, so it is held untyped.
    #[getset(get = "pub")]
    tls_routes: ObjectCache<DynamicObject>,

    #[getset(get = "pub")]
    services: ObjectCache<Service>,

    #[getset(get = "pub")]
    namespaces: ObjectCache<Namespace>,

    #[getset(get = "pub")]
    deployments: ObjectCache<Deployment>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            gateway_classes: ObjectCache::new(WatchedKind::GatewayClass),
            gateways: ObjectCache::new(WatchedKind::Gateway),
            http_routes: ObjectCache::new(WatchedKind::HTTPRoute),
            tls_routes: ObjectCache::new(WatchedKind::TLSRoute),
            services: ObjectCache::new(WatchedKind::Service),
            namespaces: ObjectCache::new(WatchedKind::Namespace),
            deployments: ObjectCache::new(WatchedKind::Deployment),
        }
    }
}

impl ClusterState {
    pub fn contains(&self, key: &ObjectRef) -> bool {
        match key.kind() {
            WatchedKind::GatewayClass => self.gateway_classes.contains(key),
            WatchedKind::Gateway => self.gateways.contains(key),
            WatchedKind::HTTPRoute => self.http_routes.contains(key),
            WatchedKind::TLSRoute => self.tls_routes.contains(key),
            WatchedKind::Service => self.services.contains(key),
            WatchedKind::Namespace => self.namespaces.contains(key),
            WatchedKind::Deployment => self.deployments.contains(key),
        }
    }

    /// Identities of every cached Route, HTTP and TLS alike.
    pub fn route_keys(&self) -> Vec<ObjectRef> {
        self.http_routes
            .entries()
            .into_iter()
            .map(|(key, _)| key)
            .chain(self.tls_routes.entries().into_iter().map(|(key, _)| key))
            .collect_vec()
    }

    pub fn route(&self, key: &ObjectRef) -> Result<Option<RouteObject>, serde_json::Error> {
        match key.kind() {
            WatchedKind::HTTPRoute => {
                let Some(route) = self.http_routes.get(key) else {
                    return Ok(None);
                };
                Ok(Some(RouteObject {
                    spec: project(&route.spec)?,
                    observed: Observed::of(&*route),
                    deleting: route.metadata.deletion_timestamp.is_some(),
                }))
            }
            WatchedKind::TLSRoute => {
                let Some(route) = self.tls_routes.get(key) else {
                    return Ok(None);
                };
                Ok(Some(RouteObject {
                    spec: project_value(route.data.get("spec").cloned().unwrap_or(Value::Null))?,
                    observed: Observed::of(&*route),
                    deleting: route.metadata.deletion_timestamp.is_some(),
                }))
            }
            _ => Ok(None),
        }
    }
}

impl RecordSource for ClusterState {
    fn service(&self, key: &ObjectRef) -> Option<ServiceRecord> {
        let service = self.services.get(key)?;
        ServiceRecord::from_service(&service)
            .inspect_err(|err| warn!("Skipping malformed Service; object.ref={key} error={err}"))
            .ok()
    }

    fn namespace(&self, name: &str) -> Option<NamespaceRecord> {
        self.namespaces
            .get(&ObjectRef::cluster_scoped(WatchedKind::Namespace, name))
            .map(|namespace| NamespaceRecord::from_namespace(&namespace))
    }
}
