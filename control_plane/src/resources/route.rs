use crate::kubernetes::objects::{ObjectRef, WatchedKind};
use crate::kubernetes::specs::{BackendRefView, ParentRefView, RouteSpecView};
use getset::{CopyGetters, Getters};
use portico_api::constants::GATEWAY_API_GROUP;
use serde_json::Value;
use std::collections::BTreeSet;

/// A parentRef that points at a Gateway.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ParentRef {
    #[getset(get = "pub")]
    gateway: ObjectRef,

    #[getset(get = "pub")]
    section_name: Option<String>,

    #[getset(get_copy = "pub")]
    port: Option<i32>,
}

impl ParentRef {
    pub fn new(gateway: ObjectRef, section_name: Option<&str>) -> Self {
        Self {
            gateway,
            section_name: section_name.map(ToString::to_string),
            port: None,
        }
    }

    /// `None` when the reference targets something other than a Gateway.
    pub fn from_view(route_namespace: &str, view: &ParentRefView) -> Option<Self> {
        let group_matches = view
            .group
            .as_deref()
            .is_none_or(|group| group == GATEWAY_API_GROUP);
        let kind_matches = view.kind.as_deref().is_none_or(|kind| kind == "Gateway");
        if !group_matches || !kind_matches || view.name.is_empty() {
            return None;
        }

        let namespace = view.namespace.as_deref().unwrap_or(route_namespace);
        Some(Self {
            gateway: ObjectRef::namespaced(WatchedKind::Gateway, namespace, &view.name),
            section_name: view.section_name.clone(),
            port: view.port,
        })
    }
}

/// A backendRef that points at a Service.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct BackendRef {
    #[getset(get = "pub")]
    service: ObjectRef,

    #[getset(get_copy = "pub")]
    port: Option<i32>,

    #[getset(get_copy = "pub")]
    weight: Option<i32>,
}

impl BackendRef {
    pub fn new(service: ObjectRef, port: Option<i32>) -> Self {
        Self {
            service,
            port,
            weight: None,
        }
    }

    /// `None` for non-Service backends; those are reported as `InvalidKind` on the Route.
    pub fn from_view(route_namespace: &str, view: &BackendRefView) -> Option<Self> {
        if !is_service_backend(view) {
            return None;
        }

        let namespace = view.namespace.as_deref().unwrap_or(route_namespace);
        Some(Self {
            service: ObjectRef::namespaced(WatchedKind::Service, namespace, &view.name),
            port: view.port,
            weight: view.weight,
        })
    }
}

pub fn is_service_backend(view: &BackendRefView) -> bool {
    let core_group = view.group.as_deref().is_none_or(str::is_empty);
    let service_kind = view.kind.as_deref().is_none_or(|kind| kind == "Service");
    core_group && service_kind && !view.name.is_empty()
}

#[derive(Debug, Clone, PartialEq, Getters)]
pub struct HttpRouteRule {
    #[getset(get = "pub")]
    matches: Vec<Value>,

    #[getset(get = "pub")]
    filters: Vec<Value>,

    #[getset(get = "pub")]
    backend_refs: Vec<BackendRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct TlsRouteRule {
    #[getset(get = "pub")]
    backend_refs: Vec<BackendRef>,
}

/// Kind-specific payload of a Route.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteRules {
    Http(Vec<HttpRouteRule>),
    Tls(Vec<TlsRouteRule>),
}

impl RouteRules {
    pub fn kind(&self) -> WatchedKind {
        match self {
            Self::Http(_) => WatchedKind::HTTPRoute,
            Self::Tls(_) => WatchedKind::TLSRoute,
        }
    }

    pub fn backend_refs(&self) -> Box<dyn Iterator<Item = &BackendRef> + '_> {
        match self {
            Self::Http(rules) => Box::new(rules.iter().flat_map(|rule| rule.backend_refs.iter())),
            Self::Tls(rules) => Box::new(rules.iter().flat_map(|rule| rule.backend_refs.iter())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Getters)]
pub struct RouteRecord {
    #[getset(get = "pub")]
    key: ObjectRef,

    #[getset(get = "pub")]
    parent_refs: Vec<ParentRef>,

    #[getset(get = "pub")]
    hostnames: Vec<String>,

    #[getset(get = "pub")]
    rules: RouteRules,
}

impl RouteRecord {
    pub fn from_view(key: ObjectRef, view: &RouteSpecView) -> Self {
        let namespace = key.namespace_or_default().to_string();

        let parent_refs = view
            .parent_refs
            .iter()
            .filter_map(|parent| ParentRef::from_view(&namespace, parent))
            .collect();

        let backends = |refs: &[BackendRefView]| -> Vec<BackendRef> {
            refs.iter()
                .filter_map(|backend| BackendRef::from_view(&namespace, backend))
                .collect()
        };

        let rules = match key.kind() {
            WatchedKind::TLSRoute => RouteRules::Tls(
                view.rules
                    .iter()
                    .map(|rule| TlsRouteRule {
                        backend_refs: backends(&rule.backend_refs),
                    })
                    .collect(),
            ),
            _ => RouteRules::Http(
                view.rules
                    .iter()
                    .map(|rule| HttpRouteRule {
                        matches: rule.matches.clone(),
                        filters: rule.filters.clone(),
                        backend_refs: backends(&rule.backend_refs),
                    })
                    .collect(),
            ),
        };

        Self {
            key,
            parent_refs,
            hostnames: view.hostnames.clone(),
            rules,
        }
    }

    pub fn kind(&self) -> WatchedKind {
        self.rules.kind()
    }

    pub fn namespace(&self) -> &str {
        self.key.namespace_or_default()
    }

    /// Distinct Services referenced by any rule.
    pub fn backend_services(&self) -> BTreeSet<ObjectRef> {
        self.rules
            .backend_refs()
            .map(|backend| backend.service.clone())
            .collect()
    }

    pub fn references_gateway(&self, gateway: &ObjectRef) -> bool {
        self.parent_refs
            .iter()
            .any(|parent| &parent.gateway == gateway)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::specs::project_value;
    use assertables::assert_ok;
    use serde_json::json;

    fn view(value: Value) -> RouteSpecView {
        assert_ok!(project_value(value))
    }

    #[test]
    fn test_backend_refs_default_to_route_namespace() {
        let key = ObjectRef::namespaced(WatchedKind::HTTPRoute, "ns1", "r1");
        let record = RouteRecord::from_view(
            key,
            &view(json!({
                "parentRefs": [{ "name": "gw1" }],
                "rules": [
                    { "backendRefs": [{ "name": "svc1", "port": 80 }, { "name": "svc2", "namespace": "other" }] },
                    { "backendRefs": [{ "name": "svc1", "port": 8080 }] }
                ]
            })),
        );

        let services: Vec<String> = record
            .backend_services()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(services, vec!["Service/ns1/svc1", "Service/other/svc2"]);
        assert_eq!(
            record.parent_refs()[0].gateway().to_string(),
            "Gateway/ns1/gw1"
        );
    }

    #[test]
    fn test_non_service_backends_are_skipped() {
        let key = ObjectRef::namespaced(WatchedKind::TLSRoute, "ns1", "t1");
        let record = RouteRecord::from_view(
            key,
            &view(json!({
                "rules": [{ "backendRefs": [
                    { "name": "bucket", "group": "storage.example.com", "kind": "Bucket" },
                    { "name": "svc1", "kind": "Service", "port": 443 }
                ]}]
            })),
        );

        assert_eq!(record.kind(), WatchedKind::TLSRoute);
        assert_eq!(record.backend_services().len(), 1);
    }

    #[test]
    fn test_non_gateway_parents_are_skipped() {
        let key = ObjectRef::namespaced(WatchedKind::HTTPRoute, "ns1", "r1");
        let record = RouteRecord::from_view(
            key,
            &view(json!({
                "parentRefs": [
                    { "name": "mesh", "group": "mesh.example.com", "kind": "Mesh" },
                    { "name": "gw1", "sectionName": "http" }
                ]
            })),
        );

        assert_eq!(record.parent_refs().len(), 1);
        assert_eq!(record.parent_refs()[0].section_name().as_deref(), Some("http"));
    }
}
