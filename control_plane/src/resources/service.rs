use crate::kubernetes::objects::{ObjectRef, ObjectRefError, WatchedKind};
use getset::{CopyGetters, Getters};
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::ResourceExt;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ServicePort {
    #[getset(get = "pub")]
    name: Option<String>,

    #[getset(get_copy = "pub")]
    port: i32,

    #[getset(get = "pub")]
    protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct ServiceRecord {
    #[getset(get = "pub")]
    key: ObjectRef,

    #[getset(get = "pub")]
    cluster_ip: Option<String>,

    #[getset(get = "pub")]
    ports: Vec<ServicePort>,
}

impl ServiceRecord {
    pub fn from_service(service: &Service) -> Result<Self, ObjectRefError> {
        let key = ObjectRef::for_object(WatchedKind::Service, service)?;
        let spec = service.spec.clone().unwrap_or_default();

        Ok(Self {
            key,
            cluster_ip: spec.cluster_ip,
            ports: spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|port| ServicePort {
                    name: port.name,
                    port: port.port,
                    protocol: port.protocol.unwrap_or_else(|| "TCP".to_string()),
                })
                .collect(),
        })
    }

    pub fn namespace(&self) -> &str {
        self.key.namespace_or_default()
    }

    #[cfg(test)]
    pub fn for_test(key: ObjectRef) -> Self {
        Self {
            key,
            cluster_ip: None,
            ports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct NamespaceRecord {
    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    labels: BTreeMap<String, String>,
}

impl NamespaceRecord {
    /// Record for a namespace that has not been observed (yet).
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn from_namespace(namespace: &Namespace) -> Self {
        Self {
            name: namespace.name_any(),
            labels: namespace.labels().clone(),
        }
    }

    #[cfg(test)]
    pub fn from_labels<const N: usize>(name: &str, labels: [(&str, &str); N]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }
}
