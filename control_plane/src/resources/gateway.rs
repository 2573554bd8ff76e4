use crate::kubernetes::objects::{ObjectRef, ObjectRefError, WatchedKind};
use crate::kubernetes::specs::{GatewaySpecView, project};
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_api::apis::standard::gateways::Gateway;
use getset::{CopyGetters, Getters};
use kube::ResourceExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid object reference: {0}")]
    ObjectRef(#[from] ObjectRefError),
    #[error("Spec could not be projected: {0}")]
    Spec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct GatewayClassRecord {
    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    controller_name: String,

    #[getset(get_copy = "pub")]
    accepted: bool,

    #[getset(get_copy = "pub")]
    finalized: bool,
}

impl GatewayClassRecord {
    pub fn from_class(gateway_class: &GatewayClass, finalized: bool) -> Self {
        Self {
            name: gateway_class.name_any(),
            controller_name: gateway_class.spec.controller_name.clone(),
            accepted: true,
            finalized,
        }
    }

    #[cfg(test)]
    pub fn for_test(name: &str) -> Self {
        Self {
            name: name.to_string(),
            controller_name: portico_api::constants::GATEWAY_CLASS_CONTROLLER_NAME.to_string(),
            accepted: true,
            finalized: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct Listener {
    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    hostname: Option<String>,

    #[getset(get_copy = "pub")]
    port: i32,

    #[getset(get = "pub")]
    protocol: String,
}

impl Listener {
    pub fn new<S: Into<String>>(name: S, port: i32, protocol: S) -> Self {
        Self {
            name: name.into(),
            hostname: None,
            port,
            protocol: protocol.into(),
        }
    }

    pub fn accepts_route_kind(&self, kind: WatchedKind) -> bool {
        match kind {
            WatchedKind::HTTPRoute => matches!(self.protocol.as_str(), "HTTP" | "HTTPS"),
            WatchedKind::TLSRoute => self.protocol == "TLS",
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters)]
pub struct GatewayAddress {
    #[getset(get = "pub")]
    type_: Option<String>,

    #[getset(get = "pub")]
    value: String,
}

impl GatewayAddress {
    pub fn new<S: Into<String>>(type_: Option<&str>, value: S) -> Self {
        Self {
            type_: type_.map(ToString::to_string),
            value: value.into(),
        }
    }
}

/// What the control plane derived about the Gateway's infrastructure. Independent from the
/// Gateway's own status so writing that status never changes the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters, CopyGetters)]
pub struct GatewayInfraState {
    #[getset(get_copy = "pub")]
    programmed: bool,

    #[getset(get = "pub")]
    addresses: Vec<GatewayAddress>,
}

impl GatewayInfraState {
    pub fn new(programmed: bool, addresses: Vec<GatewayAddress>) -> Self {
        Self {
            programmed,
            addresses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct GatewayRecord {
    #[getset(get = "pub")]
    key: ObjectRef,

    #[getset(get = "pub")]
    gateway_class_name: String,

    #[getset(get = "pub")]
    listeners: Vec<Listener>,

    /// Addresses requested in the spec.
    #[getset(get = "pub")]
    addresses: Vec<GatewayAddress>,

    #[getset(get = "pub")]
    infra: GatewayInfraState,
}

impl GatewayRecord {
    pub fn from_gateway(gateway: &Gateway, infra: GatewayInfraState) -> Result<Self, RecordError> {
        let key = ObjectRef::for_object(WatchedKind::Gateway, gateway)?;
        let view: GatewaySpecView = project(&gateway.spec)?;

        Ok(Self {
            key,
            gateway_class_name: view.gateway_class_name,
            listeners: view
                .listeners
                .into_iter()
                .map(|listener| Listener {
                    name: listener.name,
                    hostname: listener.hostname,
                    port: listener.port,
                    protocol: listener.protocol,
                })
                .collect(),
            addresses: view
                .addresses
                .into_iter()
                .map(|address| GatewayAddress {
                    type_: address.type_,
                    value: address.value,
                })
                .collect(),
            infra,
        })
    }

    #[cfg(test)]
    pub fn for_test(key: ObjectRef, gateway_class_name: &str, listeners: Vec<Listener>) -> Self {
        Self {
            key,
            gateway_class_name: gateway_class_name.to_string(),
            listeners,
            addresses: Vec::new(),
            infra: GatewayInfraState::default(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.key.namespace_or_default()
    }
}
