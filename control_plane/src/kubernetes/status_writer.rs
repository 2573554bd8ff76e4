use crate::kubernetes::objects::{ObjectRef, WatchedKind};
use crate::status::{StatusWriter, WriteError};
use async_trait::async_trait;
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_api::apis::standard::gateways::Gateway;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Api, Client};
use portico_api::constants::{GATEWAY_API_GROUP, TLS_ROUTE_API_VERSION};
use serde_json::{Value, json};
use tracing::debug;

/// Writes status and finalizers through the API server with JSON merge patches. The observed
/// `resourceVersion` rides along so stale writes come back as 409.
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, object: &ObjectRef) -> Api<DynamicObject> {
        let resource = api_resource(object.kind());
        match object.namespace() {
            Some(namespace) => Api::namespaced_with(self.client.clone(), namespace, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn api_resource(kind: WatchedKind) -> ApiResource {
    match kind {
        WatchedKind::GatewayClass => ApiResource::erase::<GatewayClass>(&()),
        WatchedKind::Gateway => ApiResource::erase::<Gateway>(&()),
        WatchedKind::HTTPRoute => ApiResource::erase::<HTTPRoute>(&()),
        WatchedKind::TLSRoute => tls_route_resource(),
        WatchedKind::Service => ApiResource::erase::<Service>(&()),
        WatchedKind::Namespace => ApiResource::erase::<Namespace>(&()),
        WatchedKind::Deployment => ApiResource::erase::<Deployment>(&()),
    }
}

/// TLSRoute is only served as `v1alpha2` and has no generated type.
pub fn tls_route_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        GATEWAY_API_GROUP,
        TLS_ROUTE_API_VERSION,
        "TLSRoute",
    ))
}

fn with_resource_version(mut patch: Value, resource_version: Option<String>) -> Value {
    if let Some(resource_version) = resource_version {
        patch["metadata"]["resourceVersion"] = Value::String(resource_version);
    }
    patch
}

fn classify(object: &ObjectRef, err: kube::Error) -> WriteError {
    match err {
        kube::Error::Api(response) if response.code == 409 => WriteError::Conflict(object.clone()),
        kube::Error::Api(response) if response.code == 404 => WriteError::NotFound(object.clone()),
        err => WriteError::Transient {
            object: object.clone(),
            message: err.to_string(),
        },
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_status(
        &self,
        object: &ObjectRef,
        resource_version: Option<String>,
        status: Value,
    ) -> Result<(), WriteError> {
        let patch = with_resource_version(json!({ "status": status }), resource_version);
        debug!("Patching status; object.ref={object}");

        self.api(object)
            .patch_status(object.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|err| classify(object, err))
    }

    async fn set_finalizers(
        &self,
        object: &ObjectRef,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), WriteError> {
        let patch = with_resource_version(
            json!({ "metadata": { "finalizers": finalizers } }),
            resource_version,
        );
        debug!("Setting finalizers; object.ref={object}");

        self.api(object)
            .patch(object.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|err| classify(object, err))
    }
}
