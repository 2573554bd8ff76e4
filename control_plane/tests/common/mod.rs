//! In-memory cluster for controller integration tests.
//!
//! Objects are fed through the same observe path the kube watch uses, and status writes go
//! through a writer that patches the cached objects and notifies the controller again, so the
//! watch, reconcile and status-write loop runs end to end without an API server.

#![allow(dead_code)]

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_api::apis::standard::gateways::Gateway;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::DynamicObject;
use portico_control_plane::controller::{Controller, ControllerParams, Notification};
use portico_control_plane::kubernetes::objects::{ObjectCache, ObjectRef, WatchedKind};
use portico_control_plane::kubernetes::state::ClusterState;
use portico_control_plane::kubernetes::watch::{observe_applied, observe_deleted};
use portico_control_plane::names::GatewayInfraNames;
use portico_control_plane::options::Options;
use portico_control_plane::resources::Resources;
use portico_control_plane::status::{StatusWriter, WriteError};
use portico_control_plane::store::SnapshotStore;
use portico_core::task::Builder as TaskBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use strum::IntoEnumIterator;

pub const CONTROLLER_NAME: &str = "gateway.portico.dev/control-plane";

static RESOURCE_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_resource_version() -> String {
    RESOURCE_VERSION.fetch_add(1, Ordering::SeqCst).to_string()
}

/// Parses a YAML manifest into JSON.
pub fn manifest(yaml: &str) -> Value {
    serde_yaml::from_str(yaml).unwrap()
}

pub fn gateway_class(name: &str, controller_name: &str) -> Value {
    manifest(&format!(
        r"
apiVersion: gateway.networking.k8s.io/v1
kind: GatewayClass
metadata:
  name: {name}
spec:
  controllerName: {controller_name}
"
    ))
}

pub fn gateway(namespace: &str, name: &str, class: &str) -> Value {
    manifest(&format!(
        r"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: {name}
  namespace: {namespace}
spec:
  gatewayClassName: {class}
  listeners:
  - name: http
    port: 8080
    protocol: HTTP
  - name: tls
    port: 8443
    protocol: TLS
"
    ))
}

pub fn http_route(namespace: &str, name: &str, gateway: &str, services: &[&str]) -> Value {
    let backends: Vec<Value> = services
        .iter()
        .map(|service| json!({ "name": service, "port": 80 }))
        .collect();
    let mut route = manifest(&format!(
        r"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: {name}
  namespace: {namespace}
spec:
  parentRefs:
  - name: {gateway}
  hostnames:
  - example.com
"
    ));
    route["spec"]["rules"] = json!([{ "backendRefs": backends }]);
    route
}

pub fn tls_route(namespace: &str, name: &str, gateway: &str, service: &str) -> Value {
    manifest(&format!(
        r"
apiVersion: gateway.networking.k8s.io/v1alpha2
kind: TLSRoute
metadata:
  name: {name}
  namespace: {namespace}
spec:
  parentRefs:
  - name: {gateway}
    sectionName: tls
  rules:
  - backendRefs:
    - name: {service}
      port: 443
"
    ))
}

pub fn service(namespace: &str, name: &str) -> Value {
    manifest(&format!(
        r"
apiVersion: v1
kind: Service
metadata:
  name: {name}
  namespace: {namespace}
spec:
  clusterIP: 10.96.0.10
  ports:
  - name: http
    port: 80
    protocol: TCP
"
    ))
}

pub fn namespace(name: &str, team: &str) -> Value {
    manifest(&format!(
        r"
apiVersion: v1
kind: Namespace
metadata:
  name: {name}
  labels:
    team: {team}
"
    ))
}

/// Value of the owning-gateway name label, shortened like the provisioner does.
pub fn owner_label(namespace: &str, gateway: &str) -> String {
    GatewayInfraNames::for_gateway(
        gateway,
        namespace,
        Options::default().generated_name_limit(),
    )
    .unwrap()
    .owner_label_value
}

/// The proxy Deployment of a Gateway. It is only tied to the Gateway through its labels.
pub fn proxy_deployment(namespace: &str, gateway: &str, available_replicas: i32) -> Value {
    let owner = owner_label(namespace, gateway);
    manifest(&format!(
        r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {gateway}-deployment
  namespace: {namespace}
  labels:
    gateway.portico.dev/owning-gateway-name: {owner}
    gateway.portico.dev/owning-gateway-namespace: {namespace}
spec:
  selector:
    matchLabels:
      app: {owner}
  template:
    metadata:
      labels:
        app: {owner}
status:
  availableReplicas: {available_replicas}
"
    ))
}

/// The proxy Service of a Gateway, with load-balancer ingress addresses.
pub fn proxy_service(namespace: &str, gateway: &str, ips: &[&str]) -> Value {
    let owner = owner_label(namespace, gateway);
    let mut service = manifest(&format!(
        r"
apiVersion: v1
kind: Service
metadata:
  name: {gateway}-service
  namespace: {namespace}
  labels:
    gateway.portico.dev/owning-gateway-name: {owner}
    gateway.portico.dev/owning-gateway-namespace: {namespace}
spec:
  type: LoadBalancer
  ports:
  - name: http
    port: 8080
"
    ));
    let ingress: Vec<Value> = ips.iter().map(|ip| json!({ "ip": ip })).collect();
    service["status"] = json!({ "loadBalancer": { "ingress": ingress } });
    service
}

pub fn class_ref(name: &str) -> ObjectRef {
    ObjectRef::cluster_scoped(WatchedKind::GatewayClass, name)
}

pub fn gateway_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::namespaced(WatchedKind::Gateway, namespace, name)
}

pub fn http_route_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::namespaced(WatchedKind::HTTPRoute, namespace, name)
}

pub fn tls_route_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::namespaced(WatchedKind::TLSRoute, namespace, name)
}

pub fn service_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::namespaced(WatchedKind::Service, namespace, name)
}

pub fn deployment_ref(namespace: &str, name: &str) -> ObjectRef {
    ObjectRef::namespaced(WatchedKind::Deployment, namespace, name)
}

fn kind_of(value: &Value) -> Result<WatchedKind> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("manifest has no kind"))?;
    WatchedKind::iter()
        .find(|candidate| candidate.to_string() == kind)
        .ok_or_else(|| anyhow!("unsupported kind {kind}"))
}

fn cached<K: Serialize + kube::Resource>(
    cache: &ObjectCache<K>,
    key: &ObjectRef,
) -> Result<Option<Value>> {
    cache
        .get(key)
        .map(|object| serde_json::to_value(&*object).context("serialize cached object"))
        .transpose()
}

/// JSON copy of a cached object.
pub fn cached_value(state: &ClusterState, key: &ObjectRef) -> Result<Option<Value>> {
    match key.kind() {
        WatchedKind::GatewayClass => cached(state.gateway_classes(), key),
        WatchedKind::Gateway => cached(state.gateways(), key),
        WatchedKind::HTTPRoute => cached(state.http_routes(), key),
        WatchedKind::TLSRoute => cached(state.tls_routes(), key),
        WatchedKind::Service => cached(state.services(), key),
        WatchedKind::Namespace => cached(state.namespaces(), key),
        WatchedKind::Deployment => cached(state.deployments(), key),
    }
}

async fn observe<K: DeserializeOwned + kube::Resource>(
    controller: &Controller,
    cache: &ObjectCache<K>,
    value: Value,
) -> Result<bool> {
    let object: K = serde_json::from_value(value).context("deserialize manifest")?;
    Ok(observe_applied(controller, cache, object).await?)
}

/// Feeds `value` through the watch path.
pub async fn observe_value(controller: &Controller, kind: WatchedKind, value: Value) -> Result<bool> {
    let state = controller.context().state();
    match kind {
        WatchedKind::GatewayClass => observe::<GatewayClass>(controller, state.gateway_classes(), value).await,
        WatchedKind::Gateway => observe::<Gateway>(controller, state.gateways(), value).await,
        WatchedKind::HTTPRoute => observe::<HTTPRoute>(controller, state.http_routes(), value).await,
        WatchedKind::TLSRoute => observe::<DynamicObject>(controller, state.tls_routes(), value).await,
        WatchedKind::Service => observe::<Service>(controller, state.services(), value).await,
        WatchedKind::Namespace => observe::<Namespace>(controller, state.namespaces(), value).await,
        WatchedKind::Deployment => observe::<Deployment>(controller, state.deployments(), value).await,
    }
}

/// Removes `key` through the watch path.
pub async fn observe_removed(controller: &Controller, key: &ObjectRef) -> bool {
    let state = controller.context().state();
    match key.kind() {
        WatchedKind::GatewayClass => observe_deleted(controller, state.gateway_classes(), key).await,
        WatchedKind::Gateway => observe_deleted(controller, state.gateways(), key).await,
        WatchedKind::HTTPRoute => observe_deleted(controller, state.http_routes(), key).await,
        WatchedKind::TLSRoute => observe_deleted(controller, state.tls_routes(), key).await,
        WatchedKind::Service => observe_deleted(controller, state.services(), key).await,
        WatchedKind::Namespace => observe_deleted(controller, state.namespaces(), key).await,
        WatchedKind::Deployment => observe_deleted(controller, state.deployments(), key).await,
    }
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// A status write the controller issued.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub object: ObjectRef,
    pub field: &'static str,
    pub body: Value,
}

/// Applies writes to the cached objects the way the API server would, then feeds the result
/// back through the watch path.
#[derive(Default)]
pub struct ClusterWriter {
    controller: OnceLock<Weak<Controller>>,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl ClusterWriter {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_to(&self, object: &ObjectRef) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|write| &write.object == object)
            .count()
    }

    fn controller(&self, object: &ObjectRef) -> Result<Arc<Controller>, WriteError> {
        self.controller
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| WriteError::Transient {
                object: object.clone(),
                message: "controller is gone".to_string(),
            })
    }

    async fn write<F>(
        &self,
        object: &ObjectRef,
        resource_version: Option<String>,
        field: &'static str,
        body: Value,
        apply: F,
    ) -> Result<(), WriteError>
    where
        F: FnOnce(&mut Value),
    {
        let transient = |err: anyhow::Error| WriteError::Transient {
            object: object.clone(),
            message: err.to_string(),
        };
        let controller = self.controller(object)?;
        let state = controller.context().state();

        let mut current = cached_value(state, object)
            .map_err(transient)?
            .ok_or_else(|| WriteError::NotFound(object.clone()))?;
        let current_version = current["metadata"]["resourceVersion"].as_str().map(ToString::to_string);
        if resource_version.is_some() && resource_version != current_version {
            return Err(WriteError::Conflict(object.clone()));
        }

        self.writes.lock().unwrap().push(RecordedWrite {
            object: object.clone(),
            field,
            body,
        });

        apply(&mut current);
        current["metadata"]["resourceVersion"] = json!(next_resource_version());

        let terminating = current["metadata"]["deletionTimestamp"].is_string();
        let finalized = current["metadata"]["finalizers"]
            .as_array()
            .is_none_or(Vec::is_empty);
        if terminating && finalized {
            observe_removed(&controller, object).await;
        } else {
            observe_value(&controller, object.kind(), current)
                .await
                .map_err(transient)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StatusWriter for ClusterWriter {
    async fn patch_status(
        &self,
        object: &ObjectRef,
        resource_version: Option<String>,
        status: Value,
    ) -> Result<(), WriteError> {
        let patch = status.clone();
        self.write(object, resource_version, "status", status, move |current| {
            merge_patch(&mut current["status"], &patch);
        })
        .await
    }

    async fn set_finalizers(
        &self,
        object: &ObjectRef,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), WriteError> {
        let body = json!(finalizers);
        self.write(object, resource_version, "finalizers", body.clone(), move |current| {
            current["metadata"]["finalizers"] = body;
        })
        .await
    }
}

/// A running controller over an in-memory cluster.
pub struct TestCluster {
    pub controller: Arc<Controller>,
    pub store: Arc<SnapshotStore>,
    pub writer: Arc<ClusterWriter>,
    tasks: TaskBuilder,
}

impl TestCluster {
    pub async fn start() -> Self {
        Self::start_with(
            Options::builder()
                .controller_name(CONTROLLER_NAME)
                .retry_backoff_base(Duration::from_millis(10))
                .retry_backoff_max(Duration::from_millis(200))
                .class_teardown_poll(Duration::from_millis(50))
                .build(),
        )
        .await
    }

    pub async fn start_with(options: Options) -> Self {
        let tasks = TaskBuilder::default();
        let store = Arc::new(SnapshotStore::new(options.max_store_conflict_retries()));
        let writer = Arc::new(ClusterWriter::default());

        let controller = Arc::new(Controller::new(
            ControllerParams::builder()
                .options(Arc::new(options))
                .state(Arc::new(ClusterState::default()))
                .store(store.clone())
                .status_writer(writer.clone())
                .shutdown(tasks.shutdown_token())
                .build(),
        ));
        let _ = writer.controller.set(Arc::downgrade(&controller));

        for kind in WatchedKind::iter() {
            controller.mark_synced(kind).await;
        }
        controller.spawn_workers(&tasks);

        Self {
            controller,
            store,
            writer,
            tasks,
        }
    }

    pub fn state(&self) -> &ClusterState {
        self.controller.context().state()
    }

    /// Creates or updates an object. The generation moves when the spec changes and a
    /// missing status keeps the cached one, as with a regular update.
    pub async fn apply(&self, mut value: Value) -> Result<ObjectRef> {
        let kind = kind_of(&value)?;
        let name = value["metadata"]["name"]
            .as_str()
            .ok_or_else(|| anyhow!("manifest has no name"))?
            .to_string();
        let key = match value["metadata"]["namespace"].as_str() {
            Some(namespace) if kind.is_namespaced() => ObjectRef::namespaced(kind, namespace, name),
            _ => ObjectRef::cluster_scoped(kind, name),
        };

        let previous = cached_value(self.state(), &key)?;
        let generation = match &previous {
            Some(previous) if previous["spec"] == value["spec"] => {
                previous["metadata"]["generation"].as_i64().unwrap_or(1)
            }
            Some(previous) => previous["metadata"]["generation"].as_i64().unwrap_or(1) + 1,
            None => 1,
        };
        if let Some(previous) = &previous {
            if value.get("status").is_none() && !previous["status"].is_null() {
                value["status"] = previous["status"].clone();
            }
            if value["metadata"].get("finalizers").is_none() {
                value["metadata"]["finalizers"] = previous["metadata"]["finalizers"].clone();
            }
        }
        value["metadata"]["generation"] = json!(generation);
        value["metadata"]["resourceVersion"] = json!(next_resource_version());

        observe_value(&self.controller, kind, value).await?;
        Ok(key)
    }

    /// Deletes an object, leaving it terminating while finalizers remain.
    pub async fn delete(&self, key: &ObjectRef) -> Result<()> {
        let Some(mut current) = cached_value(self.state(), key)? else {
            return Ok(());
        };

        let finalized = current["metadata"]["finalizers"]
            .as_array()
            .is_none_or(Vec::is_empty);
        if finalized {
            observe_removed(&self.controller, key).await;
        } else {
            current["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
            current["metadata"]["resourceVersion"] = json!(next_resource_version());
            observe_value(&self.controller, key.kind(), current).await?;
        }
        Ok(())
    }

    /// Queues `key` as if the watch had delivered it again.
    pub async fn touch(&self, key: &ObjectRef) {
        self.controller.notify(Notification::applied(key.clone())).await;
    }

    pub async fn snapshot(&self, class: &str) -> Option<Arc<Resources>> {
        self.store.load(class).await
    }

    pub fn status(&self, key: &ObjectRef) -> Value {
        cached_value(self.state(), key)
            .ok()
            .flatten()
            .map(|value| value["status"].clone())
            .unwrap_or(Value::Null)
    }

    /// `status` of the condition `type_` in `key`'s status, or of the route parent entry
    /// owned by this controller.
    pub fn condition(&self, key: &ObjectRef, type_: &str) -> Option<(String, String)> {
        let status = self.status(key);
        let conditions = if key.kind().is_route() {
            status["parents"]
                .as_array()?
                .iter()
                .find(|parent| parent["controllerName"] == CONTROLLER_NAME)?["conditions"]
                .clone()
        } else {
            status["conditions"].clone()
        };

        conditions.as_array()?.iter().find_map(|condition| {
            (condition["type"] == type_).then(|| {
                (
                    condition["status"].as_str().unwrap_or_default().to_string(),
                    condition["reason"].as_str().unwrap_or_default().to_string(),
                )
            })
        })
    }

    /// Waits until every queue is drained and stays drained for a moment.
    pub async fn settle(&self) {
        let mut quiet = 0;
        while quiet < 5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.controller.queues().is_empty().await {
                quiet += 1;
            } else {
                quiet = 0;
            }
        }
    }

    pub async fn stop(self) {
        self.tasks.shutdown();
        self.tasks.join_all().await;
    }
}

/// Polls `check` until it returns true or five seconds pass.
pub async fn eventually<F>(description: &str, mut check: F)
where
    F: AsyncFnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {description}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn condition(status: &str, reason: &str) -> Option<(String, String)> {
    Some((status.to_string(), reason.to_string()))
}
