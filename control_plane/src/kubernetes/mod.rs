pub mod objects;
pub mod specs;
pub mod state;
pub mod status_writer;
pub mod watch;

use self::state::ClusterState;
use self::status_writer::tls_route_resource;
use self::watch::{CacheOf, watch_objects};
use crate::controller::Controller;
use gateway_api::apis::standard::gatewayclasses::GatewayClass;
use gateway_api::apis::standard::gateways::Gateway;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::DynamicObject;
use kube::{Api, Client, Resource};
use portico_core::task::Builder as TaskBuilder;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;

/// Starts one watch per watched kind, each feeding its cache in `controller`'s state.
pub fn spawn_watches(tasks: &TaskBuilder, client: &Client, controller: &Arc<Controller>) {
    spawn_watch::<GatewayClass>(
        tasks,
        "watch_gateway_classes",
        Api::all(client.clone()),
        ClusterState::gateway_classes,
        controller,
    );
    spawn_watch::<Gateway>(
        tasks,
        "watch_gateways",
        Api::all(client.clone()),
        ClusterState::gateways,
        controller,
    );
    spawn_watch::<HTTPRoute>(
        tasks,
        "watch_http_routes",
        Api::all(client.clone()),
        ClusterState::http_routes,
        controller,
    );
    spawn_watch::<DynamicObject>(
        tasks,
        "watch_tls_routes",
        Api::all_with(client.clone(), &tls_route_resource()),
        ClusterState::tls_routes,
        controller,
    );
    spawn_watch::<Service>(
        tasks,
        "watch_services",
        Api::all(client.clone()),
        ClusterState::services,
        controller,
    );
    spawn_watch::<Namespace>(
        tasks,
        "watch_namespaces",
        Api::all(client.clone()),
        ClusterState::namespaces,
        controller,
    );
    spawn_watch::<Deployment>(
        tasks,
        "watch_deployments",
        Api::all(client.clone()),
        ClusterState::deployments,
        controller,
    );
}

fn spawn_watch<K>(
    tasks: &TaskBuilder,
    name: &'static str,
    api: Api<K>,
    cache_of: CacheOf<K>,
    controller: &Arc<Controller>,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let controller = controller.clone();
    let shutdown = tasks.shutdown_token();
    tasks
        .new_task(name)
        .spawn(watch_objects(api, cache_of, controller, shutdown));
}
