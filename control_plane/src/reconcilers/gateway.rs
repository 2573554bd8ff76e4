use super::gateway_class::class_key;
use super::routes::routes_referencing_gateway;
use super::{Context, ReconcileError, Requeue};
use crate::kubernetes::objects::ObjectRef;
use crate::names::GatewayInfraNames;
use crate::resources::{GatewayAddress, GatewayInfraState, GatewayRecord};
use crate::status::{DesiredStatus, Observed, StatusCondition};
use crate::store::{Mutation, WriteOutcome};
use gateway_api::apis::standard::gateways::Gateway;
use itertools::Itertools;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use portico_api::conditions::{GatewayConditionReason, GatewayConditionType};
use portico_api::constants::{OWNING_GATEWAY_NAME_LABEL, OWNING_GATEWAY_NAMESPACE_LABEL};
use std::sync::Arc;
use tracing::{debug, info};

const SUPPORTED_PROTOCOLS: [&str; 3] = ["HTTP", "HTTPS", "TLS"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    NoWorkload,
    NoAvailableReplicas,
    NoAddress,
    Ready,
}

pub(super) async fn reconcile(ctx: &Context, key: &ObjectRef) -> Result<Requeue, ReconcileError> {
    let gateway = ctx
        .state()
        .gateways()
        .get(key)
        .filter(|gateway| gateway.metadata.deletion_timestamp.is_none());

    let mut target = gateway
        .as_ref()
        .map(|gateway| gateway.spec.gateway_class_name.clone())
        .filter(|class| ctx.owns_class(class));
    if let Some(class) = &target
        && ctx.store().load(class).await.is_none()
    {
        debug!("GatewayClass of Gateway is not accepted yet; object.ref={key} gateway_class={class}");
        target = None;
    }

    let mut membership_changed = remove_from_other_classes(ctx, key, target.as_deref()).await?;

    let (Some(gateway), Some(class)) = (gateway, target) else {
        if membership_changed {
            ctx.enqueue_all(routes_referencing_gateway(ctx, key)).await;
        }
        if !ctx.state().gateways().contains(key) {
            ctx.status().forget(key);
        }
        return Ok(Requeue::Done);
    };

    let (infra, readiness) = discover_infrastructure(ctx, &gateway, key);
    let record = GatewayRecord::from_gateway(&gateway, infra)?;

    let outcome = ctx
        .store()
        .update(&class, |current| {
            let Some(current) = current else {
                return Mutation::Keep;
            };
            if current.gateway(key) == Some(&record) {
                return Mutation::Keep;
            }

            let mut next = current.clone();
            next.upsert_gateway(record.clone());
            next.sync_namespaces(ctx.records());
            Mutation::Store(next)
        })
        .await?;

    if outcome == WriteOutcome::Stored {
        debug!("Updated Gateway in snapshot; object.ref={key} gateway_class={class}");
        membership_changed = true;
    }
    if membership_changed {
        ctx.enqueue_all(routes_referencing_gateway(ctx, key)).await;
    }

    let observed = Observed::of(&*gateway);
    let desired = desired_status(&record, readiness, observed.generation());
    ctx.status().sync_status(key, &observed, desired).await?;

    Ok(Requeue::Done)
}

/// Drops `key` from every snapshot but `keep`. Returns whether anything was removed.
async fn remove_from_other_classes(
    ctx: &Context,
    key: &ObjectRef,
    keep: Option<&str>,
) -> Result<bool, ReconcileError> {
    let holders = ctx
        .classes_where(|resources| resources.gateway(key).is_some())
        .await;

    let mut removed = false;
    for class in holders.iter().filter(|class| Some(class.as_str()) != keep) {
        let outcome = ctx
            .store()
            .update(class, |current| {
                let Some(current) = current.filter(|current| current.gateway(key).is_some()) else {
                    return Mutation::Keep;
                };

                let mut next = current.clone();
                next.remove_gateway(key);
                next.sync_namespaces(ctx.records());
                Mutation::Store(next)
            })
            .await?;

        if outcome == WriteOutcome::Stored {
            info!("Removed Gateway from snapshot; object.ref={key} gateway_class={class}");
            // A terminating class waits for its last Gateway
            ctx.enqueue(class_key(class)).await;
            removed = true;
        }
    }

    Ok(removed)
}

/// Finds the generated Deployment and Service through their owning-gateway labels.
fn discover_infrastructure(
    ctx: &Context,
    gateway: &Gateway,
    key: &ObjectRef,
) -> (GatewayInfraState, Readiness) {
    let namespace = key.namespace_or_default();
    let owner_label_value = match GatewayInfraNames::for_gateway(
        &gateway.name_any(),
        namespace,
        ctx.options().generated_name_limit(),
    ) {
        Ok(names) => names.owner_label_value,
        Err(_) => return (GatewayInfraState::default(), Readiness::NoWorkload),
    };

    let deployment: Option<Arc<Deployment>> = find_owned(
        ctx.state().deployments().entries(),
        namespace,
        &owner_label_value,
    );
    let service: Option<Arc<Service>> =
        find_owned(ctx.state().services().entries(), namespace, &owner_label_value);

    let Some(deployment) = deployment else {
        return (GatewayInfraState::default(), Readiness::NoWorkload);
    };

    let available = deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or_default();
    let addresses = service.map(|service| addresses_of(&service)).unwrap_or_default();

    let readiness = if available < 1 {
        Readiness::NoAvailableReplicas
    } else if addresses.is_empty() {
        Readiness::NoAddress
    } else {
        Readiness::Ready
    };

    (
        GatewayInfraState::new(readiness == Readiness::Ready, addresses),
        readiness,
    )
}

fn find_owned<K: Resource>(
    entries: Vec<(ObjectRef, Arc<K>)>,
    namespace: &str,
    owner_label_value: &str,
) -> Option<Arc<K>> {
    entries
        .into_iter()
        .map(|(_, object)| object)
        .find(|object| {
            let labels = object.meta().labels.as_ref();
            object.meta().namespace.as_deref() == Some(namespace)
                && labels
                    .and_then(|labels| labels.get(OWNING_GATEWAY_NAME_LABEL))
                    .is_some_and(|value| value == owner_label_value)
                && labels
                    .and_then(|labels| labels.get(OWNING_GATEWAY_NAMESPACE_LABEL))
                    .is_some_and(|value| value == namespace)
        })
}

/// Load-balancer ingress addresses in reported order, duplicates dropped.
fn addresses_of(service: &Service) -> Vec<GatewayAddress> {
    service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|load_balancer| load_balancer.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|ingress| match (&ingress.ip, &ingress.hostname) {
            (Some(ip), _) => Some(GatewayAddress::new(Some("IPAddress"), ip.as_str())),
            (None, Some(hostname)) => Some(GatewayAddress::new(Some("Hostname"), hostname.as_str())),
            (None, None) => None,
        })
        .unique()
        .collect()
}

fn desired_status(
    record: &GatewayRecord,
    readiness: Readiness,
    generation: Option<i64>,
) -> DesiredStatus {
    let unsupported = record
        .listeners()
        .iter()
        .filter(|listener| !SUPPORTED_PROTOCOLS.contains(&listener.protocol().as_str()))
        .map(|listener| listener.name().as_str())
        .collect_vec();

    let accepted = if unsupported.is_empty() {
        StatusCondition::new(
            GatewayConditionType::Accepted,
            true,
            GatewayConditionReason::Accepted,
            "Gateway is accepted",
            generation,
        )
    } else {
        StatusCondition::new(
            GatewayConditionType::Accepted,
            false,
            GatewayConditionReason::UnsupportedProtocol,
            format!("Listeners use unsupported protocols: {}", unsupported.join(", ")),
            generation,
        )
    };

    let ready = readiness == Readiness::Ready;
    let (reason, message) = match readiness {
        Readiness::Ready => (GatewayConditionReason::Programmed, "Gateway is programmed"),
        Readiness::NoWorkload => (
            GatewayConditionReason::NoResources,
            "Gateway workload has not been created",
        ),
        Readiness::NoAvailableReplicas => (
            GatewayConditionReason::NoResources,
            "Gateway workload has no available replicas",
        ),
        Readiness::NoAddress => (
            GatewayConditionReason::AddressNotAssigned,
            "No address has been assigned to the Gateway",
        ),
    };
    let scheduled_reason = if ready {
        GatewayConditionReason::Scheduled
    } else {
        reason
    };

    DesiredStatus::Gateway {
        conditions: vec![
            accepted,
            StatusCondition::new(
                GatewayConditionType::Programmed,
                ready,
                reason,
                message,
                generation,
            ),
            StatusCondition::new(
                GatewayConditionType::Scheduled,
                ready,
                scheduled_reason,
                message,
                generation,
            ),
        ],
        addresses: record.infra().addresses().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};

    #[test]
    fn test_addresses_keep_order_and_drop_duplicates() {
        let ingress = |ip: Option<&str>, hostname: Option<&str>| LoadBalancerIngress {
            ip: ip.map(ToString::to_string),
            hostname: hostname.map(ToString::to_string),
            ..LoadBalancerIngress::default()
        };
        let service = Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![
                        ingress(Some("10.0.0.2"), None),
                        ingress(None, Some("lb.example.com")),
                        ingress(Some("10.0.0.1"), None),
                        ingress(Some("10.0.0.2"), None),
                        ingress(None, None),
                    ]),
                }),
                ..ServiceStatus::default()
            }),
            ..Service::default()
        };

        let values = addresses_of(&service)
            .iter()
            .map(|address| address.value().clone())
            .collect_vec();
        assert_eq!(values, vec!["10.0.0.2", "lb.example.com", "10.0.0.1"]);
    }
}
