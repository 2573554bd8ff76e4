use super::routes::routes_referencing_service;
use super::{Context, ReconcileError, Requeue};
use crate::kubernetes::objects::{ObjectRef, WatchedKind};
use crate::names::GatewayInfraNames;
use crate::resources::{NamespaceRecord, RecordSource};
use crate::store::{Mutation, WriteOutcome};
use itertools::Itertools;
use kube::api::ObjectMeta;
use portico_api::constants::{OWNING_GATEWAY_NAME_LABEL, OWNING_GATEWAY_NAMESPACE_LABEL};
use tracing::debug;

/// Refreshes the Service in every snapshot referencing it and wakes whoever depends on it.
pub(super) async fn reconcile_service(
    ctx: &Context,
    key: &ObjectRef,
) -> Result<Requeue, ReconcileError> {
    let record = ctx.records().service(key);
    let holders = ctx
        .classes_where(|resources| resources.service_references().is_referenced(key))
        .await;

    let mut referencing = Vec::new();
    for class in holders {
        let outcome = ctx
            .store()
            .update(&class, |current| {
                let Some(current) = current else {
                    return Mutation::Keep;
                };

                let mut next = current.clone();
                next.refresh_service(key, record.clone());
                next.sync_namespaces(ctx.records());
                if next == *current {
                    Mutation::Keep
                } else {
                    Mutation::Store(next)
                }
            })
            .await?;

        if outcome == WriteOutcome::Stored {
            debug!("Refreshed Service in snapshot; object.ref={key} gateway_class={class}");
        }
        if let Some(resources) = ctx.store().load(&class).await {
            referencing.extend(
                resources
                    .service_references()
                    .routes_referencing(key)
                    .cloned(),
            );
        }
    }

    // Routes reporting the Service as missing are not in any snapshot's index
    referencing.extend(routes_referencing_service(ctx, key));
    ctx.enqueue_all(referencing.into_iter().unique()).await;

    let meta = ctx.state().services().get(key).map(|service| service.metadata.clone());
    ctx.enqueue_all(owning_gateways(ctx, key, meta.as_ref())).await;

    Ok(Requeue::Done)
}

/// Replaces the namespace projection in every snapshot it is a member of.
pub(super) async fn reconcile_namespace(
    ctx: &Context,
    key: &ObjectRef,
) -> Result<Requeue, ReconcileError> {
    let name = key.name();
    let record = ctx
        .records()
        .namespace(name)
        .unwrap_or_else(|| NamespaceRecord::named(name));
    let holders = ctx
        .classes_where(|resources| resources.member_namespaces().contains(name))
        .await;

    for class in holders {
        let outcome = ctx
            .store()
            .update(&class, |current| {
                let Some(current) = current else {
                    return Mutation::Keep;
                };

                let mut next = current.clone();
                next.refresh_namespace(record.clone());
                if next == *current {
                    Mutation::Keep
                } else {
                    Mutation::Store(next)
                }
            })
            .await?;

        if outcome == WriteOutcome::Stored {
            debug!("Refreshed namespace in snapshot; object.ref={key} gateway_class={class}");
        }
    }

    Ok(Requeue::Done)
}

/// Deployments only feed Gateway readiness.
pub(super) async fn reconcile_deployment(
    ctx: &Context,
    key: &ObjectRef,
) -> Result<Requeue, ReconcileError> {
    let meta = ctx
        .state()
        .deployments()
        .get(key)
        .map(|deployment| deployment.metadata.clone());
    ctx.enqueue_all(owning_gateways(ctx, key, meta.as_ref())).await;
    Ok(Requeue::Done)
}

/// Cached Gateways whose generated infrastructure `key` is, matched on the owner labels or the
/// generated name. The labels of a deleted object are gone with it, so its removal wakes every
/// Gateway of the namespace.
fn owning_gateways(ctx: &Context, key: &ObjectRef, meta: Option<&ObjectMeta>) -> Vec<ObjectRef> {
    let namespace = key.namespace_or_default();
    let in_namespace = ctx
        .state()
        .gateways()
        .entries()
        .into_iter()
        .map(|(gateway, _)| gateway)
        .filter(|gateway| gateway.namespace_or_default() == namespace);

    let Some(meta) = meta else {
        return in_namespace.collect();
    };
    let label = |name: &str| {
        meta.labels
            .as_ref()
            .and_then(|labels| labels.get(name))
            .map(String::as_str)
    };
    let owner_namespace = label(OWNING_GATEWAY_NAMESPACE_LABEL);
    let owner_name = label(OWNING_GATEWAY_NAME_LABEL);

    in_namespace
        .filter(|gateway| {
            let Ok(names) = GatewayInfraNames::for_gateway(
                gateway.name(),
                namespace,
                ctx.options().generated_name_limit(),
            ) else {
                return false;
            };

            let generated_name = match key.kind() {
                WatchedKind::Deployment => &names.deployment,
                _ => &names.service,
            };
            let labelled = owner_namespace == Some(namespace)
                && owner_name == Some(names.owner_label_value.as_str());

            labelled || generated_name == key.name()
        })
        .collect()
}
