use super::{Context, ReconcileError, Requeue};
use crate::kubernetes::objects::{ObjectRef, WatchedKind};
use crate::resources::{GatewayClassRecord, Resources};
use crate::status::{DesiredStatus, Observed, StatusCondition, SyncOutcome};
use crate::store::{Mutation, WriteOutcome};
use itertools::Itertools;
use portico_api::conditions::{GatewayClassConditionReason, GatewayClassConditionType};
use portico_api::constants::GATEWAY_CLASS_FINALIZER;
use std::time::Duration;
use tracing::{debug, info};

/// Drives a GatewayClass through accept, terminate and teardown.
pub(super) async fn reconcile(ctx: &Context, key: &ObjectRef) -> Result<Requeue, ReconcileError> {
    let name = key.name();

    let Some(gateway_class) = ctx.state().gateway_classes().get(key) else {
        if ctx.store().delete(name).await == WriteOutcome::Deleted {
            info!("Removed snapshot of deleted GatewayClass; object.ref={key}");
        }
        ctx.status().forget(key);
        return Ok(Requeue::Done);
    };

    let observed = Observed::of(&*gateway_class);
    let ours = &gateway_class.spec.controller_name == ctx.options().controller_name();

    if !ours {
        let was_ours = observed.has_finalizer(GATEWAY_CLASS_FINALIZER)
            || ctx.store().load(name).await.is_some();
        if was_ours {
            info!("GatewayClass no longer bound to this controller; object.ref={key}");
            return tear_down(ctx, key, &observed).await;
        }
        debug!("Ignoring GatewayClass of another controller; object.ref={key}");
        return Ok(Requeue::Done);
    }

    if gateway_class.metadata.deletion_timestamp.is_some() {
        return tear_down(ctx, key, &observed).await;
    }

    // The finalizer has to be in place before the snapshot entry exists
    if ctx
        .status()
        .sync_finalizer(key, &observed, GATEWAY_CLASS_FINALIZER, true)
        .await?
        == SyncOutcome::Written
    {
        return Ok(Requeue::After(Duration::ZERO));
    }

    let record = GatewayClassRecord::from_class(&gateway_class, true);
    let outcome = ctx
        .store()
        .update(name, |current| match current {
            None => Mutation::Store(Resources::new(record.clone())),
            Some(current) if current.gateway_class() == &record => Mutation::Keep,
            Some(current) => {
                let mut next = current.clone();
                next.set_gateway_class(record.clone());
                Mutation::Store(next)
            }
        })
        .await?;

    if outcome == WriteOutcome::Stored {
        info!("Accepted GatewayClass; object.ref={key}");
        ctx.enqueue_all(gateways_of_class(ctx, name)).await;
    }

    let accepted = DesiredStatus::Conditions(vec![StatusCondition::new(
        GatewayClassConditionType::Accepted,
        true,
        GatewayClassConditionReason::Accepted,
        "GatewayClass is accepted by this controller",
        observed.generation(),
    )]);
    ctx.status().sync_status(key, &observed, accepted).await?;

    Ok(Requeue::Done)
}

/// Removes the snapshot once no Gateway is left in it, then releases the finalizer.
async fn tear_down(
    ctx: &Context,
    key: &ObjectRef,
    observed: &Observed,
) -> Result<Requeue, ReconcileError> {
    let name = key.name();

    if let Some(resources) = ctx.store().load(name).await
        && !resources.gateways().is_empty()
    {
        debug!(
            "GatewayClass still has Gateways; object.ref={key} gateways={}",
            resources.gateways().len()
        );
        let gateways = resources
            .gateways()
            .iter()
            .map(|gateway| gateway.key().clone())
            .collect_vec();
        ctx.enqueue_all(gateways).await;
        return Ok(Requeue::After(ctx.options().class_teardown_poll()));
    }

    if ctx.store().delete(name).await == WriteOutcome::Deleted {
        info!("Removed snapshot of GatewayClass; object.ref={key}");
    }

    ctx.status()
        .sync_finalizer(key, observed, GATEWAY_CLASS_FINALIZER, false)
        .await?;
    ctx.status().forget(key);
    Ok(Requeue::Done)
}

fn gateways_of_class(ctx: &Context, name: &str) -> Vec<ObjectRef> {
    ctx.state()
        .gateways()
        .entries()
        .into_iter()
        .filter(|(_, gateway)| gateway.spec.gateway_class_name == name)
        .map(|(key, _)| key)
        .collect_vec()
}

/// The GatewayClass key for a class name.
pub(super) fn class_key(name: &str) -> ObjectRef {
    ObjectRef::cluster_scoped(WatchedKind::GatewayClass, name)
}
