use super::{Context, ReconcileError, Requeue};
use crate::kubernetes::objects::{ObjectRef, WatchedKind};
use crate::kubernetes::specs::{BackendRefView, ParentRefView, RouteRuleView, RouteSpecView};
use crate::references::on_route_changed;
use crate::resources::{
    GatewayRecord, ParentRef, RecordSource, RouteRecord, is_service_backend,
};
use crate::status::{DesiredStatus, RouteParentStatus, StatusCondition};
use crate::store::WriteOutcome;
use itertools::Itertools;
use portico_api::conditions::{RouteConditionReason, RouteConditionType};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Why a Route does not attach to one of its parents.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attachment {
    Attached,
    Rejected {
        reason: RouteConditionReason,
        message: String,
    },
}

/// A parentRef this controller is responsible for.
struct ResolvedParent {
    view: ParentRefView,
    gateway_class: String,
    attachment: Attachment,
}

pub(super) async fn reconcile(ctx: &Context, key: &ObjectRef) -> Result<Requeue, ReconcileError> {
    let route = ctx
        .state()
        .route(key)?
        .filter(|route| !*route.deleting());

    let Some(route) = route else {
        detach_everywhere(ctx, key).await?;
        ctx.status().forget(key);
        return Ok(Requeue::Done);
    };

    let namespace = key.namespace_or_default();
    let mut parents = Vec::new();
    for view in &route.spec().parent_refs {
        if let Some(parent) = resolve_parent(ctx, key, namespace, view).await {
            parents.push(parent);
        }
    }

    let invalid_rules = match key.kind() {
        WatchedKind::HTTPRoute => invalid_filters(&route.spec().rules),
        _ => None,
    };
    let (resolved_refs, permitted_spec) = resolve_backends(ctx, namespace, route.spec());
    let record = RouteRecord::from_view(key.clone(), &permitted_spec);

    let attached: BTreeSet<String> = parents
        .iter()
        .filter(|parent| parent.attachment == Attachment::Attached)
        .map(|parent| parent.gateway_class.clone())
        .collect();
    let holders = ctx
        .classes_where(|resources| resources.route(key).is_some())
        .await;

    let affected = attached
        .iter()
        .chain(holders.iter())
        .unique()
        .cloned()
        .collect_vec();
    for class in &affected {
        let keep = invalid_rules.is_none() && attached.contains(class);
        let outcome = on_route_changed(
            ctx.store(),
            class,
            key,
            keep.then_some(&record),
            ctx.records(),
        )
        .await?;

        match outcome {
            WriteOutcome::Stored if keep => {
                debug!("Updated Route in snapshot; object.ref={key} gateway_class={class}");
            }
            WriteOutcome::Stored => {
                info!("Removed Route from snapshot; object.ref={key} gateway_class={class}");
            }
            _ => {}
        }
    }

    let generation = route.observed().generation();
    let statuses = parents
        .into_iter()
        .map(|parent| {
            let accepted = match (&invalid_rules, parent.attachment) {
                (Some(message), _) => StatusCondition::new(
                    RouteConditionType::Accepted,
                    false,
                    RouteConditionReason::UnsupportedValue,
                    message.clone(),
                    generation,
                ),
                (None, Attachment::Attached) => StatusCondition::new(
                    RouteConditionType::Accepted,
                    true,
                    RouteConditionReason::Accepted,
                    "Route is accepted",
                    generation,
                ),
                (None, Attachment::Rejected { reason, message }) => StatusCondition::new(
                    RouteConditionType::Accepted,
                    false,
                    reason,
                    message,
                    generation,
                ),
            };
            RouteParentStatus::new(parent.view, vec![accepted, resolved_refs.condition(generation)])
        })
        .collect();

    let desired = DesiredStatus::RouteParents {
        controller_name: ctx.options().controller_name().clone(),
        parents: statuses,
    };
    ctx.status()
        .sync_status(key, route.observed(), desired)
        .await?;

    Ok(Requeue::Done)
}

async fn detach_everywhere(ctx: &Context, key: &ObjectRef) -> Result<(), ReconcileError> {
    let holders = ctx
        .classes_where(|resources| resources.route(key).is_some())
        .await;

    for class in holders {
        if on_route_changed(ctx.store(), &class, key, None, ctx.records()).await?
            == WriteOutcome::Stored
        {
            info!("Removed deleted Route from snapshot; object.ref={key} gateway_class={class}");
        }
    }
    Ok(())
}

/// Finds the GatewayClass behind a parentRef and checks listener attachment. Parents of
/// other controllers resolve to `None`.
async fn resolve_parent(
    ctx: &Context,
    route: &ObjectRef,
    namespace: &str,
    view: &ParentRefView,
) -> Option<ResolvedParent> {
    let parent = ParentRef::from_view(namespace, view)?;
    let gateway_key = parent.gateway();

    let gateway_class = match ctx.state().gateways().get(gateway_key) {
        Some(gateway) if ctx.owns_class(&gateway.spec.gateway_class_name) => {
            gateway.spec.gateway_class_name.clone()
        }
        Some(_) => return None,
        // Keep what was resolved before while the snapshot still holds the Gateway
        None => ctx
            .classes_where(|resources| resources.gateway(gateway_key).is_some())
            .await
            .into_iter()
            .next()?,
    };

    let record = ctx
        .store()
        .load(&gateway_class)
        .await
        .and_then(|resources| resources.gateway(gateway_key).cloned());

    let attachment = match record {
        None => Attachment::Rejected {
            reason: RouteConditionReason::NoMatchingParent,
            message: format!("Gateway {gateway_key} is not programmed by this controller"),
        },
        Some(record) => attach(&record, &parent, route.kind()),
    };

    Some(ResolvedParent {
        view: view.clone(),
        gateway_class,
        attachment,
    })
}

fn attach(gateway: &GatewayRecord, parent: &ParentRef, kind: WatchedKind) -> Attachment {
    let candidates = gateway
        .listeners()
        .iter()
        .filter(|listener| {
            parent
                .section_name()
                .as_ref()
                .is_none_or(|section| listener.name() == section)
        })
        .filter(|listener| parent.port().is_none_or(|port| listener.port() == port))
        .collect_vec();

    if candidates.is_empty() {
        return Attachment::Rejected {
            reason: RouteConditionReason::NoMatchingParent,
            message: "No listener matches the parentRef".to_string(),
        };
    }

    if candidates
        .iter()
        .any(|listener| listener.accepts_route_kind(kind))
    {
        Attachment::Attached
    } else {
        Attachment::Rejected {
            reason: RouteConditionReason::NotAllowedByListeners,
            message: format!("No matching listener accepts {kind}"),
        }
    }
}

/// The configuration field each core filter type must carry.
fn filter_config_field(filter_type: &str) -> Option<&'static str> {
    match filter_type {
        "RequestHeaderModifier" => Some("requestHeaderModifier"),
        "ResponseHeaderModifier" => Some("responseHeaderModifier"),
        "RequestMirror" => Some("requestMirror"),
        "RequestRedirect" => Some("requestRedirect"),
        "URLRewrite" => Some("urlRewrite"),
        "ExtensionRef" => Some("extensionRef"),
        _ => None,
    }
}

/// Describes the first invalid filter configuration, if any.
fn invalid_filters(rules: &[RouteRuleView]) -> Option<String> {
    for (index, rule) in rules.iter().enumerate() {
        let mut types = Vec::new();

        for filter in &rule.filters {
            let Some(filter_type) = filter.get("type").and_then(Value::as_str) else {
                return Some(format!("Rule {index} has a filter without a type"));
            };
            let Some(field) = filter_config_field(filter_type) else {
                return Some(format!("Rule {index} uses unsupported filter type {filter_type}"));
            };
            if filter.get(field).is_none_or(Value::is_null) {
                return Some(format!("Rule {index} filter {filter_type} is missing {field}"));
            }
            types.push(filter_type);
        }

        if types.contains(&"RequestRedirect") {
            if types.contains(&"URLRewrite") {
                return Some(format!(
                    "Rule {index} cannot combine RequestRedirect and URLRewrite"
                ));
            }
            if !rule.backend_refs.is_empty() {
                return Some(format!(
                    "Rule {index} cannot combine RequestRedirect with backendRefs"
                ));
            }
        }
    }

    None
}

/// Outcome of resolving every backendRef of a Route.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedRefs {
    problem: Option<(RouteConditionReason, String)>,
}

impl ResolvedRefs {
    fn condition(&self, generation: Option<i64>) -> StatusCondition {
        match &self.problem {
            None => StatusCondition::new(
                RouteConditionType::ResolvedRefs,
                true,
                RouteConditionReason::ResolvedRefs,
                "All references are resolved",
                generation,
            ),
            Some((reason, message)) => StatusCondition::new(
                RouteConditionType::ResolvedRefs,
                false,
                *reason,
                message.clone(),
                generation,
            ),
        }
    }
}

/// Checks backendRefs and returns the spec with only permitted references left. Missing
/// Services stay referenced so they are picked up once they appear.
fn resolve_backends(
    ctx: &Context,
    namespace: &str,
    spec: &RouteSpecView,
) -> (ResolvedRefs, RouteSpecView) {
    let mut invalid_kind = Vec::new();
    let mut not_permitted = Vec::new();
    let mut not_found = Vec::new();

    let permitted = |backend: &BackendRefView| {
        is_service_backend(backend)
            && backend
                .namespace
                .as_deref()
                .is_none_or(|backend_namespace| backend_namespace == namespace)
    };

    for backend in spec.rules.iter().flat_map(|rule| rule.backend_refs.iter()) {
        if !is_service_backend(backend) {
            invalid_kind.push(backend.name.clone());
        } else if !permitted(backend) {
            not_permitted.push(backend.name.clone());
        } else {
            let service = ObjectRef::namespaced(WatchedKind::Service, namespace, &backend.name);
            if ctx.records().service(&service).is_none() {
                not_found.push(backend.name.clone());
            }
        }
    }

    let problem = if !invalid_kind.is_empty() {
        Some((
            RouteConditionReason::InvalidKind,
            format!("Unsupported backend kinds: {}", invalid_kind.join(", ")),
        ))
    } else if !not_permitted.is_empty() {
        Some((
            RouteConditionReason::RefNotPermitted,
            format!(
                "Cross-namespace backends are not permitted: {}",
                not_permitted.join(", ")
            ),
        ))
    } else if !not_found.is_empty() {
        Some((
            RouteConditionReason::BackendNotFound,
            format!("Services not found: {}", not_found.iter().unique().join(", ")),
        ))
    } else {
        None
    };

    let mut spec = spec.clone();
    for rule in &mut spec.rules {
        rule.backend_refs.retain(|backend| permitted(backend));
    }

    (ResolvedRefs { problem }, spec)
}

/// Routes in the caches with a parentRef pointing at `gateway`.
pub(super) fn routes_referencing_gateway(ctx: &Context, gateway: &ObjectRef) -> Vec<ObjectRef> {
    ctx.state()
        .route_keys()
        .into_iter()
        .filter(|key| {
            ctx.state().route(key).ok().flatten().is_some_and(|route| {
                route.spec().parent_refs.iter().any(|view| {
                    ParentRef::from_view(key.namespace_or_default(), view)
                        .is_some_and(|parent| parent.gateway() == gateway)
                })
            })
        })
        .collect()
}

/// Routes in the caches with a backendRef pointing at `service`.
pub(super) fn routes_referencing_service(ctx: &Context, service: &ObjectRef) -> Vec<ObjectRef> {
    ctx.state()
        .route_keys()
        .into_iter()
        .filter(|key| {
            ctx.state().route(key).ok().flatten().is_some_and(|route| {
                RouteRecord::from_view(key.clone(), route.spec())
                    .backend_services()
                    .contains(service)
            })
        })
        .collect()
}
