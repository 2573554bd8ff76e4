//! Diff-before-write synchronization of status and finalizers.
//!
//! Status writes come back as watch events. Writing only when the semantic content differs
//! from what the cached object already carries is what keeps reconciles from feeding
//! themselves.

mod conditions;
mod instrumentation;
mod writer;

pub use conditions::*;
pub use writer::*;

use crate::kubernetes::objects::ObjectRef;
use crate::kubernetes::specs::ParentRefView;
use crate::resources::GatewayAddress;
use dashmap::DashMap;
use getset::{CopyGetters, Getters};
use instrumentation::{record_write_issued, record_write_skipped};
use k8s_openapi::chrono::Utc;
use kube::Resource;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, trace};

/// The parts of a cached object the synchronizer diffs against.
#[derive(Debug, Clone, Default, PartialEq, Getters, CopyGetters)]
pub struct Observed {
    #[getset(get = "pub")]
    resource_version: Option<String>,

    #[getset(get_copy = "pub")]
    generation: Option<i64>,

    #[getset(get = "pub")]
    status: Value,

    #[getset(get = "pub")]
    finalizers: Vec<String>,
}

impl Observed {
    pub fn of<K: Resource + Serialize>(object: &K) -> Self {
        let meta = object.meta();
        let status = serde_json::to_value(object)
            .ok()
            .and_then(|mut value| value.get_mut("status").map(Value::take))
            .unwrap_or(Value::Null);

        Self {
            resource_version: meta.resource_version.clone(),
            generation: meta.generation,
            status,
            finalizers: meta.finalizers.clone().unwrap_or_default(),
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|existing| existing == finalizer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct RouteParentStatus {
    #[getset(get = "pub")]
    parent_ref: ParentRefView,

    #[getset(get = "pub")]
    conditions: Vec<StatusCondition>,
}

impl RouteParentStatus {
    pub fn new(parent_ref: ParentRefView, conditions: Vec<StatusCondition>) -> Self {
        Self {
            parent_ref,
            conditions,
        }
    }
}

/// Status content the control plane wants an object to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredStatus {
    Conditions(Vec<StatusCondition>),
    Gateway {
        conditions: Vec<StatusCondition>,
        addresses: Vec<GatewayAddress>,
    },
    /// Only the `parents` entries owned by `controller_name` are managed.
    RouteParents {
        controller_name: String,
        parents: Vec<RouteParentStatus>,
    },
}

impl DesiredStatus {
    pub fn matches(&self, current: &Value) -> bool {
        match self {
            Self::Conditions(conditions) => conditions_match(conditions, conditions_of(current)),
            Self::Gateway {
                conditions,
                addresses,
            } => {
                conditions_match(conditions, conditions_of(current))
                    && current
                        .get("addresses")
                        .cloned()
                        .unwrap_or_else(|| json!([]))
                        == render_addresses(addresses)
            }
            Self::RouteParents {
                controller_name,
                parents,
            } => {
                let owned: Vec<&Value> = parents_of(current)
                    .iter()
                    .filter(|parent| is_owned_by(parent, controller_name))
                    .collect();

                owned.len() == parents.len()
                    && parents.iter().all(|desired| {
                        let parent_ref = json!(desired.parent_ref);
                        owned.iter().any(|current| {
                            current.get("parentRef") == Some(&parent_ref)
                                && conditions_match(&desired.conditions, conditions_of(current))
                        })
                    })
            }
        }
    }

    pub fn render(&self, current: &Value, now: &str) -> Value {
        match self {
            Self::Conditions(conditions) => json!({
                "conditions": render_conditions(conditions, conditions_of(current), now),
            }),
            Self::Gateway {
                conditions,
                addresses,
            } => json!({
                "conditions": render_conditions(conditions, conditions_of(current), now),
                "addresses": render_addresses(addresses),
            }),
            Self::RouteParents {
                controller_name,
                parents,
            } => {
                let existing = parents_of(current);
                let foreign = existing
                    .iter()
                    .filter(|parent| !is_owned_by(parent, controller_name))
                    .cloned();

                let owned = parents.iter().map(|desired| {
                    let parent_ref = json!(desired.parent_ref);
                    let previous = existing
                        .iter()
                        .find(|current| {
                            is_owned_by(current, controller_name)
                                && current.get("parentRef") == Some(&parent_ref)
                        })
                        .map_or(&[][..], conditions_of);

                    json!({
                        "parentRef": parent_ref,
                        "controllerName": controller_name,
                        "conditions": render_conditions(&desired.conditions, previous, now),
                    })
                });

                json!({ "parents": foreign.chain(owned).collect::<Vec<_>>() })
            }
        }
    }
}

fn render_addresses(addresses: &[GatewayAddress]) -> Value {
    addresses
        .iter()
        .map(|address| match address.type_() {
            Some(type_) => json!({ "type": type_, "value": address.value() }),
            None => json!({ "value": address.value() }),
        })
        .collect()
}

fn parents_of(status: &Value) -> &[Value] {
    status
        .get("parents")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn is_owned_by(parent: &Value, controller_name: &str) -> bool {
    parent.get("controllerName").and_then(Value::as_str) == Some(controller_name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Unchanged,
    /// An identical write against the same resource version was already issued and the watch
    /// has not caught up yet.
    Pending,
    Written,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingWrite {
    resource_version: Option<String>,
    desired: DesiredStatus,
}

pub struct StatusSynchronizer {
    writer: Arc<dyn StatusWriter>,
    pending: DashMap<ObjectRef, PendingWrite>,
}

impl StatusSynchronizer {
    pub fn new(writer: Arc<dyn StatusWriter>) -> Self {
        Self {
            writer,
            pending: DashMap::new(),
        }
    }

    pub async fn sync_status(
        &self,
        object: &ObjectRef,
        observed: &Observed,
        desired: DesiredStatus,
    ) -> Result<SyncOutcome, WriteError> {
        if desired.matches(&observed.status) {
            self.pending.remove(object);
            record_write_skipped(object.kind(), "status");
            trace!("Status already up to date; object.ref={object}");
            return Ok(SyncOutcome::Unchanged);
        }

        let pending = PendingWrite {
            resource_version: observed.resource_version.clone(),
            desired,
        };
        if self
            .pending
            .get(object)
            .is_some_and(|existing| *existing == pending)
        {
            record_write_skipped(object.kind(), "status");
            trace!("Status write still pending; object.ref={object}");
            return Ok(SyncOutcome::Pending);
        }

        let status = pending
            .desired
            .render(&observed.status, &Utc::now().to_rfc3339());
        debug!("Writing status; object.ref={object}");
        record_write_issued(object.kind(), "status");

        match self
            .writer
            .patch_status(object, observed.resource_version.clone(), status)
            .await
        {
            Ok(()) => {
                self.pending.insert(object.clone(), pending);
                Ok(SyncOutcome::Written)
            }
            Err(err) => {
                self.pending.remove(object);
                Err(err)
            }
        }
    }

    /// Adds (`present`) or removes `finalizer`, keeping every other finalizer in place.
    pub async fn sync_finalizer(
        &self,
        object: &ObjectRef,
        observed: &Observed,
        finalizer: &str,
        present: bool,
    ) -> Result<SyncOutcome, WriteError> {
        if observed.has_finalizer(finalizer) == present {
            record_write_skipped(object.kind(), "finalizers");
            return Ok(SyncOutcome::Unchanged);
        }

        let mut finalizers: Vec<String> = observed
            .finalizers
            .iter()
            .filter(|existing| existing.as_str() != finalizer)
            .cloned()
            .collect();
        if present {
            finalizers.push(finalizer.to_string());
        }

        debug!("Updating finalizers; object.ref={object} finalizer={finalizer} present={present}");
        record_write_issued(object.kind(), "finalizers");
        self.writer
            .set_finalizers(object, observed.resource_version.clone(), finalizers)
            .await?;
        Ok(SyncOutcome::Written)
    }

    /// Drops bookkeeping for an object that went away.
    pub fn forget(&self, object: &ObjectRef) {
        self.pending.remove(object);
    }
}
