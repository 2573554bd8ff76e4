use crate::kubernetes::objects::{Change, WatchedKind};
use getset::{CopyGetters, Getters};
use portico_api::constants::{DNS_LABEL_MAX_LENGTH, GATEWAY_CLASS_CONTROLLER_NAME};
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Which observed updates of a kind are worth a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFilter {
    /// Every update that changed the object at all.
    All,
    /// Only creations, `metadata.generation` bumps and deletion requests. Status and label
    /// updates still refresh the cache.
    Generation,
}

impl ChangeFilter {
    pub fn admits(self, change: Change) -> bool {
        match (self, change) {
            (_, Change::Unchanged) => false,
            (Self::All, _) => true,
            (Self::Generation, change) => change != Change::MetadataOrStatusChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, TypedBuilder)]
pub struct Options {
    #[getset(get = "pub")]
    #[builder(default = GATEWAY_CLASS_CONTROLLER_NAME.to_string(), setter(into))]
    controller_name: String,

    #[getset(get_copy = "pub")]
    #[builder(default = 2)]
    workers_per_kind: usize,

    #[getset(get_copy = "pub")]
    #[builder(default = 1024)]
    queue_capacity: usize,

    #[getset(get_copy = "pub")]
    #[builder(default = Duration::from_millis(500))]
    retry_backoff_base: Duration,

    #[getset(get_copy = "pub")]
    #[builder(default = Duration::from_secs(60))]
    retry_backoff_max: Duration,

    /// Invariant violations are retried this many times before the key is dropped.
    #[getset(get_copy = "pub")]
    #[builder(default = 5)]
    max_invariant_retries: u32,

    #[getset(get_copy = "pub")]
    #[builder(default = 16)]
    max_store_conflict_retries: usize,

    #[getset(get_copy = "pub")]
    #[builder(default = Duration::from_secs(5))]
    class_teardown_poll: Duration,

    #[getset(get_copy = "pub")]
    #[builder(default = DNS_LABEL_MAX_LENGTH)]
    generated_name_limit: usize,

    #[getset(get_copy = "pub")]
    #[builder(default = ChangeFilter::Generation)]
    gateway_class_changes: ChangeFilter,

    #[getset(get_copy = "pub")]
    #[builder(default = ChangeFilter::Generation)]
    gateway_changes: ChangeFilter,

    #[getset(get_copy = "pub")]
    #[builder(default = ChangeFilter::Generation)]
    route_changes: ChangeFilter,

    #[getset(get_copy = "pub")]
    #[builder(default = ChangeFilter::All)]
    service_changes: ChangeFilter,

    #[getset(get_copy = "pub")]
    #[builder(default = ChangeFilter::All)]
    namespace_changes: ChangeFilter,

    #[getset(get_copy = "pub")]
    #[builder(default = ChangeFilter::All)]
    deployment_changes: ChangeFilter,
}

impl Default for Options {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Options {
    pub fn change_filter(&self, kind: WatchedKind) -> ChangeFilter {
        match kind {
            WatchedKind::GatewayClass => self.gateway_class_changes,
            WatchedKind::Gateway => self.gateway_changes,
            WatchedKind::HTTPRoute | WatchedKind::TLSRoute => self.route_changes,
            WatchedKind::Service => self.service_changes,
            WatchedKind::Namespace => self.namespace_changes,
            WatchedKind::Deployment => self.deployment_changes,
        }
    }
}
