use dashmap::DashMap;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use kube::Resource;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use strum::{Display as StrumDisplay, EnumIter, IntoStaticStr};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ObjectRefError {
    #[error("Object is missing a name")]
    MissingName,
    #[error("Namespaced {0} is missing a namespace")]
    MissingNamespace(WatchedKind),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, StrumDisplay, IntoStaticStr, EnumIter,
)]
pub enum WatchedKind {
    GatewayClass,
    Gateway,
    HTTPRoute,
    TLSRoute,
    Service,
    Namespace,
    Deployment,
}

impl WatchedKind {
    pub fn is_namespaced(self) -> bool {
        !matches!(self, Self::GatewayClass | Self::Namespace)
    }

    pub fn is_route(self) -> bool {
        matches!(self, Self::HTTPRoute | Self::TLSRoute)
    }
}

#[derive(Getters, CopyGetters, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    #[getset(get_copy = "pub")]
    kind: WatchedKind,

    #[getset(get = "pub")]
    namespace: Option<String>,

    #[getset(get = "pub")]
    name: String,
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

impl ObjectRef {
    pub fn cluster_scoped<S: Into<String>>(kind: WatchedKind, name: S) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced<N: Into<String>, S: Into<String>>(
        kind: WatchedKind,
        namespace: N,
        name: S,
    ) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn for_object<K: Resource>(kind: WatchedKind, object: &K) -> Result<Self, ObjectRefError> {
        let meta = object.meta();
        let name = meta.name.clone().ok_or(ObjectRefError::MissingName)?;

        if kind.is_namespaced() {
            let namespace = meta
                .namespace
                .clone()
                .ok_or(ObjectRefError::MissingNamespace(kind))?;
            Ok(Self::namespaced(kind, namespace, name))
        } else {
            Ok(Self::cluster_scoped(kind, name))
        }
    }

    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

/// How an observed object differs from the cached copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    /// `metadata.generation` or the deletion timestamp moved.
    GenerationChanged,
    /// Anything else (status, labels, finalizers) changed.
    MetadataOrStatusChanged,
    Unchanged,
}

/// Latest observed copy of every object of one kind. Reconcilers read the cluster state from
/// here rather than from the API server.
pub struct ObjectCache<K: Resource> {
    kind: WatchedKind,
    objects: DashMap<ObjectRef, Arc<K>>,
}

impl<K: Resource> ObjectCache<K> {
    pub fn new(kind: WatchedKind) -> Self {
        Self {
            kind,
            objects: DashMap::new(),
        }
    }

    pub fn kind(&self) -> WatchedKind {
        self.kind
    }

    pub fn apply(&self, object: K) -> Result<(ObjectRef, Change), ObjectRefError> {
        let object_ref = ObjectRef::for_object(self.kind, &object)?;
        let object = Arc::new(object);
        let previous = self.objects.insert(object_ref.clone(), object.clone());

        let change = match previous {
            None => Change::Created,
            Some(previous) => classify(previous.as_ref(), object.as_ref()),
        };

        Ok((object_ref, change))
    }

    pub fn remove(&self, object_ref: &ObjectRef) -> Option<Arc<K>> {
        self.objects.remove(object_ref).map(|(_, object)| object)
    }

    pub fn get(&self, object_ref: &ObjectRef) -> Option<Arc<K>> {
        self.objects.get(object_ref).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, object_ref: &ObjectRef) -> bool {
        self.objects.contains_key(object_ref)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Snapshot of the cache, sorted by identity.
    pub fn entries(&self) -> Vec<(ObjectRef, Arc<K>)> {
        self.objects
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .collect()
    }

    /// Drops every object not in `seen` and returns the dropped identities.
    pub fn retain_only(&self, seen: &HashSet<ObjectRef>) -> Vec<ObjectRef> {
        let stale = self
            .objects
            .iter()
            .filter(|entry| !seen.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect_vec();

        for object_ref in &stale {
            self.objects.remove(object_ref);
        }

        stale
    }
}

fn classify<K: Resource>(previous: &K, current: &K) -> Change {
    let previous = previous.meta();
    let current = current.meta();

    if previous.generation != current.generation
        || previous.deletion_timestamp != current.deletion_timestamp
    {
        Change::GenerationChanged
    } else if previous.resource_version.is_some()
        && previous.resource_version == current.resource_version
    {
        Change::Unchanged
    } else {
        Change::MetadataOrStatusChanged
    }
}
