use crate::kubernetes::objects::ObjectRef;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("Write to {0} was rejected because the object changed")]
    Conflict(ObjectRef),
    #[error("{0} no longer exists")]
    NotFound(ObjectRef),
    #[error("Write to {object} failed: {message}")]
    Transient { object: ObjectRef, message: String },
}

/// Writes computed state back to cluster objects. Implementations must reject writes whose
/// `resource_version` is stale with [`WriteError::Conflict`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Merges `status` into the object's status subresource.
    async fn patch_status(
        &self,
        object: &ObjectRef,
        resource_version: Option<String>,
        status: Value,
    ) -> Result<(), WriteError>;

    /// Replaces `metadata.finalizers`.
    async fn set_finalizers(
        &self,
        object: &ObjectRef,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), WriteError>;
}
