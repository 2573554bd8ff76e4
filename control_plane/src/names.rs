//! Stable names for generated child resources.
//!
//! Child resources (the proxy Deployment and Service of a Gateway, label values pointing back
//! to their owner) are named after their parent. Kubernetes caps most of those names at 63
//! characters, so long parent names are replaced by a readable prefix followed by a digest of
//! the full logical identity.

use portico_api::constants::{GATEWAY_DEPLOYMENT_SUFFIX, GATEWAY_SERVICE_SUFFIX};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of hex characters of the digest kept in a shortened name.
pub const HASH_LENGTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Parent name must not be empty")]
    EmptyParentName,
}

pub fn resolve(
    parent_name: &str,
    namespace: &str,
    suffix: &str,
    limit: usize,
) -> Result<String, NameError> {
    if parent_name.is_empty() {
        return Err(NameError::EmptyParentName);
    }

    if parent_name.len() + suffix.len() <= limit {
        return Ok(format!("{parent_name}{suffix}"));
    }

    let digest = identity_digest(parent_name, namespace, suffix);

    // Not enough room for "<prefix>-<digest>", fall back to the digest alone
    if limit < HASH_LENGTH + 2 {
        return Ok(digest.chars().take(limit).collect());
    }

    // Lowercasing may change byte lengths, so the budget is applied afterwards
    let lowered = parent_name.to_lowercase();
    let mut end = (limit - HASH_LENGTH - 1).min(lowered.len());
    while !lowered.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = lowered[..end].trim_end_matches(['-', '.']);

    if prefix.is_empty() {
        Ok(digest[..HASH_LENGTH].to_string())
    } else {
        Ok(format!("{prefix}-{}", &digest[..HASH_LENGTH]))
    }
}

fn identity_digest(parent_name: &str, namespace: &str, suffix: &str) -> String {
    let mut hasher = Sha256::new();
    // Separators keep ("ab", "c") and ("a", "bc") apart
    hasher.update(namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(parent_name.as_bytes());
    hasher.update(b"/");
    hasher.update(suffix.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Names of the infrastructure generated for a Gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfraNames {
    pub deployment: String,
    pub service: String,
    pub owner_label_value: String,
}

impl GatewayInfraNames {
    pub fn for_gateway(
        gateway_name: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Self, NameError> {
        Ok(Self {
            deployment: resolve(gateway_name, namespace, GATEWAY_DEPLOYMENT_SUFFIX, limit)?,
            service: resolve(gateway_name, namespace, GATEWAY_SERVICE_SUFFIX, limit)?,
            owner_label_value: resolve(gateway_name, namespace, "", limit)?,
        })
    }
}
