//! Shared-resource objects, the lister and authorization collaborator
//! interfaces, and share resolution.
//!
//! The watch layer that keeps share objects fresh and the authorization
//! engine itself live outside this crate; both are consumed through the
//! constructor-injected [`ShareLister`] and [`AccessReviewer`] traits so
//! tests can substitute fakes without touching shared state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::DriverError;
use crate::types::{PodIdentity, SHARED_CONFIGMAP_KEY, SHARED_SECRET_KEY};

// ---------------------------------------------------------------------------
// Share objects
// ---------------------------------------------------------------------------

/// Namespaced reference to the object backing a share.
///
/// Both fields must be non-empty for the share to be mountable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
}

/// Cluster-scoped share exposing a ConfigMap to authorized workloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedConfigMap {
    /// Name of the share object itself.
    pub name: String,
    /// The ConfigMap this share exposes.
    pub config_map_ref: ResourceRef,
}

/// Cluster-scoped share exposing a Secret to authorized workloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedSecret {
    /// Name of the share object itself.
    pub name: String,
    /// The Secret this share exposes.
    pub secret_ref: ResourceRef,
}

/// The kind of object a share references, as presented to authorization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMap => f.write_str("ConfigMap"),
            Self::Secret => f.write_str("Secret"),
        }
    }
}

/// A share resolved from the request's volume attributes, tagged by kind.
///
/// Exactly one kind can be referenced per volume; the resolver enforces this
/// before anything is looked up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolvedShare {
    ConfigMap(SharedConfigMap),
    Secret(SharedSecret),
}

impl ResolvedShare {
    /// Canonical name of the share object.
    pub fn share_name(&self) -> &str {
        match self {
            Self::ConfigMap(s) => &s.name,
            Self::Secret(s) => &s.name,
        }
    }

    /// Kind of the backing object.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::ConfigMap(_) => ResourceKind::ConfigMap,
            Self::Secret(_) => ResourceKind::Secret,
        }
    }

    /// Namespaced reference to the backing object.
    pub fn backing(&self) -> &ResourceRef {
        match self {
            Self::ConfigMap(s) => &s.config_map_ref,
            Self::Secret(s) => &s.secret_ref,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator interfaces
// ---------------------------------------------------------------------------

/// Read-only lookup into the local cache of share objects, keyed separately
/// for the two share kinds.
///
/// Lookups are synchronous: the cache is kept fresh by an external watch loop
/// and queried in-memory here.
pub trait ShareLister: Send + Sync {
    fn shared_config_map(&self, name: &str) -> Option<SharedConfigMap>;
    fn shared_secret(&self, name: &str) -> Option<SharedSecret>;
}

/// Outcome of a subject access review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessReview {
    pub allowed: bool,
    /// Reason attached by the decision service, surfaced on denial.
    #[serde(default)]
    pub reason: String,
}

/// Query interface to the cluster's authorization decision service.
///
/// This is the sole place where cross-cutting access policy is enforced; no
/// other component may materialize share content without passing through it.
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    /// Ask whether `identity` may consume the share named `share_name` of
    /// the given backing `kind`.
    async fn can_access(
        &self,
        share_name: &str,
        identity: &PodIdentity,
        kind: ResourceKind,
    ) -> Result<AccessReview, DriverError>;
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn blank(value: Option<&String>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Resolve the single share a request references.
///
/// Fails with an invalid-argument error when the attributes name neither or
/// both share kinds, when the named share is not in the cache (a caller
/// input error, not a lookup failure), or when the resolved share's backing
/// reference is not fully specified.
pub fn resolve_share(
    lister: &dyn ShareLister,
    volume_context: &HashMap<String, String>,
) -> Result<ResolvedShare, DriverError> {
    let cm_name = volume_context.get(SHARED_CONFIGMAP_KEY);
    let secret_name = volume_context.get(SHARED_SECRET_KEY);

    if blank(cm_name) && blank(secret_name) {
        return Err(DriverError::InvalidArgument(format!(
            "the volume attributes are missing both {SHARED_CONFIGMAP_KEY:?} and {SHARED_SECRET_KEY:?}"
        )));
    }
    if (cm_name.is_some() && secret_name.is_some())
        || (!blank(cm_name) && !blank(secret_name))
    {
        return Err(DriverError::InvalidArgument(format!(
            "a single volume cannot reference both a shared ConfigMap {:?} and a shared Secret {:?}",
            cm_name.map(String::as_str).unwrap_or_default(),
            secret_name.map(String::as_str).unwrap_or_default(),
        )));
    }

    let cm_name = cm_name.map(String::as_str).filter(|n| !n.trim().is_empty());
    let secret_name = secret_name
        .map(String::as_str)
        .filter(|n| !n.trim().is_empty());

    let resolved = if let Some(name) = cm_name {
        let share = lister.shared_config_map(name).ok_or_else(|| {
            DriverError::InvalidArgument(format!(
                "the volume attribute {name:?} does not reference a known shared ConfigMap"
            ))
        })?;
        ResolvedShare::ConfigMap(share)
    } else if let Some(name) = secret_name {
        let share = lister.shared_secret(name).ok_or_else(|| {
            DriverError::InvalidArgument(format!(
                "the volume attribute {name:?} does not reference a known shared Secret"
            ))
        })?;
        ResolvedShare::Secret(share)
    } else {
        // The guards above make this unreachable; fail closed anyway.
        return Err(DriverError::InvalidArgument(format!(
            "the volume attributes are missing both {SHARED_CONFIGMAP_KEY:?} and {SHARED_SECRET_KEY:?}"
        )));
    };

    let backing = resolved.backing();
    if backing.namespace.trim().is_empty() {
        return Err(DriverError::InvalidArgument(format!(
            "the shared {} {:?} backing resource namespace needs to be set",
            resolved.kind(),
            resolved.share_name(),
        )));
    }
    if backing.name.trim().is_empty() {
        return Err(DriverError::InvalidArgument(format!(
            "the shared {} {:?} backing resource name needs to be set",
            resolved.kind(),
            resolved.share_name(),
        )));
    }

    Ok(resolved)
}
