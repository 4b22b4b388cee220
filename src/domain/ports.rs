//! Domain Ports - Core trait definitions for the provisioner
//!
//! These types describe a claim coming in and a volume going out. The
//! controller adapter translates Kubernetes objects to and from them, so a
//! backend never sees the orchestration API.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// Annotation Keys
// =============================================================================

/// Annotation stamped on every volume with the creating instance's identity
pub const IDENTITY_ANNOTATION: &str = "hostPathProvisionerIdentity";

/// Claim annotation that overrides the default reclaim policy
pub const RECLAIM_POLICY_ANNOTATION: &str = "persistentVolumeReclaimPolicy";

// =============================================================================
// Reclaim Policy
// =============================================================================

/// What happens to the backing asset once its volume is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReclaimPolicy {
    Retain,
    Delete,
}

impl ReclaimPolicy {
    /// Strict, case-sensitive match against the recognized values
    pub fn from_annotation(value: &str) -> Option<Self> {
        match value {
            "Retain" => Some(ReclaimPolicy::Retain),
            "Delete" => Some(ReclaimPolicy::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimPolicy::Retain => "Retain",
            ReclaimPolicy::Delete => "Delete",
        }
    }
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReclaimPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ReclaimPolicy::from_annotation(s).ok_or_else(|| {
            Error::Configuration(format!(
                "default reclaim policy should be 'Delete' or 'Retain', got '{}'",
                s
            ))
        })
    }
}

// =============================================================================
// Provisioner Identity
// =============================================================================

/// Opaque token identifying one running provisioner instance.
///
/// Generated once at startup and never mutated. Volumes carry it in
/// [`IDENTITY_ANNOTATION`] so deletion can be gated to the creating instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvisionerIdentity(String);

impl ProvisionerIdentity {
    /// Generate a fresh identity for this process
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProvisionerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Provisioning Request/Response
// =============================================================================

/// Reference to the claim a volume was provisioned for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReference {
    pub namespace: String,
    pub name: String,
    /// UID of the claim, when known
    pub uid: Option<String>,
}

impl ClaimReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
        }
    }
}

impl std::fmt::Display for ClaimReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Request to provision storage for a claim
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    /// Name the caller wants the volume to have
    pub volume_name: String,
    /// Claim being provisioned
    pub claim: ClaimReference,
    /// Requested access modes, passed through untouched
    pub access_modes: Vec<String>,
    /// Requested storage capacity as a quantity string (e.g. "5Gi")
    pub capacity: String,
    /// Claim annotations
    pub annotations: BTreeMap<String, String>,
}

impl ProvisioningRequest {
    /// Value of the per-claim reclaim policy override, if any
    pub fn reclaim_policy_override(&self) -> Option<&str> {
        self.annotations
            .get(RECLAIM_POLICY_ANNOTATION)
            .map(String::as_str)
    }
}

/// Backend-specific location of a provisioned asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    /// Absolute directory path on the host
    HostPath { path: String },
}

/// Description of a provisioned volume, as published to the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVolume {
    /// Volume name, assigned by the caller
    pub name: String,
    /// Annotations, including [`IDENTITY_ANNOTATION`]
    pub annotations: BTreeMap<String, String>,
    pub reclaim_policy: ReclaimPolicy,
    pub access_modes: Vec<String>,
    pub capacity: String,
    /// Claim the volume was created for
    pub claim: Option<ClaimReference>,
    pub source: VolumeSource,
}

impl ProvisionedVolume {
    /// Identity of the instance that created this volume
    pub fn identity(&self) -> Option<&str> {
        self.annotations.get(IDENTITY_ANNOTATION).map(String::as_str)
    }
}

// =============================================================================
// Provisioner Port
// =============================================================================

/// Port for dynamic volume provisioning.
///
/// Both operations block until the backing asset has been created or removed.
/// Callers must serialize calls that target the same claim or volume.
pub trait Provisioner: Send + Sync {
    /// Create a storage asset and describe it as a volume
    fn provision(&self, request: ProvisioningRequest) -> Result<ProvisionedVolume>;

    /// Remove the storage asset behind a volume created by [`Provisioner::provision`]
    fn delete(&self, volume: &ProvisionedVolume) -> Result<()>;

    /// Get backend name
    fn backend_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ProvisionerRef = Arc<dyn Provisioner>;
