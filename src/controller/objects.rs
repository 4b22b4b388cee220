//! Kubernetes Object Mapping
//!
//! Translates claims and volumes between their Kubernetes representation and
//! the domain model, and decides which objects this provisioner acts on.

use crate::domain::ports::{
    ClaimReference, ProvisionedVolume, ProvisioningRequest, ReclaimPolicy, VolumeSource,
};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::{
    HostPathVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeSpec,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

// =============================================================================
// Well-Known Keys
// =============================================================================

/// Claim annotation naming the provisioner that should serve it
pub const STORAGE_PROVISIONER_ANNOTATION: &str = "volume.kubernetes.io/storage-provisioner";

/// Legacy form of [`STORAGE_PROVISIONER_ANNOTATION`]
pub const BETA_STORAGE_PROVISIONER_ANNOTATION: &str =
    "volume.beta.kubernetes.io/storage-provisioner";

/// Legacy claim annotation naming the storage class
pub const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

/// Volume annotation recording which provisioner created it
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

/// Resource name for requested capacity
pub const STORAGE_RESOURCE: &str = "storage";

const PHASE_RELEASED: &str = "Released";

// =============================================================================
// Claim Matching
// =============================================================================

/// Provisioner requested through the claim's annotations
pub fn claim_provisioner(claim: &PersistentVolumeClaim) -> Option<&str> {
    let annotations = claim.metadata.annotations.as_ref()?;
    annotations
        .get(STORAGE_PROVISIONER_ANNOTATION)
        .or_else(|| annotations.get(BETA_STORAGE_PROVISIONER_ANNOTATION))
        .map(String::as_str)
}

/// Storage class requested by the claim
pub fn claim_storage_class(claim: &PersistentVolumeClaim) -> Option<&str> {
    let from_spec = claim
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.as_deref())
        .filter(|name| !name.is_empty());

    from_spec.or_else(|| {
        claim
            .metadata
            .annotations
            .as_ref()?
            .get(BETA_STORAGE_CLASS_ANNOTATION)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    })
}

/// Whether the claim asks for the named provisioner.
///
/// The claim's provisioner annotation decides when present; otherwise the
/// provisioner of its storage class does. `class` is only consulted in the
/// second case.
pub fn claim_wants(
    claim: &PersistentVolumeClaim,
    class: Option<&StorageClass>,
    provisioner_name: &str,
) -> bool {
    match claim_provisioner(claim) {
        Some(provisioner) => provisioner == provisioner_name,
        None => class.map_or(false, |c| c.provisioner == provisioner_name),
    }
}

/// Whether the claim still waits for a volume
pub fn is_unbound(claim: &PersistentVolumeClaim) -> bool {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .map_or(true, str::is_empty)
}

/// Whether a released volume should have its asset destroyed by us
pub fn should_delete(volume: &PersistentVolume, provisioner_name: &str) -> bool {
    let released = volume
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some(PHASE_RELEASED);

    let policy_delete = volume
        .spec
        .as_ref()
        .and_then(|s| s.persistent_volume_reclaim_policy.as_deref())
        == Some(ReclaimPolicy::Delete.as_str());

    let ours = volume
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PROVISIONED_BY_ANNOTATION))
        .map(String::as_str)
        == Some(provisioner_name);

    released && policy_delete && ours
}

// =============================================================================
// Claim -> Request
// =============================================================================

/// Volume name for a claim, derived from its UID
pub fn volume_name_for(claim: &PersistentVolumeClaim) -> Result<String> {
    claim
        .metadata
        .uid
        .as_deref()
        .filter(|uid| !uid.is_empty())
        .map(|uid| format!("pvc-{}", uid))
        .ok_or_else(|| Error::InvalidRequest("claim has no UID".into()))
}

/// Build a provisioning request from a claim
pub fn request_from_claim(
    claim: &PersistentVolumeClaim,
    volume_name: String,
) -> Result<ProvisioningRequest> {
    let namespace = claim
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| Error::InvalidRequest("claim has no namespace".into()))?;
    let name = claim
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::InvalidRequest("claim has no name".into()))?;

    let spec = claim.spec.as_ref();
    let capacity = spec
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|requests| requests.get(STORAGE_RESOURCE))
        .map(|quantity| quantity.0.clone())
        .ok_or_else(|| {
            Error::InvalidRequest(format!(
                "claim {}/{} does not request {} capacity",
                namespace, name, STORAGE_RESOURCE
            ))
        })?;

    Ok(ProvisioningRequest {
        volume_name,
        claim: ClaimReference {
            namespace,
            name,
            uid: claim.metadata.uid.clone(),
        },
        access_modes: spec
            .and_then(|s| s.access_modes.clone())
            .unwrap_or_default(),
        capacity,
        annotations: claim.metadata.annotations.clone().unwrap_or_default(),
    })
}

// =============================================================================
// Volume <-> PersistentVolume
// =============================================================================

/// Render a provisioned volume as a PersistentVolume object
pub fn persistent_volume(
    volume: &ProvisionedVolume,
    provisioner_name: &str,
    storage_class: Option<&str>,
) -> PersistentVolume {
    let mut annotations = volume.annotations.clone();
    annotations.insert(
        PROVISIONED_BY_ANNOTATION.to_string(),
        provisioner_name.to_string(),
    );

    let mut capacity = BTreeMap::new();
    capacity.insert(
        STORAGE_RESOURCE.to_string(),
        Quantity(volume.capacity.clone()),
    );

    let claim_ref = volume.claim.as_ref().map(|claim| ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        namespace: Some(claim.namespace.clone()),
        name: Some(claim.name.clone()),
        uid: claim.uid.clone(),
        ..Default::default()
    });

    let host_path = match &volume.source {
        VolumeSource::HostPath { path } => HostPathVolumeSource {
            path: path.clone(),
            type_: None,
        },
    };

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(volume.name.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            persistent_volume_reclaim_policy: Some(volume.reclaim_policy.as_str().to_string()),
            access_modes: Some(volume.access_modes.clone()),
            capacity: Some(capacity),
            claim_ref,
            storage_class_name: storage_class.map(str::to_string),
            host_path: Some(host_path),
            ..Default::default()
        }),
        status: None,
    }
}

/// Read a PersistentVolume back into the domain model
pub fn volume_from_persistent_volume(pv: &PersistentVolume) -> Result<ProvisionedVolume> {
    let name = pv
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::InvalidRequest("volume has no name".into()))?;
    let invalid = |reason: &str| Error::InvalidVolume {
        volume: name.clone(),
        reason: reason.to_string(),
    };

    let spec = pv.spec.as_ref().ok_or_else(|| invalid("no spec"))?;

    let reclaim_policy = spec
        .persistent_volume_reclaim_policy
        .as_deref()
        .and_then(ReclaimPolicy::from_annotation)
        .ok_or_else(|| invalid("unrecognized reclaim policy"))?;

    let path = spec
        .host_path
        .as_ref()
        .map(|h| h.path.clone())
        .ok_or_else(|| invalid("not a hostPath volume"))?;

    let claim = spec.claim_ref.as_ref().and_then(|r| {
        Some(ClaimReference {
            namespace: r.namespace.clone()?,
            name: r.name.clone()?,
            uid: r.uid.clone(),
        })
    });

    let capacity = spec
        .capacity
        .as_ref()
        .and_then(|c| c.get(STORAGE_RESOURCE))
        .map(|q| q.0.clone())
        .unwrap_or_default();

    Ok(ProvisionedVolume {
        name,
        annotations: pv.metadata.annotations.clone().unwrap_or_default(),
        reclaim_policy,
        access_modes: spec.access_modes.clone().unwrap_or_default(),
        capacity,
        claim,
        source: VolumeSource::HostPath { path },
    })
}
