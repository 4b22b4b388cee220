//! HostPath Provisioner
//!
//! Backs every claim with a directory on the local filesystem at
//! `<root>/<claim-namespace>/<claim-name>`.

use crate::domain::ports::{
    ClaimReference, ProvisionedVolume, Provisioner, ProvisionerIdentity, ProvisioningRequest,
    ReclaimPolicy, VolumeSource, IDENTITY_ANNOTATION,
};
use crate::error::{Error, Result};
use crate::provisioner::reclaim::resolve_reclaim_policy;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HostPath provisioner
#[derive(Debug, Clone)]
pub struct HostPathConfig {
    /// Directory under which volume directories are created
    pub root_dir: PathBuf,
    /// Policy applied when a claim carries no valid override
    pub default_reclaim_policy: ReclaimPolicy,
    /// Permission bits for new volume directories
    pub dir_mode: u32,
}

impl Default for HostPathConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/tmp/hostpath-provisioner"),
            default_reclaim_policy: ReclaimPolicy::Delete,
            dir_mode: 0o777,
        }
    }
}

// =============================================================================
// HostPath Provisioner
// =============================================================================

/// Provisioner that creates one host directory per claim
#[derive(Debug)]
pub struct HostPathProvisioner {
    config: HostPathConfig,
    identity: ProvisionerIdentity,
}

impl HostPathProvisioner {
    /// Create a provisioner with a freshly generated identity
    pub fn new(config: HostPathConfig) -> Self {
        Self::with_identity(config, ProvisionerIdentity::generate())
    }

    /// Create a provisioner with a known identity
    pub fn with_identity(config: HostPathConfig, identity: ProvisionerIdentity) -> Self {
        Self { config, identity }
    }

    pub fn identity(&self) -> &ProvisionerIdentity {
        &self.identity
    }

    pub fn config(&self) -> &HostPathConfig {
        &self.config
    }

    /// Directory backing the given claim
    pub fn volume_path(&self, claim: &ClaimReference) -> Result<PathBuf> {
        validate_component("namespace", &claim.namespace)?;
        validate_component("name", &claim.name)?;
        Ok(self.config.root_dir.join(&claim.namespace).join(&claim.name))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        // Ancestors that do not exist yet, nearest first
        let missing: Vec<&Path> = path
            .ancestors()
            .skip(1)
            .take_while(|dir| !dir.as_os_str().is_empty() && !dir.exists())
            .collect();

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(self.config.dir_mode);
        }
        builder.create(path)?;

        // The process umask narrows the mode given to mkdir. The leaf is
        // always reset so a retry after an interrupted create converges.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for dir in missing.iter().rev().copied().chain(std::iter::once(path)) {
                fs::set_permissions(dir, fs::Permissions::from_mode(self.config.dir_mode))?;
            }
        }
        #[cfg(not(unix))]
        let _ = missing;

        Ok(())
    }
}

impl Provisioner for HostPathProvisioner {
    fn provision(&self, request: ProvisioningRequest) -> Result<ProvisionedVolume> {
        let path = self.volume_path(&request.claim)?;

        let reclaim_policy = resolve_reclaim_policy(
            request.reclaim_policy_override(),
            self.config.default_reclaim_policy,
        );
        debug!(
            "Resolved reclaim policy {} for claim {}",
            reclaim_policy, request.claim
        );

        self.create_dir(&path)?;

        info!(
            "Provisioned volume {} for claim {} at {}",
            request.volume_name,
            request.claim,
            path.display()
        );

        let mut annotations = BTreeMap::new();
        annotations.insert(
            IDENTITY_ANNOTATION.to_string(),
            self.identity.as_str().to_string(),
        );

        Ok(ProvisionedVolume {
            name: request.volume_name,
            annotations,
            reclaim_policy,
            access_modes: request.access_modes,
            capacity: request.capacity,
            claim: Some(request.claim),
            source: VolumeSource::HostPath {
                path: path.to_string_lossy().into_owned(),
            },
        })
    }

    fn delete(&self, volume: &ProvisionedVolume) -> Result<()> {
        let identity = volume.identity().ok_or_else(|| Error::MissingIdentity {
            volume: volume.name.clone(),
        })?;

        if identity != self.identity.as_str() {
            return Err(Error::Ignored {
                volume: volume.name.clone(),
                reason: "identity annotation on volume does not match ours".into(),
            });
        }

        let claim = volume.claim.as_ref().ok_or_else(|| Error::InvalidVolume {
            volume: volume.name.clone(),
            reason: "no claim reference recorded".into(),
        })?;
        let path = self.volume_path(claim)?;

        match fs::remove_dir_all(&path) {
            Ok(()) => info!("Deleted volume {} at {}", volume.name, path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Volume {} already removed from {}", volume.name, path.display())
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    fn backend_name(&self) -> &str {
        "hostpath"
    }
}

/// Reject path components that would escape the namespace directory
fn validate_component(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidRequest(format!("claim {} is empty", field)));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\\') {
        return Err(Error::InvalidRequest(format!(
            "claim {} '{}' is not a valid path component",
            field, value
        )));
    }
    Ok(())
}
