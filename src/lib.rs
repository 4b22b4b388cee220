//! HostPath Provisioner - Dynamic Volume Provisioning
//!
//! A Kubernetes provisioner that satisfies PersistentVolumeClaims with
//! directories on the host filesystem.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │              kube-rs controller runtime (watch/queue)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐        ┌────────────────────────┐  │
//! │  │   Claim reconciler   │        │   Volume reconciler    │  │
//! │  │  (Requested → PV)    │        │  (Released → deleted)  │  │
//! │  └──────────┬───────────┘        └───────────┬────────────┘  │
//! │             └───────────────┬────────────────┘               │
//! │                 ┌───────────┴───────────┐                    │
//! │                 │  Provisioner (trait)  │                    │
//! │                 └───────────┬───────────┘                    │
//! ├─────────────────────────────┼────────────────────────────────┤
//! │                 ┌───────────┴───────────┐                    │
//! │                 │  HostPath backend     │                    │
//! │                 │  <root>/<ns>/<name>   │                    │
//! │                 └───────────────────────┘                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Claim matching, object mapping and reconcilers
//! - [`provisioner`]: Storage backends and reclaim policy resolution
//! - [`domain`]: Core domain types and traits
//! - [`metrics`]: Prometheus counters
//! - [`error`]: Error types and handling

pub mod controller;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod provisioner;

// Re-export commonly used types
pub use controller::{ControllerConfig, ProvisionController};

pub use domain::ports::{
    ClaimReference, ProvisionedVolume, Provisioner, ProvisionerIdentity, ProvisionerRef,
    ProvisioningRequest, ReclaimPolicy, VolumeSource, IDENTITY_ANNOTATION,
    RECLAIM_POLICY_ANNOTATION,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::ProvisionerMetrics;

pub use provisioner::{resolve_reclaim_policy, HostPathConfig, HostPathProvisioner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
