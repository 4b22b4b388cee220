//! Provisioner Backends
//!
//! - HostPath: one local directory per claim
//! - Reclaim policy resolution shared by all backends

pub mod hostpath;
pub mod reclaim;

pub use hostpath::*;
pub use reclaim::*;
