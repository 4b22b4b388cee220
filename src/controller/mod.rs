//! Controller Adapter
//!
//! Connects the provisioner to the cluster: matching claims, mapping objects
//! and reconciling through the kube-rs controller runtime.

pub mod objects;
pub mod reconciler;

pub use objects::*;
pub use reconciler::*;
