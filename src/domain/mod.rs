//! Domain layer - Core types and port definitions
//!
//! This module defines the provisioning contract that backends implement,
//! following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
