//! Error types for the HostPath Provisioner
//!
//! Every failure keeps its kind intact up to the caller so the controller can
//! tell a retryable fault from a volume that belongs to another instance.

use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Invalid provisioning request: {0}")]
    InvalidRequest(String),

    #[error("Invalid volume {volume}: {reason}")]
    InvalidVolume { volume: String, reason: String },

    // =========================================================================
    // Ownership Errors
    // =========================================================================
    #[error("Identity annotation not found on volume {volume}")]
    MissingIdentity { volume: String },

    /// The volume was created by a different provisioner instance.
    #[error("Ignoring volume {volume}: {reason}")]
    Ignored { volume: String, reason: String },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue after the resync period
    Requeue,
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry after the resync period
            Error::Kube(_) | Error::Io(_) => ErrorAction::Requeue,

            // Another instance owns the volume; our identity never changes
            Error::Ignored { .. } => ErrorAction::NoRequeue,

            // Malformed input - wait for the object to change
            Error::MissingIdentity { .. }
            | Error::InvalidRequest(_)
            | Error::InvalidVolume { .. }
            | Error::Configuration(_) => ErrorAction::NoRequeue,

            // All other errors - retry
            _ => ErrorAction::Requeue,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error marks a volume owned by someone else
    pub fn is_ignored(&self) -> bool {
        matches!(self, Error::Ignored { .. })
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
