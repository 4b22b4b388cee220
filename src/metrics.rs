//! Provisioner Metrics
//!
//! Prometheus counters for provision and delete outcomes, exposed by the
//! binary's `/metrics` endpoint.

use crate::error::{Error, Result};
use prometheus::{IntCounterVec, Opts, Registry};

/// Outcome label values
pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_IGNORED: &str = "ignored";
pub const RESULT_FAILURE: &str = "failure";

/// Counters tracked by the controller
#[derive(Clone)]
pub struct ProvisionerMetrics {
    provisions: IntCounterVec,
    deletions: IntCounterVec,
}

impl ProvisionerMetrics {
    /// Create counters and register them with the given registry
    pub fn register(registry: &Registry) -> Result<Self> {
        let provisions = IntCounterVec::new(
            Opts::new(
                "hostpath_provisioner_provisions_total",
                "Total number of volume provision attempts",
            ),
            &["result"],
        )?;
        let deletions = IntCounterVec::new(
            Opts::new(
                "hostpath_provisioner_deletions_total",
                "Total number of volume delete attempts",
            ),
            &["result"],
        )?;

        registry.register(Box::new(provisions.clone()))?;
        registry.register(Box::new(deletions.clone()))?;

        Ok(Self {
            provisions,
            deletions,
        })
    }

    pub fn record_provision<T>(&self, outcome: &Result<T>) {
        self.provisions
            .with_label_values(&[result_label(outcome)])
            .inc();
    }

    pub fn record_delete<T>(&self, outcome: &Result<T>) {
        self.deletions.with_label_values(&[result_label(outcome)]).inc();
    }

    pub fn provisions(&self, result: &str) -> u64 {
        self.provisions.with_label_values(&[result]).get()
    }

    pub fn deletions(&self, result: &str) -> u64 {
        self.deletions.with_label_values(&[result]).get()
    }
}

fn result_label<T>(outcome: &Result<T>) -> &'static str {
    match outcome {
        Ok(_) => RESULT_SUCCESS,
        Err(Error::Ignored { .. }) => RESULT_IGNORED,
        Err(_) => RESULT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let registry = Registry::new();
        let metrics = ProvisionerMetrics::register(&registry).unwrap();

        metrics.record_provision(&Ok(()));
        metrics.record_provision::<()>(&Err(Error::Internal("boom".into())));
        metrics.record_delete::<()>(&Err(Error::Ignored {
            volume: "pvc-1".into(),
            reason: "not ours".into(),
        }));

        assert_eq!(metrics.provisions(RESULT_SUCCESS), 1);
        assert_eq!(metrics.provisions(RESULT_FAILURE), 1);
        assert_eq!(metrics.deletions(RESULT_IGNORED), 1);
        assert_eq!(metrics.deletions(RESULT_SUCCESS), 0);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ProvisionerMetrics::register(&registry).unwrap();
        assert!(ProvisionerMetrics::register(&registry).is_err());
    }
}
