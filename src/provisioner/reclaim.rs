//! Reclaim Policy Resolution
//!
//! Decides whether a freshly provisioned volume is retained or deleted after
//! release. Only the exact values "Retain" and "Delete" on the claim override
//! the process-wide default.

use crate::domain::ports::ReclaimPolicy;

/// Resolve the reclaim policy for a claim
pub fn resolve_reclaim_policy(annotation: Option<&str>, default: ReclaimPolicy) -> ReclaimPolicy {
    annotation
        .and_then(ReclaimPolicy::from_annotation)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_override_wins() {
        for default in [ReclaimPolicy::Retain, ReclaimPolicy::Delete] {
            assert_eq!(resolve_reclaim_policy(Some("Retain"), default), ReclaimPolicy::Retain);
            assert_eq!(resolve_reclaim_policy(Some("Delete"), default), ReclaimPolicy::Delete);
        }
    }

    #[test]
    fn test_unrecognized_falls_back_to_default() {
        for value in [None, Some(""), Some("retain"), Some("DELETE"), Some("foo"), Some(" Retain")] {
            assert_eq!(
                resolve_reclaim_policy(value, ReclaimPolicy::Delete),
                ReclaimPolicy::Delete
            );
            assert_eq!(
                resolve_reclaim_policy(value, ReclaimPolicy::Retain),
                ReclaimPolicy::Retain
            );
        }
    }
}
