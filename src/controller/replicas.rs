use crate::resource::Resource;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Percentage must be between 0 and 100, got {0}")]
    PercentageOutOfRange(i32),

    #[error("Baseline-and-canary-replicas must be between 0 and 100, got {0}")]
    ReplicaOverrideOutOfRange(i32),

    #[error("Percentage is required for the canary strategy")]
    PercentageRequired,
}

pub fn validate_percentage(percentage: i32) -> Result<i32, ValidationError> {
    if (0..=100).contains(&percentage) {
        Ok(percentage)
    } else {
        Err(ValidationError::PercentageOutOfRange(percentage))
    }
}

pub fn validate_replica_override(replicas: i32) -> Result<i32, ValidationError> {
    if (0..=100).contains(&replicas) {
        Ok(replicas)
    } else {
        Err(ValidationError::ReplicaOverrideOutOfRange(replicas))
    }
}

/// Canary replica count as a share of `base_replicas`
///
/// Rounds half up: 10 replicas at 25% gives 3 (2.5 rounded), at 20% gives 2.
/// Non-decreasing in `percentage` for a fixed base.
///
/// # Examples
/// ```ignore
/// assert_eq!(calculate_canary_replicas(10, 20), 2);
/// assert_eq!(calculate_canary_replicas(3, 50), 2);
/// assert_eq!(calculate_canary_replicas(3, 0), 0);
/// ```
pub fn calculate_canary_replicas(base_replicas: i32, percentage: i32) -> i32 {
    let base = i64::from(base_replicas.max(0));
    let percentage = i64::from(percentage.clamp(0, 100));
    ((base * percentage + 50) / 100) as i32
}

/// Replica count for the canary and baseline variants of `resource`
///
/// An explicit override wins; otherwise the count is derived from the
/// resource's own declared replicas.
pub fn canary_replica_count(resource: &Resource, percentage: i32, replica_override: Option<i32>) -> i32 {
    match replica_override {
        Some(replicas) => replicas,
        None => calculate_canary_replicas(resource.replica_count().unwrap_or(0), percentage),
    }
}
