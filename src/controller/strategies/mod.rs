//! Strategy pattern for rollout actions
//!
//! Each deployment strategy implements [`DeploymentStrategyHandler`]:
//! - BasicStrategyHandler: apply manifests as given
//! - CanaryStrategyHandler: stable/canary/baseline variants, pod- or mesh-weighted
//! - BlueGreenStrategyHandler: green variants behind service, ingress or split routing

pub mod basic;
pub mod blue_green;
pub mod canary;

use super::replicas::ValidationError;
use super::stability::{check_manifest_stability, StabilityError};
use super::traffic_split::WeightError;
use super::Context;
use crate::cluster::{apply_checked, ClusterError, ResourceRef};
use crate::config::{Action, DeployConfig, DeploymentStrategy, RouteMethod};
use crate::resource::{Resource, ResourceError, ResourceKind};
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Errors specific to strategy execution
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Malformed resource: {0}")]
    Resource(#[from] ResourceError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Stability(#[from] StabilityError),

    #[error("Traffic is not fully routed to green ({0} method); promote aborted")]
    NotRoutedToGreen(RouteMethod),

    #[error("{0} exists but is not labelled as the stable version")]
    StableNotMarked(String),

    #[error("The {strategy} strategy does not support the {action} action")]
    UnsupportedAction {
        strategy: &'static str,
        action: Action,
    },

    #[error("Invalid traffic split weights: {0}")]
    InvalidWeights(#[from] WeightError),
}

/// What one strategy action wrote to and removed from the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutOutcome {
    pub applied: Vec<ResourceRef>,
    pub deleted: Vec<ResourceRef>,
}

impl RolloutOutcome {
    pub fn record_applied(&mut self, resources: &[Resource]) {
        self.applied.extend(resources.iter().map(ResourceRef::of));
    }
}

/// Strategy trait for the three deployment strategies
///
/// Every action builds fresh variants from the given manifests plus at
/// most one fetch of prior cluster state per object, so repeating an action
/// with the same inputs converges on the same cluster state.
#[async_trait]
pub trait DeploymentStrategyHandler: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    async fn deploy(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError>;

    async fn promote(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError>;

    async fn reject(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError>;

    /// Does this strategy have promote/reject phases?
    fn supports_promotion(&self) -> bool;
}

/// Select the strategy handler for the configured strategy
pub fn select_strategy(config: &DeployConfig) -> Box<dyn DeploymentStrategyHandler> {
    use basic::BasicStrategyHandler;
    use blue_green::BlueGreenStrategyHandler;
    use canary::CanaryStrategyHandler;

    match config.strategy {
        DeploymentStrategy::Basic => Box::new(BasicStrategyHandler),
        DeploymentStrategy::Canary => {
            Box::new(CanaryStrategyHandler::new(config.traffic_split_method))
        }
        DeploymentStrategy::BlueGreen => {
            Box::new(BlueGreenStrategyHandler::new(config.route_method))
        }
    }
}

/// Apply with the configured force flag and record what was written
pub(crate) async fn apply_and_record(
    ctx: &Context,
    resources: &[Resource],
    outcome: &mut RolloutOutcome,
    strategy: &'static str,
) -> Result<(), StrategyError> {
    if resources.is_empty() {
        return Ok(());
    }

    info!(
        strategy,
        objects = resources.len(),
        force = ctx.config.force,
        "Applying manifests"
    );
    apply_checked(ctx.cluster.as_ref(), resources, ctx.config.force).await?;
    outcome.record_applied(resources);
    Ok(())
}

/// Workloads and services among `resources`, as stability check targets
pub(crate) fn stability_targets(resources: &[Resource]) -> Vec<ResourceRef> {
    resources
        .iter()
        .filter(|r| {
            let kind = r.resource_kind();
            kind.is_workload() || kind == ResourceKind::Service
        })
        .map(ResourceRef::of)
        .collect()
}

pub(crate) async fn check_stability(
    ctx: &Context,
    resources: &[Resource],
) -> Result<(), StrategyError> {
    let targets = stability_targets(resources);
    if targets.is_empty() {
        return Ok(());
    }
    check_manifest_stability(ctx, &targets).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::TrafficSplitMethod;
    use serde_json::json;

    fn config(strategy: DeploymentStrategy) -> DeployConfig {
        DeployConfig {
            strategy,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_strategy_basic() {
        let strategy = select_strategy(&config(DeploymentStrategy::Basic));
        assert_eq!(strategy.name(), "basic");
        assert!(!strategy.supports_promotion());
    }

    #[test]
    fn test_select_strategy_canary() {
        let mut config = config(DeploymentStrategy::Canary);
        config.traffic_split_method = TrafficSplitMethod::Smi;
        let strategy = select_strategy(&config);
        assert_eq!(strategy.name(), "canary");
        assert!(strategy.supports_promotion());
    }

    #[test]
    fn test_select_strategy_blue_green() {
        for route in [RouteMethod::Service, RouteMethod::Ingress, RouteMethod::Smi] {
            let mut config = config(DeploymentStrategy::BlueGreen);
            config.route_method = route;
            let strategy = select_strategy(&config);
            assert_eq!(strategy.name(), "blue-green");
            assert!(strategy.supports_promotion());
        }
    }

    #[test]
    fn test_stability_targets_skip_passthrough_kinds() {
        let resources: Vec<Resource> = [
            json!({ "kind": "Deployment", "metadata": { "name": "web" }, "spec": {} }),
            json!({ "kind": "ConfigMap", "metadata": { "name": "web-config" } }),
            json!({ "kind": "Service", "metadata": { "name": "web" }, "spec": {} }),
            json!({ "kind": "Ingress", "metadata": { "name": "web" }, "spec": {} }),
        ]
        .into_iter()
        .map(|v| Resource::from_value(v).expect("valid fixture"))
        .collect();

        let targets: Vec<String> = stability_targets(&resources)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(targets, vec!["deployment/web", "service/web"]);
    }
}
