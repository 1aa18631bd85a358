pub mod replicas;
pub mod sleeper;
pub mod stability;
pub mod strategies;
pub mod traffic_split;

pub use strategies::{select_strategy, DeploymentStrategyHandler, RolloutOutcome, StrategyError};

use crate::cluster::{check_for_errors, ClusterControl, ClusterError};
use crate::config::{Action, ConfigError, DeployConfig};
use crate::resource::{update_image_pull_secrets, Resource};
use sleeper::Sleeper;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use traffic_split::parse_traffic_split_api_version;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Strategy execution failed: {0}")]
    Strategy(#[from] StrategyError),
}

/// Everything a strategy needs for one invocation
pub struct Context {
    pub cluster: Arc<dyn ClusterControl>,
    pub sleeper: Arc<dyn Sleeper>,
    pub config: DeployConfig,
    /// Written at most once, on first use by the mesh backend
    traffic_split_api_version: OnceCell<String>,
}

impl Context {
    pub fn new(
        cluster: Arc<dyn ClusterControl>,
        sleeper: Arc<dyn Sleeper>,
        config: DeployConfig,
    ) -> Self {
        Context {
            cluster,
            sleeper,
            config,
            traffic_split_api_version: OnceCell::new(),
        }
    }

    /// Context over an in-memory cluster that never really sleeps
    #[cfg(test)]
    pub fn new_mock(cluster: Arc<crate::cluster::mock::MockCluster>, config: DeployConfig) -> Self {
        Context::new(cluster, Arc::new(sleeper::MockSleeper::new()), config)
    }

    /// Served traffic split API version, discovered on first call
    pub async fn traffic_split_api_version(&self) -> Result<&str, ClusterError> {
        self.traffic_split_api_version
            .get_or_try_init(|| async {
                let result = self.cluster.api_versions().await?;
                check_for_errors(&[&result])?;
                let version = parse_traffic_split_api_version(&result.stdout)
                    .ok_or(ClusterError::TrafficSplitApiUnavailable)?;
                debug!(api_version = %version, "Discovered traffic split API version");
                Ok::<_, ClusterError>(version)
            })
            .await
            .map(String::as_str)
    }
}

/// Apply configured image pull secrets to every workload
pub fn prepare_manifests(manifests: &[Resource], config: &DeployConfig) -> Vec<Resource> {
    manifests
        .iter()
        .cloned()
        .map(|mut resource| {
            if resource.resource_kind().is_workload() {
                update_image_pull_secrets(&mut resource, &config.image_pull_secrets, false);
            }
            resource
        })
        .collect()
}

/// Run one action of the configured strategy over a manifest set
pub async fn run(
    action: Action,
    manifests: &[Resource],
    ctx: &Context,
) -> Result<RolloutOutcome, DeployError> {
    ctx.config.validate()?;

    let manifests = prepare_manifests(manifests, &ctx.config);
    let strategy = select_strategy(&ctx.config);

    info!(
        action = %action,
        strategy = strategy.name(),
        manifests = manifests.len(),
        "Starting rollout action"
    );

    let outcome = match action {
        Action::Deploy => strategy.deploy(&manifests, ctx).await?,
        Action::Promote => strategy.promote(&manifests, ctx).await?,
        Action::Reject => strategy.reject(&manifests, ctx).await?,
    };

    info!(
        action = %action,
        strategy = strategy.name(),
        applied = outcome.applied.len(),
        deleted = outcome.deleted.len(),
        "Rollout action finished"
    );
    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "mod_test.rs"]
mod tests;
