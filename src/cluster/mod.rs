//! Cluster Control Interface
//!
//! The engine talks to the cluster only through [`ClusterControl`]. Every
//! call is awaited before the next one is issued.

pub mod kubectl;
#[cfg(test)]
pub mod mock;

pub use kubectl::Kubectl;

use crate::resource::Resource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cluster command failed: {0}")]
    CommandFailed(String),

    #[error("Failed to encode manifests: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Traffic split API (split.smi-spec.io) is not served by the cluster")]
    TrafficSplitApiUnavailable,
}

/// Outcome of a single cluster command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        ExecResult {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Fail on any non-zero exit; stderr from a successful command is only logged
pub fn check_for_errors(results: &[&ExecResult]) -> Result<(), ClusterError> {
    let mut stderr = String::new();
    for result in results {
        if !result.is_success() {
            stderr.push_str(result.stderr.trim());
            stderr.push('\n');
        } else if !result.stderr.trim().is_empty() {
            warn!(stderr = %result.stderr.trim(), "Cluster command reported warnings");
        }
    }

    if stderr.is_empty() {
        Ok(())
    } else {
        Err(ClusterError::CommandFailed(stderr.trim().to_string()))
    }
}

/// Kind/name/namespace triple identifying one cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, namespace: Option<&str>) -> Self {
        ResourceRef {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }

    pub fn of(resource: &Resource) -> Self {
        ResourceRef::new(resource.kind.clone(), resource.name(), resource.namespace())
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.to_ascii_lowercase(), self.name)
    }
}

/// Operations the engine needs from the cluster
///
/// Implementations scope calls to their configured namespace unless an
/// explicit namespace is passed.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Apply the given objects
    async fn apply(&self, manifests: &[Resource], force: bool) -> Result<ExecResult, ClusterError>;

    /// Fetch one object as JSON
    async fn get(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<ExecResult, ClusterError>;

    /// Delete by `[kind, name]` style arguments
    async fn delete(&self, args: &[String]) -> Result<ExecResult, ClusterError>;

    /// Diagnostic description of an object
    async fn describe(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
        silent: bool,
    ) -> Result<ExecResult, ClusterError>;

    async fn rollout_status(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<ExecResult, ClusterError>;

    /// API group versions served by the cluster, one per line
    async fn api_versions(&self) -> Result<ExecResult, ClusterError>;
}

/// Fetch an object, treating every failure as "does not exist"
///
/// The returned object has its cluster-specific details stripped.
pub async fn fetch_resource(cluster: &dyn ClusterControl, target: &ResourceRef) -> Option<Resource> {
    let result = match cluster
        .get(&target.kind, &target.name, target.namespace.as_deref())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            debug!(resource = %target, error = %e, "Error while fetching resource");
            return None;
        }
    };

    if !result.is_success() || !result.stderr.trim().is_empty() || result.stdout.trim().is_empty() {
        debug!(resource = %target, "Resource not found");
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(&result.stdout) {
        Ok(value) => value,
        Err(e) => {
            debug!(resource = %target, error = %e, "Fetched resource is not valid JSON");
            return None;
        }
    };

    match Resource::from_value(value) {
        Ok(mut resource) => {
            resource.strip_cluster_details();
            Some(resource)
        }
        Err(e) => {
            debug!(resource = %target, error = %e, "Fetched resource is malformed");
            None
        }
    }
}

/// Apply and fail on a non-zero exit
pub async fn apply_checked(
    cluster: &dyn ClusterControl,
    manifests: &[Resource],
    force: bool,
) -> Result<ExecResult, ClusterError> {
    if manifests.is_empty() {
        return Ok(ExecResult::default());
    }
    let result = cluster.apply(manifests, force).await?;
    check_for_errors(&[&result])?;
    Ok(result)
}

/// Delete every object in turn, ignoring failures
///
/// Objects that are already gone are the common case here.
pub async fn delete_best_effort(cluster: &dyn ClusterControl, targets: &[ResourceRef]) {
    for target in targets {
        let args = [target.kind.clone(), target.name.clone()];
        let outcome = match cluster.delete(&args).await {
            Ok(result) => check_for_errors(&[&result]),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            debug!(resource = %target, error = %e, "Failed to delete object");
        }
    }
}
