//! Stability Monitor
//!
//! Checks applied resources one at a time: rollout status for managed
//! workloads, phase and readiness for bare pods, and external IP assignment
//! for load-balancer services. Only rollout-status failures are fatal, and
//! they are reported together once every resource has been checked.

use super::Context;
use crate::cluster::{check_for_errors, ClusterError, ResourceRef};
use crate::resource::ResourceKind;
use k8s_openapi::api::core::v1::{PodStatus, ServiceSpec, ServiceStatus};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const POD_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// 60 polls at 10s: ten minutes
pub const POD_POLL_ITERATIONS: usize = 60;

pub const LOAD_BALANCER_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// 18 polls at 10s: three minutes
pub const LOAD_BALANCER_POLL_ITERATIONS: usize = 18;

const LOAD_BALANCER: &str = "LoadBalancer";

#[derive(Debug, Error)]
pub enum StabilityError {
    #[error("Rollout status error: {}", .0.join(", "))]
    RolloutStatus(Vec<String>),
}

/// Failure to read an object while polling; never fatal on its own
#[derive(Debug, Error)]
enum StatusReadError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Failed to decode object: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What the final pod status means for the rollout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodOutcome {
    Ready,
    NotReady,
    TimedOut,
    Failed,
    /// Any phase the monitor has no rule for
    Other,
}

impl PodOutcome {
    pub fn needs_describe(self) -> bool {
        matches!(
            self,
            PodOutcome::NotReady | PodOutcome::TimedOut | PodOutcome::Failed
        )
    }
}

/// Every container reports ready
pub fn is_pod_ready(status: &PodStatus) -> bool {
    status
        .container_statuses
        .as_ref()
        .map(|containers| containers.iter().all(|c| c.ready))
        .unwrap_or(false)
}

pub fn classify_pod_status(status: &PodStatus) -> PodOutcome {
    match status.phase.as_deref() {
        Some("Succeeded") | Some("Running") if is_pod_ready(status) => PodOutcome::Ready,
        Some("Succeeded") | Some("Running") => PodOutcome::NotReady,
        Some("Pending") => PodOutcome::TimedOut,
        Some("Failed") => PodOutcome::Failed,
        _ => PodOutcome::Other,
    }
}

/// Still waiting for the pod to be scheduled or report in
fn is_pod_settling(status: &PodStatus) -> bool {
    matches!(status.phase.as_deref(), Some("Pending") | Some("Unknown"))
}

/// First assigned load-balancer address, if any
pub fn load_balancer_address(status: &ServiceStatus) -> Option<String> {
    let ingress = status.load_balancer.as_ref()?.ingress.as_ref()?.first()?;
    Some(
        ingress
            .ip
            .clone()
            .or_else(|| ingress.hostname.clone())
            .unwrap_or_default(),
    )
}

/// Check every resource in order and aggregate rollout failures
pub async fn check_manifest_stability(
    ctx: &Context,
    resources: &[ResourceRef],
) -> Result<(), StabilityError> {
    let mut failed = Vec::new();

    for resource in resources {
        let kind = ResourceKind::from_kind(&resource.kind);

        if kind.supports_rollout_status() {
            let outcome = match ctx
                .cluster
                .rollout_status(
                    resource.namespace.as_deref(),
                    &resource.kind,
                    &resource.name,
                )
                .await
            {
                Ok(result) => check_for_errors(&[&result]),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => info!(resource = %resource, "Rollout complete"),
                Err(e) => {
                    error!(resource = %resource, error = %e, "Rollout status check failed");
                    describe(ctx, resource).await;
                    failed.push(resource.to_string());
                }
            }
        }

        if kind == ResourceKind::Pod {
            if let Err(e) = check_pod_status(ctx, resource).await {
                warn!(resource = %resource, error = %e, "Could not determine pod status");
                describe(ctx, resource).await;
            }
        }

        if kind == ResourceKind::Service {
            if let Err(e) = check_service_status(ctx, resource).await {
                warn!(resource = %resource, error = %e, "Could not determine service status");
                describe(ctx, resource).await;
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(StabilityError::RolloutStatus(failed))
    }
}

async fn describe(ctx: &Context, resource: &ResourceRef) {
    if let Err(e) = ctx
        .cluster
        .describe(
            resource.namespace.as_deref(),
            &resource.kind,
            &resource.name,
            false,
        )
        .await
    {
        warn!(resource = %resource, error = %e, "Failed to describe resource");
    }
}

async fn get_object(ctx: &Context, resource: &ResourceRef) -> Result<Value, StatusReadError> {
    let result = ctx
        .cluster
        .get(&resource.kind, &resource.name, resource.namespace.as_deref())
        .await?;
    check_for_errors(&[&result])?;
    Ok(serde_json::from_str(&result.stdout)?)
}

/// Decode `object[field]`, treating a missing or null field as empty
fn section<T: DeserializeOwned>(object: &Value, field: &str) -> Result<T, serde_json::Error> {
    match object.get(field) {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone()),
        _ => serde_json::from_value(Value::Object(Default::default())),
    }
}

async fn get_pod_status(ctx: &Context, resource: &ResourceRef) -> Result<PodStatus, StatusReadError> {
    let pod = get_object(ctx, resource).await?;
    Ok(section(&pod, "status")?)
}

async fn check_pod_status(ctx: &Context, resource: &ResourceRef) -> Result<(), StatusReadError> {
    for iteration in 0..POD_POLL_ITERATIONS {
        ctx.sleeper.sleep(POD_POLL_INTERVAL).await;
        debug!(pod = %resource.name, iteration, "Polling for pod status");

        let status = get_pod_status(ctx, resource).await?;
        if !is_pod_settling(&status) {
            break;
        }
    }

    let status = get_pod_status(ctx, resource).await?;
    let outcome = classify_pod_status(&status);

    match outcome {
        PodOutcome::Ready => info!(resource = %resource, "Pod successfully rolled out"),
        PodOutcome::NotReady => {
            for container in status.container_statuses.iter().flatten() {
                if !container.ready {
                    info!(
                        resource = %resource,
                        container = %container.name,
                        state = ?container.state,
                        "Container not ready"
                    );
                }
            }
            warn!(resource = %resource, "All containers not in ready state");
        }
        PodOutcome::TimedOut => warn!(resource = %resource, "Pod rollout status check timed out"),
        PodOutcome::Failed => error!(resource = %resource, "Pod rollout failed"),
        PodOutcome::Other => warn!(
            resource = %resource,
            phase = status.phase.as_deref().unwrap_or("<none>"),
            "Pod rollout status"
        ),
    }

    if outcome.needs_describe() {
        describe(ctx, resource).await;
    }
    Ok(())
}

async fn check_service_status(ctx: &Context, resource: &ResourceRef) -> Result<(), StatusReadError> {
    let service = get_object(ctx, resource).await?;
    let spec: ServiceSpec = section(&service, "spec")?;
    if spec.type_.as_deref() != Some(LOAD_BALANCER) {
        return Ok(());
    }

    let status: ServiceStatus = section(&service, "status")?;
    if let Some(address) = load_balancer_address(&status) {
        info!(resource = %resource, address = %address, "Service external IP assigned");
        return Ok(());
    }

    wait_for_external_ip(ctx, resource).await
}

/// Timing out here only warns
async fn wait_for_external_ip(ctx: &Context, resource: &ResourceRef) -> Result<(), StatusReadError> {
    for _ in 0..LOAD_BALANCER_POLL_ITERATIONS {
        info!(resource = %resource, "Waiting for service IP assignment");
        ctx.sleeper.sleep(LOAD_BALANCER_POLL_INTERVAL).await;

        let service = get_object(ctx, resource).await?;
        let status: ServiceStatus = section(&service, "status")?;
        if let Some(address) = load_balancer_address(&status) {
            info!(resource = %resource, address = %address, "Service external IP assigned");
            return Ok(());
        }
    }

    warn!(resource = %resource, "Wait for service IP assignment timed out");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "stability_test.rs"]
mod tests;
