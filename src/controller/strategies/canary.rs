//! Canary deployment strategy
//!
//! Workloads get stable, canary and baseline variants. Once a stable object
//! is live, a deploy writes a canary from the new manifest and a baseline
//! spliced from the live stable object. What the first deploy writes depends
//! on the backend.
//!
//! Two backends shape traffic:
//! - Pod: replica counts alone approximate the canary share
//! - Smi: per-service TrafficSplit objects carry explicit permille weights

use super::{
    apply_and_record, check_stability, DeploymentStrategyHandler, RolloutOutcome, StrategyError,
};
use crate::cluster::{apply_checked, delete_best_effort, fetch_resource, ResourceRef};
use crate::config::TrafficSplitMethod;
use crate::controller::replicas::{
    canary_replica_count, validate_percentage, validate_replica_override,
};
use crate::controller::traffic_split::{
    traffic_split_name, TrafficSplit, TrafficSplitWeights, TRAFFIC_SPLIT_KIND,
};
use crate::controller::Context;
use crate::resource::{
    classify, derive_baseline_from_stable, derive_variant, is_marked_stable, CanaryVariant,
    ManifestSet, Resource, Variant, VariantSuffix,
};
use async_trait::async_trait;
use tracing::{debug, info};

const NAME: &str = "canary";

const STABLE: Variant = Variant::Canary(CanaryVariant::Stable);
const CANARY: Variant = Variant::Canary(CanaryVariant::Canary);
const BASELINE: Variant = Variant::Canary(CanaryVariant::Baseline);

/// Canary strategy handler
pub struct CanaryStrategyHandler {
    method: TrafficSplitMethod,
}

impl CanaryStrategyHandler {
    pub fn new(method: TrafficSplitMethod) -> Self {
        CanaryStrategyHandler { method }
    }
}

fn stable_ref(resource: &Resource) -> ResourceRef {
    ResourceRef::new(
        resource.kind.clone(),
        VariantSuffix::Stable.apply(resource.name()),
        resource.namespace(),
    )
}

/// Variants to write for one workload
///
/// A live `-stable` object must carry the stable version label. With one in
/// place both backends write a canary from the manifest and a baseline
/// spliced from the live stable object.
///
/// Without one this is the first deploy. The pod backend writes only the
/// stable variant at the declared replica count. The mesh backend writes the
/// canary, since the split it creates sends all traffic to the canary
/// service.
pub async fn workload_variants(
    ctx: &Context,
    workload: &Resource,
    percentage: i32,
    replica_override: Option<i32>,
    method: TrafficSplitMethod,
) -> Result<Vec<Resource>, StrategyError> {
    let stable_ref = stable_ref(workload);
    let stable = fetch_resource(ctx.cluster.as_ref(), &stable_ref).await;

    if let Some(stable) = &stable {
        if !is_marked_stable(stable) {
            return Err(StrategyError::StableNotMarked(stable_ref.to_string()));
        }
    }

    let replicas = canary_replica_count(workload, percentage, replica_override);

    match (stable, method) {
        (None, TrafficSplitMethod::Pod) => {
            info!(
                resource = %stable_ref,
                replicas = ?workload.replica_count(),
                "No stable object on cluster, deploying stable variant only"
            );
            Ok(vec![derive_variant(workload, STABLE, None)])
        }
        (None, TrafficSplitMethod::Smi) => {
            info!(
                resource = %stable_ref,
                replicas,
                "No stable object on cluster, deploying canary only"
            );
            Ok(vec![derive_variant(workload, CANARY, Some(replicas))])
        }
        (Some(stable), _) => {
            info!(
                resource = %stable_ref,
                replicas,
                percentage,
                "Stable object found, deploying canary and baseline"
            );
            let canary = derive_variant(workload, CANARY, Some(replicas));
            let baseline = derive_baseline_from_stable(&stable, replicas)?;
            Ok(vec![canary, baseline])
        }
    }
}

/// TrafficSplit for `service` with the configured labels and annotations
async fn traffic_split_for(
    ctx: &Context,
    service: &Resource,
    weights: TrafficSplitWeights,
) -> Result<Resource, StrategyError> {
    let api_version = ctx.traffic_split_api_version().await?;
    let mut split = TrafficSplit::build(
        api_version,
        service.name(),
        weights,
        &ctx.config.labels,
        &ctx.config.annotations,
    );
    split.metadata.namespace = service.namespace().map(str::to_string);
    debug!(
        service = %service.name(),
        stable = weights.stable,
        baseline = weights.baseline,
        canary = weights.canary,
        "Built traffic split"
    );
    Ok(split.to_resource()?)
}

/// Does the live split for `service` already send everything to its canary?
async fn is_traffic_converged(ctx: &Context, service: &Resource) -> bool {
    let split_ref = ResourceRef::new(
        TRAFFIC_SPLIT_KIND,
        traffic_split_name(service.name()),
        service.namespace(),
    );
    let Some(existing) = fetch_resource(ctx.cluster.as_ref(), &split_ref).await else {
        return false;
    };

    match TrafficSplit::from_resource(&existing) {
        Ok(split) => split.routes_fully_to(&VariantSuffix::Canary.apply(service.name())),
        Err(e) => {
            debug!(resource = %split_ref, error = %e, "Live traffic split is unreadable");
            false
        }
    }
}

/// Canary and baseline services, plus stable service and split as needed
///
/// A service without a live `-stable` counterpart gets one, and a split that
/// sends all traffic to canary. Otherwise the split is rewritten for the
/// target percentage unless it already routes fully to canary.
pub async fn service_variants(
    ctx: &Context,
    services: &[Resource],
    percentage: i32,
) -> Result<Vec<Resource>, StrategyError> {
    let mut objects = Vec::new();
    let mut splits = Vec::new();

    for service in services {
        objects.push(derive_variant(service, CANARY, None));
        objects.push(derive_variant(service, BASELINE, None));

        let stable_ref = stable_ref(service);
        if fetch_resource(ctx.cluster.as_ref(), &stable_ref).await.is_none() {
            info!(service = %service.name(), "Creating stable service and traffic split");
            objects.push(derive_variant(service, STABLE, None));
            splits.push(traffic_split_for(ctx, service, TrafficSplitWeights::CANARY).await?);
            continue;
        }

        if is_traffic_converged(ctx, service).await {
            debug!(service = %service.name(), "Traffic split update not required");
            continue;
        }

        let weights = TrafficSplitWeights::for_percentage(percentage)?;
        info!(
            service = %service.name(),
            stable = weights.stable,
            baseline = weights.baseline,
            canary = weights.canary,
            "Updating traffic split"
        );
        splits.push(traffic_split_for(ctx, service, weights).await?);
    }

    objects.extend(splits);
    Ok(objects)
}

/// Rewrite the split of every service with fixed weights
pub async fn adjust_traffic(
    ctx: &Context,
    services: &[Resource],
    weights: TrafficSplitWeights,
) -> Result<Vec<ResourceRef>, StrategyError> {
    let mut splits = Vec::with_capacity(services.len());
    for service in services {
        splits.push(traffic_split_for(ctx, service, weights).await?);
    }
    if splits.is_empty() {
        return Ok(Vec::new());
    }

    apply_checked(ctx.cluster.as_ref(), &splits, ctx.config.force).await?;
    Ok(splits.iter().map(ResourceRef::of).collect())
}

pub async fn redirect_traffic_to_stable(
    ctx: &Context,
    services: &[Resource],
) -> Result<Vec<ResourceRef>, StrategyError> {
    adjust_traffic(ctx, services, TrafficSplitWeights::STABLE).await
}

pub async fn redirect_traffic_to_canary(
    ctx: &Context,
    services: &[Resource],
) -> Result<Vec<ResourceRef>, StrategyError> {
    adjust_traffic(ctx, services, TrafficSplitWeights::CANARY).await
}

/// Delete canary and baseline variants; already-absent objects are fine
pub async fn cleanup(ctx: &Context, set: &ManifestSet, include_services: bool) -> Vec<ResourceRef> {
    let services: Vec<&Resource> = if include_services {
        set.services().collect()
    } else {
        Vec::new()
    };

    let targets: Vec<ResourceRef> = set
        .workloads
        .iter()
        .chain(services)
        .flat_map(|resource| {
            [VariantSuffix::Canary, VariantSuffix::Baseline].map(|suffix| {
                ResourceRef::new(
                    resource.kind.clone(),
                    suffix.apply(resource.name()),
                    resource.namespace(),
                )
            })
        })
        .collect();

    info!(objects = targets.len(), include_services, "Cleaning up canary objects");
    delete_best_effort(ctx.cluster.as_ref(), &targets).await;
    targets
}

#[async_trait]
impl DeploymentStrategyHandler for CanaryStrategyHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn deploy(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        let percentage = validate_percentage(ctx.config.canary_percentage())?;
        let replica_override = ctx
            .config
            .baseline_and_canary_replicas
            .map(validate_replica_override)
            .transpose()?;

        let set = classify(manifests);
        info!(
            strategy = NAME,
            method = ?self.method,
            percentage,
            workloads = set.workloads.len(),
            "Deploying canary"
        );

        let mut workloads = Vec::new();
        for workload in &set.workloads {
            workloads.extend(
                workload_variants(ctx, workload, percentage, replica_override, self.method)
                    .await?,
            );
        }

        // routed services stay the apex the traffic split is attached to
        let mut objects = workloads.clone();
        objects.extend(set.services().cloned());
        objects.extend(set.passthrough().cloned());

        let mut outcome = RolloutOutcome::default();
        apply_and_record(ctx, &objects, &mut outcome, NAME).await?;

        if self.method == TrafficSplitMethod::Smi {
            let services = service_variants(ctx, &set.routed_services, percentage).await?;
            apply_and_record(ctx, &services, &mut outcome, NAME).await?;
        }

        check_stability(ctx, &workloads).await?;
        Ok(outcome)
    }

    async fn promote(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        let set = classify(manifests);
        info!(strategy = NAME, method = ?self.method, "Promoting canary");

        let mut outcome = RolloutOutcome::default();

        // cut over to the canary while the stable workloads are rewritten
        if self.method == TrafficSplitMethod::Smi {
            let splits = redirect_traffic_to_canary(ctx, &set.routed_services).await?;
            outcome.applied.extend(splits);
        }

        let stable: Vec<Resource> = set
            .workloads
            .iter()
            .map(|workload| derive_variant(workload, STABLE, None))
            .collect();

        let mut objects = stable.clone();
        objects.extend(set.services().cloned());
        objects.extend(set.passthrough().cloned());

        apply_and_record(ctx, &objects, &mut outcome, NAME).await?;
        check_stability(ctx, &stable).await?;

        if self.method == TrafficSplitMethod::Smi {
            let splits = redirect_traffic_to_stable(ctx, &set.routed_services).await?;
            outcome.applied.extend(splits);
        }
        outcome.deleted = cleanup(ctx, &set, self.method == TrafficSplitMethod::Smi).await;
        Ok(outcome)
    }

    async fn reject(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        let set = classify(manifests);
        info!(strategy = NAME, method = ?self.method, "Rejecting canary");

        let mut outcome = RolloutOutcome::default();
        if self.method == TrafficSplitMethod::Smi {
            outcome.applied = redirect_traffic_to_stable(ctx, &set.routed_services).await?;
        }
        outcome.deleted = cleanup(ctx, &set, self.method == TrafficSplitMethod::Smi).await;
        Ok(outcome)
    }

    fn supports_promotion(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "canary_test.rs"]
mod tests;
