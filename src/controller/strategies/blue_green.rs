//! Blue-Green deployment strategy
//!
//! Deploy writes a `-green` copy of every workload next to the current one
//! and, once it is stable, moves traffic to it. Promote rewrites the
//! workloads under their own names, moves traffic back to them and removes
//! the green copies; reject only does the last two.
//!
//! Three route methods move traffic:
//! - Service: routed service selectors switch to the color label
//! - Ingress: ingress backends point at `-green` copies of the routed services
//! - Smi: a TrafficSplit weights `-stable` against `-green` services

use super::{
    apply_and_record, check_stability, DeploymentStrategyHandler, RolloutOutcome, StrategyError,
};
use crate::cluster::{apply_checked, delete_best_effort, fetch_resource, ResourceRef};
use crate::config::RouteMethod;
use crate::controller::traffic_split::{
    traffic_split_name, TrafficSplit, TrafficSplitBackend, TOTAL_WEIGHT, TRAFFIC_SPLIT_KIND,
};
use crate::controller::Context;
use crate::resource::mutate::{relabel, rewrite_ingress_backends, service_selector_label};
use crate::resource::{
    classify, derive_variant, BlueGreenColor, ManifestSet, Resource, Variant, VariantSuffix,
    BLUE_GREEN_VERSION_LABEL,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const NAME: &str = "blue-green";

const GREEN: Variant = Variant::BlueGreen(BlueGreenColor::Green);
const NONE: Variant = Variant::BlueGreen(BlueGreenColor::None);

/// Result of routing traffic back and removing the green objects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlueGreenRejectResult {
    pub delete_result: Vec<ResourceRef>,
    pub route_result: Vec<ResourceRef>,
}

/// Blue-Green strategy handler
pub struct BlueGreenStrategyHandler {
    route: RouteMethod,
}

impl BlueGreenStrategyHandler {
    pub fn new(route: RouteMethod) -> Self {
        BlueGreenStrategyHandler { route }
    }
}

/// Apply a `color` variant of every resource
///
/// Only green renames; `None` rewrites the resources under their own names.
pub async fn deploy_with_label(
    ctx: &Context,
    resources: &[Resource],
    color: BlueGreenColor,
) -> Result<Vec<Resource>, StrategyError> {
    let objects: Vec<Resource> = resources
        .iter()
        .map(|resource| derive_variant(resource, Variant::BlueGreen(color), None))
        .collect();
    if objects.is_empty() {
        return Ok(objects);
    }

    info!(
        strategy = NAME,
        color = Variant::BlueGreen(color).label_value(),
        objects = objects.len(),
        "Deploying objects with color label"
    );
    apply_checked(ctx.cluster.as_ref(), &objects, ctx.config.force).await?;
    Ok(objects)
}

/// Point every service's selector at `color`
pub async fn route_services(
    ctx: &Context,
    services: &[Resource],
    color: BlueGreenColor,
) -> Result<Vec<Resource>, StrategyError> {
    let routed: Vec<Resource> = services
        .iter()
        .map(|service| relabel(service, Variant::BlueGreen(color)))
        .collect();
    if routed.is_empty() {
        return Ok(routed);
    }

    info!(
        strategy = NAME,
        color = Variant::BlueGreen(color).label_value(),
        services = routed.len(),
        "Routing services"
    );
    apply_checked(ctx.cluster.as_ref(), &routed, ctx.config.force).await?;
    Ok(routed)
}

/// Are all live routed services currently selecting green?
///
/// A service missing from the cluster counts as not green.
pub async fn validate_services_state(ctx: &Context, services: &[Resource]) -> bool {
    let green = GREEN.label_value();
    let mut all_green = true;

    for service in services {
        let target = ResourceRef::of(service);
        let is_green = match fetch_resource(ctx.cluster.as_ref(), &target).await {
            Some(live) => service_selector_label(&live, BLUE_GREEN_VERSION_LABEL) == Some(green),
            None => false,
        };
        if !is_green {
            warn!(service = %target, "Service is not routed to green");
        }
        all_green = all_green && is_green;
    }

    all_green
}

/// Copy of `ingress` sending routed services to their green copies
///
/// `None` when no backend names a routed service.
pub fn green_ingress(
    ingress: &Resource,
    service_name_map: &HashMap<String, String>,
) -> Option<Resource> {
    let mut routed = relabel(ingress, GREEN);
    (rewrite_ingress_backends(&mut routed, service_name_map) > 0).then_some(routed)
}

/// Apply every ingress, pointed at green or as given
///
/// Green rewrites the backends of ingresses that reach a routed service;
/// everything else is applied unchanged.
pub async fn route_ingresses(
    ctx: &Context,
    set: &ManifestSet,
    color: BlueGreenColor,
) -> Result<Vec<Resource>, StrategyError> {
    let routed: Vec<Resource> = set
        .ingresses
        .iter()
        .map(|ingress| match color {
            BlueGreenColor::Green => {
                green_ingress(ingress, &set.service_name_map).unwrap_or_else(|| ingress.clone())
            }
            BlueGreenColor::None => ingress.clone(),
        })
        .collect();
    if routed.is_empty() {
        return Ok(routed);
    }

    info!(
        strategy = NAME,
        color = Variant::BlueGreen(color).label_value(),
        ingresses = routed.len(),
        "Routing ingresses"
    );
    apply_checked(ctx.cluster.as_ref(), &routed, ctx.config.force).await?;
    Ok(routed)
}

/// Do all live ingresses that reach a routed service carry the green label?
pub async fn validate_ingresses_state(ctx: &Context, set: &ManifestSet) -> bool {
    let green = GREEN.label_value();
    let mut all_green = true;

    for ingress in &set.ingresses {
        if green_ingress(ingress, &set.service_name_map).is_none() {
            continue;
        }

        let target = ResourceRef::of(ingress);
        let is_green = fetch_resource(ctx.cluster.as_ref(), &target)
            .await
            .and_then(|live| live.metadata.labels)
            .and_then(|labels| labels.get(BLUE_GREEN_VERSION_LABEL).cloned())
            .is_some_and(|color| color == green);
        if !is_green {
            warn!(ingress = %target, "Ingress is not routed to green");
        }
        all_green = all_green && is_green;
    }

    all_green
}

/// `-stable` and `-green` copies of every routed service
///
/// The stable copy selects the current workloads through the `none` color.
pub fn smi_services(services: &[Resource]) -> Vec<Resource> {
    services
        .iter()
        .flat_map(|service| {
            let mut stable = derive_variant(service, NONE, None);
            stable.metadata.name = Some(VariantSuffix::Stable.apply(service.name()));
            [stable, derive_variant(service, GREEN, None)]
        })
        .collect()
}

/// TrafficSplit for `service` giving full weight to one color
async fn traffic_split_for(
    ctx: &Context,
    service: &Resource,
    color: BlueGreenColor,
) -> Result<Resource, StrategyError> {
    let green_weight = match color {
        BlueGreenColor::Green => TOTAL_WEIGHT,
        BlueGreenColor::None => 0,
    };
    let backends = vec![
        TrafficSplitBackend::new(
            VariantSuffix::Stable.apply(service.name()),
            TOTAL_WEIGHT - green_weight,
        ),
        TrafficSplitBackend::new(VariantSuffix::Green.apply(service.name()), green_weight),
    ];

    let api_version = ctx.traffic_split_api_version().await?;
    let mut split = TrafficSplit::with_backends(
        api_version,
        service.name(),
        backends,
        &ctx.config.labels,
        &ctx.config.annotations,
    );
    split.metadata.namespace = service.namespace().map(str::to_string);
    Ok(split.to_resource()?)
}

/// Rewrite the split of every routed service towards `color`
pub async fn route_traffic_split(
    ctx: &Context,
    services: &[Resource],
    color: BlueGreenColor,
) -> Result<Vec<Resource>, StrategyError> {
    let mut splits = Vec::with_capacity(services.len());
    for service in services {
        splits.push(traffic_split_for(ctx, service, color).await?);
    }
    if splits.is_empty() {
        return Ok(splits);
    }

    info!(
        strategy = NAME,
        color = Variant::BlueGreen(color).label_value(),
        splits = splits.len(),
        "Routing traffic splits"
    );
    apply_checked(ctx.cluster.as_ref(), &splits, ctx.config.force).await?;
    Ok(splits)
}

fn split_ref(service: &Resource) -> ResourceRef {
    ResourceRef::new(
        TRAFFIC_SPLIT_KIND,
        traffic_split_name(service.name()),
        service.namespace(),
    )
}

/// Does every live split send all traffic to green and none to stable?
///
/// A missing or unreadable split counts as not green.
pub async fn validate_traffic_split_state(ctx: &Context, services: &[Resource]) -> bool {
    let mut all_green = true;

    for service in services {
        let target = split_ref(service);
        let split = fetch_resource(ctx.cluster.as_ref(), &target)
            .await
            .and_then(|live| match TrafficSplit::from_resource(&live) {
                Ok(split) => Some(split),
                Err(e) => {
                    debug!(resource = %target, error = %e, "Live traffic split is unreadable");
                    None
                }
            });

        let is_green = split.is_some_and(|split| {
            split.routes_fully_to(&VariantSuffix::Green.apply(service.name()))
                && split.backend_weight(&VariantSuffix::Stable.apply(service.name())) == Some(0)
        });
        if !is_green {
            warn!(split = %target, "Traffic split is not routed to green");
        }
        all_green = all_green && is_green;
    }

    all_green
}

fn suffixed_refs(resources: &[Resource], suffix: VariantSuffix) -> Vec<ResourceRef> {
    resources
        .iter()
        .map(|resource| {
            ResourceRef::new(
                resource.kind.clone(),
                suffix.apply(resource.name()),
                resource.namespace(),
            )
        })
        .collect()
}

/// Delete the `-green` copy of every given resource, best effort
pub async fn delete_green_objects(ctx: &Context, resources: &[Resource]) -> Vec<ResourceRef> {
    let targets = suffixed_refs(resources, VariantSuffix::Green);

    debug!(objects = ?targets, "Deleting green objects");
    delete_best_effort(ctx.cluster.as_ref(), &targets).await;
    targets
}

/// Delete the `-stable` services and traffic splits set up for SMI routing
pub async fn cleanup_smi_objects(ctx: &Context, services: &[Resource]) -> Vec<ResourceRef> {
    let mut targets = suffixed_refs(services, VariantSuffix::Stable);
    targets.extend(services.iter().map(split_ref));

    debug!(objects = ?targets, "Deleting traffic split objects");
    delete_best_effort(ctx.cluster.as_ref(), &targets).await;
    targets
}

/// Workloads plus, for the ingress and SMI methods, routed services
fn green_copies(set: &ManifestSet, route: RouteMethod) -> Vec<Resource> {
    let mut resources = set.workloads.clone();
    if route != RouteMethod::Service {
        resources.extend(set.routed_services.iter().cloned());
    }
    resources
}

/// Route traffic back to the current workloads and drop the green ones
pub async fn reject_blue_green(
    ctx: &Context,
    set: &ManifestSet,
    route: RouteMethod,
) -> Result<BlueGreenRejectResult, StrategyError> {
    let routed = match route {
        RouteMethod::Service => {
            route_services(ctx, &set.routed_services, BlueGreenColor::None).await?
        }
        RouteMethod::Ingress => route_ingresses(ctx, set, BlueGreenColor::None).await?,
        RouteMethod::Smi => {
            route_traffic_split(ctx, &set.routed_services, BlueGreenColor::None).await?
        }
    };

    let mut delete_result = delete_green_objects(ctx, &green_copies(set, route)).await;
    if route == RouteMethod::Smi {
        delete_result.extend(cleanup_smi_objects(ctx, &set.routed_services).await);
    }

    Ok(BlueGreenRejectResult {
        delete_result,
        route_result: routed.iter().map(ResourceRef::of).collect(),
    })
}

#[async_trait]
impl DeploymentStrategyHandler for BlueGreenStrategyHandler {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn deploy(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        let set = classify(manifests);
        info!(
            strategy = NAME,
            route = %self.route,
            workloads = set.workloads.len(),
            "Deploying green"
        );
        let mut outcome = RolloutOutcome::default();

        let green = deploy_with_label(ctx, &set.workloads, BlueGreenColor::Green).await?;
        outcome.record_applied(&green);

        match self.route {
            RouteMethod::Service => {
                let others: Vec<Resource> = set
                    .unrouted_services
                    .iter()
                    .chain(set.passthrough())
                    .cloned()
                    .collect();
                apply_and_record(ctx, &others, &mut outcome, NAME).await?;

                check_stability(ctx, &green).await?;

                let routed =
                    route_services(ctx, &set.routed_services, BlueGreenColor::Green).await?;
                outcome.record_applied(&routed);
            }
            RouteMethod::Ingress => {
                let green_services =
                    deploy_with_label(ctx, &set.routed_services, BlueGreenColor::Green).await?;
                outcome.record_applied(&green_services);

                let others: Vec<Resource> = set
                    .unrouted_services
                    .iter()
                    .chain(set.others.iter())
                    .cloned()
                    .collect();
                apply_and_record(ctx, &others, &mut outcome, NAME).await?;

                check_stability(ctx, &green).await?;

                let routed = route_ingresses(ctx, &set, BlueGreenColor::Green).await?;
                outcome.record_applied(&routed);
            }
            RouteMethod::Smi => {
                let others: Vec<Resource> =
                    set.services().chain(set.passthrough()).cloned().collect();
                apply_and_record(ctx, &others, &mut outcome, NAME).await?;

                let services = smi_services(&set.routed_services);
                apply_and_record(ctx, &services, &mut outcome, NAME).await?;
                let splits =
                    route_traffic_split(ctx, &set.routed_services, BlueGreenColor::None).await?;
                outcome.record_applied(&splits);

                check_stability(ctx, &green).await?;

                let splits =
                    route_traffic_split(ctx, &set.routed_services, BlueGreenColor::Green).await?;
                outcome.record_applied(&splits);
            }
        }

        Ok(outcome)
    }

    async fn promote(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        let set = classify(manifests);
        info!(strategy = NAME, route = %self.route, "Promoting green");

        let is_green = match self.route {
            RouteMethod::Service => validate_services_state(ctx, &set.routed_services).await,
            RouteMethod::Ingress => validate_ingresses_state(ctx, &set).await,
            RouteMethod::Smi => validate_traffic_split_state(ctx, &set.routed_services).await,
        };
        if !is_green {
            return Err(StrategyError::NotRoutedToGreen(self.route));
        }

        let mut outcome = RolloutOutcome::default();
        let promoted = deploy_with_label(ctx, &set.workloads, BlueGreenColor::None).await?;
        outcome.record_applied(&promoted);

        if self.route == RouteMethod::Ingress {
            let services =
                deploy_with_label(ctx, &set.routed_services, BlueGreenColor::None).await?;
            outcome.record_applied(&services);
        }

        check_stability(ctx, &promoted).await?;

        let routed = match self.route {
            RouteMethod::Service => {
                route_services(ctx, &set.routed_services, BlueGreenColor::None).await?
            }
            RouteMethod::Ingress => route_ingresses(ctx, &set, BlueGreenColor::None).await?,
            RouteMethod::Smi => {
                route_traffic_split(ctx, &set.routed_services, BlueGreenColor::None).await?
            }
        };
        outcome.record_applied(&routed);

        outcome.deleted = delete_green_objects(ctx, &green_copies(&set, self.route)).await;
        Ok(outcome)
    }

    async fn reject(
        &self,
        manifests: &[Resource],
        ctx: &Context,
    ) -> Result<RolloutOutcome, StrategyError> {
        let set = classify(manifests);
        info!(strategy = NAME, route = %self.route, "Rejecting green");
        let result = reject_blue_green(ctx, &set, self.route).await?;

        Ok(RolloutOutcome {
            applied: result.route_result,
            deleted: result.delete_result,
        })
    }

    fn supports_promotion(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "blue_green_test.rs"]
mod tests;
