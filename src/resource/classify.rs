//! Manifest classification
//!
//! Partitions parsed documents into workloads, routed services, unrouted
//! services, ingresses and everything else. Every document lands in exactly
//! one bucket.

use super::naming::VariantSuffix;
use super::{Resource, ResourceKind};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Manifests partitioned by role
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    pub workloads: Vec<Resource>,
    /// Services whose selector matches at least one workload in the set
    pub routed_services: Vec<Resource>,
    pub unrouted_services: Vec<Resource>,
    pub ingresses: Vec<Resource>,
    pub others: Vec<Resource>,
    /// Routed service name -> green service name
    pub service_name_map: HashMap<String, String>,
}

impl ManifestSet {
    /// Routed then unrouted services
    pub fn services(&self) -> impl Iterator<Item = &Resource> {
        self.routed_services
            .iter()
            .chain(self.unrouted_services.iter())
    }

    /// Everything that is neither a workload nor a service
    pub fn passthrough(&self) -> impl Iterator<Item = &Resource> {
        self.ingresses.iter().chain(self.others.iter())
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
            + self.routed_services.len()
            + self.unrouted_services.len()
            + self.ingresses.len()
            + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition resources into a `ManifestSet`
///
/// Workloads are collected first so that a service is tested against every
/// workload in the set, regardless of document order.
pub fn classify(resources: &[Resource]) -> ManifestSet {
    let mut set = ManifestSet {
        workloads: resources
            .iter()
            .filter(|r| r.resource_kind().is_deployment_like())
            .cloned()
            .collect(),
        ..Default::default()
    };

    for resource in resources {
        match resource.resource_kind() {
            kind if kind.is_deployment_like() => {}
            ResourceKind::Service => {
                if is_service_routed(resource, &set.workloads) {
                    set.service_name_map.insert(
                        resource.name().to_string(),
                        VariantSuffix::Green.apply(resource.name()),
                    );
                    set.routed_services.push(resource.clone());
                } else {
                    set.unrouted_services.push(resource.clone());
                }
            }
            ResourceKind::Ingress => set.ingresses.push(resource.clone()),
            _ => set.others.push(resource.clone()),
        }
    }

    set
}

/// Does the service select at least one of the given workloads?
///
/// A service without a selector is never routed.
pub fn is_service_routed(service: &Resource, workloads: &[Resource]) -> bool {
    let Some(selector) = service_selector(service) else {
        return false;
    };

    workloads.iter().any(|workload| {
        workload_match_labels(workload)
            .map(|labels| selector_matches(&selector, &labels))
            .unwrap_or(false)
    })
}

/// Every key in `selector` must exist in `labels` with an equal value
///
/// An empty value is compared like any other; it does not mean "any".
pub fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

pub(crate) fn service_selector(service: &Resource) -> Option<BTreeMap<String, String>> {
    service.spec.get("selector").and_then(label_map)
}

/// Labels a service would have to select to reach this workload
///
/// Bare pods use their own labels, everything else `spec.selector.matchLabels`.
pub(crate) fn workload_match_labels(workload: &Resource) -> Option<BTreeMap<String, String>> {
    if workload.resource_kind() == ResourceKind::Pod {
        return workload.metadata.labels.clone();
    }
    workload
        .spec
        .get("selector")
        .and_then(|s| s.get("matchLabels"))
        .and_then(label_map)
}

/// Read a JSON object as a label map
///
/// Non-string scalars (a YAML `version: 1`) are kept in their text form and
/// null becomes the empty string.
pub(crate) fn label_map(value: &Value) -> Option<BTreeMap<String, String>> {
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "classify_test.rs"]
mod tests;
