//! Resource Mutator
//!
//! Derives labelled, renamed variants of manifest resources. Every derived
//! resource is a fresh clone; nothing is shared with the input.

use super::classify::label_map;
use super::naming::VariantSuffix;
use super::{Resource, ResourceError, ResourceKind};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Version label for the canary scheme
pub const CANARY_VERSION_LABEL: &str = "workflow/version";

/// Version label for the blue/green scheme
pub const BLUE_GREEN_VERSION_LABEL: &str = "k8s.deploy.color";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryVariant {
    Stable,
    Canary,
    Baseline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueGreenColor {
    Green,
    /// The current production color; keeps the original name
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Canary(CanaryVariant),
    BlueGreen(BlueGreenColor),
}

impl Variant {
    pub fn label_key(self) -> &'static str {
        match self {
            Variant::Canary(_) => CANARY_VERSION_LABEL,
            Variant::BlueGreen(_) => BLUE_GREEN_VERSION_LABEL,
        }
    }

    pub fn label_value(self) -> &'static str {
        match self {
            Variant::Canary(CanaryVariant::Stable) => "stable",
            Variant::Canary(CanaryVariant::Canary) => "canary",
            Variant::Canary(CanaryVariant::Baseline) => "baseline",
            Variant::BlueGreen(BlueGreenColor::Green) => "green",
            Variant::BlueGreen(BlueGreenColor::None) => "none",
        }
    }

    /// Suffix appended to the name, if this variant renames
    pub fn suffix(self) -> Option<VariantSuffix> {
        match self {
            Variant::Canary(CanaryVariant::Stable) => Some(VariantSuffix::Stable),
            Variant::Canary(CanaryVariant::Canary) => Some(VariantSuffix::Canary),
            Variant::Canary(CanaryVariant::Baseline) => Some(VariantSuffix::Baseline),
            Variant::BlueGreen(BlueGreenColor::Green) => Some(VariantSuffix::Green),
            Variant::BlueGreen(BlueGreenColor::None) => None,
        }
    }

    /// Only the canary scheme mirrors the version label into annotations
    fn annotates(self) -> bool {
        matches!(self, Variant::Canary(_))
    }

    fn labels(self) -> BTreeMap<String, String> {
        BTreeMap::from([(self.label_key().to_string(), self.label_value().to_string())])
    }
}

/// Merge `new` into `existing`
///
/// Colliding keys take the new value and all other existing keys survive.
/// With `override_existing` the result is exactly `new`.
pub fn merge_labels(
    existing: Option<&BTreeMap<String, String>>,
    new: &BTreeMap<String, String>,
    override_existing: bool,
) -> BTreeMap<String, String> {
    if override_existing {
        return new.clone();
    }
    let mut merged = existing.cloned().unwrap_or_default();
    merged.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

pub fn update_object_labels(
    resource: &mut Resource,
    labels: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let merged = merge_labels(resource.metadata.labels.as_ref(), labels, override_existing);
    resource.metadata.labels = Some(merged);
}

pub fn update_object_annotations(
    resource: &mut Resource,
    annotations: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let merged = merge_labels(
        resource.metadata.annotations.as_ref(),
        annotations,
        override_existing,
    );
    resource.metadata.annotations = Some(merged);
}

/// Update `spec.selector` (services) or `spec.selector.matchLabels`
///
/// Pods are skipped, as is any spec that declares no selector.
pub fn update_selector_labels(
    resource: &mut Resource,
    labels: &BTreeMap<String, String>,
    override_existing: bool,
) {
    let kind = resource.resource_kind();
    if !kind.has_selector() {
        return;
    }
    let Some(selector) = resource.spec.get_mut("selector") else {
        return;
    };

    if kind == ResourceKind::Service {
        let merged = merge_labels(label_map(selector).as_ref(), labels, override_existing);
        *selector = labels_to_value(merged);
        return;
    }

    let Some(selector) = selector.as_object_mut() else {
        return;
    };
    let existing = selector.get("matchLabels").and_then(label_map);
    let merged = merge_labels(existing.as_ref(), labels, override_existing);
    selector.insert("matchLabels".to_string(), labels_to_value(merged));
}

/// Update the labels pods are created with
///
/// For a bare pod that is its own metadata; for templated workloads it is
/// `spec.template.metadata.labels`.
pub fn update_spec_labels(
    resource: &mut Resource,
    labels: &BTreeMap<String, String>,
    override_existing: bool,
) {
    if resource.resource_kind() == ResourceKind::Pod {
        update_object_labels(resource, labels, override_existing);
        return;
    }

    let Some(template) = resource
        .spec
        .get_mut("template")
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    let metadata = template
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(metadata) = metadata.as_object_mut() else {
        return;
    };
    let existing = metadata.get("labels").and_then(label_map);
    let merged = merge_labels(existing.as_ref(), labels, override_existing);
    metadata.insert("labels".to_string(), labels_to_value(merged));
}

pub fn set_replicas(resource: &mut Resource, replicas: i32) {
    if !resource.resource_kind().has_replicas() {
        return;
    }
    if let Some(spec) = resource.spec.as_object_mut() {
        spec.insert("replicas".to_string(), Value::from(replicas));
    }
}

/// Names of the image pull secrets on the workload's pod spec
pub fn image_pull_secrets(resource: &Resource) -> Option<Vec<String>> {
    let secrets = pod_spec(&resource.spec, resource.resource_kind())?
        .get("imagePullSecrets")?
        .as_array()?;
    Some(
        secrets
            .iter()
            .filter_map(|s| s.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}

/// Append (or with `override_existing`, replace) image pull secrets
pub fn update_image_pull_secrets(
    resource: &mut Resource,
    secrets: &[String],
    override_existing: bool,
) {
    if secrets.is_empty() || resource.spec.is_null() {
        return;
    }

    let mut names = if override_existing {
        Vec::new()
    } else {
        image_pull_secrets(resource).unwrap_or_default()
    };
    names.extend(secrets.iter().cloned());

    let kind = resource.resource_kind();
    if let Some(pod_spec) = pod_spec_mut(&mut resource.spec, kind) {
        let refs = names
            .into_iter()
            .map(|name| serde_json::json!({ "name": name }))
            .collect();
        pod_spec.insert("imagePullSecrets".to_string(), Value::Array(refs));
    }
}

fn pod_spec(spec: &Value, kind: ResourceKind) -> Option<&Map<String, Value>> {
    match kind {
        ResourceKind::Pod => spec.as_object(),
        ResourceKind::CronJob => spec
            .pointer("/jobTemplate/spec/template/spec")?
            .as_object(),
        _ => spec.pointer("/template/spec")?.as_object(),
    }
}

fn pod_spec_mut(spec: &mut Value, kind: ResourceKind) -> Option<&mut Map<String, Value>> {
    match kind {
        ResourceKind::Pod => spec.as_object_mut(),
        ResourceKind::CronJob => spec
            .pointer_mut("/jobTemplate/spec/template/spec")?
            .as_object_mut(),
        _ => spec.pointer_mut("/template/spec")?.as_object_mut(),
    }
}

fn labels_to_value(labels: BTreeMap<String, String>) -> Value {
    Value::Object(
        labels
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}

/// Set the variant's version label everywhere it has to agree
fn add_version_labels(resource: &mut Resource, variant: Variant) {
    let labels = variant.labels();

    update_object_labels(resource, &labels, false);
    if variant.annotates() {
        update_object_annotations(resource, &labels, false);
    }
    update_selector_labels(resource, &labels, false);

    if resource.resource_kind() != ResourceKind::Service {
        update_spec_labels(resource, &labels, false);
    }
}

/// Clone `resource` into the given variant
///
/// Renames when the variant carries a suffix, sets the version label on
/// object labels, selector and pod template, and overwrites the replica
/// count when one is supplied and the kind has one.
pub fn derive_variant(resource: &Resource, variant: Variant, replicas: Option<i32>) -> Resource {
    let mut derived = resource.clone();

    if let Some(suffix) = variant.suffix() {
        derived.metadata.name = Some(suffix.apply(resource.name()));
    }

    add_version_labels(&mut derived, variant);

    if let Some(replicas) = replicas {
        set_replicas(&mut derived, replicas);
    }

    derived
}

/// Clone `resource` with the variant's labels but its own name
///
/// Used to point an existing service's selector at a color.
pub fn relabel(resource: &Resource, variant: Variant) -> Resource {
    let mut relabelled = resource.clone();
    add_version_labels(&mut relabelled, variant);
    relabelled
}

/// Build the baseline from a stable object fetched from the cluster
///
/// `web-stable` becomes `web-baseline`.
pub fn derive_baseline_from_stable(
    stable: &Resource,
    replicas: i32,
) -> Result<Resource, ResourceError> {
    let stable_name = stable.name();
    let base = VariantSuffix::Stable.strip(stable_name).ok_or_else(|| {
        ResourceError::MissingVariantSuffix {
            name: stable_name.to_string(),
            suffix: VariantSuffix::Stable.as_str(),
        }
    })?;
    let baseline_name = VariantSuffix::Baseline.apply(base);

    let mut baseline = derive_variant(
        stable,
        Variant::Canary(CanaryVariant::Baseline),
        Some(replicas),
    );
    baseline.metadata.name = Some(baseline_name);
    Ok(baseline)
}

pub fn is_marked_stable(resource: &Resource) -> bool {
    resource
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CANARY_VERSION_LABEL))
        .map(|value| value == "stable")
        .unwrap_or(false)
}

/// Current value of a version label on the service selector
pub fn service_selector_label<'a>(service: &'a Resource, key: &str) -> Option<&'a str> {
    service
        .spec
        .get("selector")
        .and_then(|selector| selector.get(key))
        .and_then(Value::as_str)
}

/// Point ingress backends at renamed services
///
/// Covers `spec.defaultBackend` and every rule path, in both the
/// `service.name` and the older `serviceName` shape. Backends whose service
/// is not in `names` are left alone. Returns how many were rewritten.
pub fn rewrite_ingress_backends(ingress: &mut Resource, names: &HashMap<String, String>) -> usize {
    let mut rewritten = 0;
    for_each_ingress_backend(&mut ingress.spec, |backend| {
        let Some(slot) = backend_service_name(backend) else {
            return;
        };
        if let Some(renamed) = slot.as_str().and_then(|name| names.get(name)) {
            *slot = Value::String(renamed.clone());
            rewritten += 1;
        }
    });
    rewritten
}

fn for_each_ingress_backend<F>(spec: &mut Value, mut visit: F)
where
    F: FnMut(&mut Map<String, Value>),
{
    for key in ["defaultBackend", "backend"] {
        if let Some(backend) = spec.get_mut(key).and_then(Value::as_object_mut) {
            visit(backend);
        }
    }

    let Some(rules) = spec.get_mut("rules").and_then(Value::as_array_mut) else {
        return;
    };
    for rule in rules {
        let Some(paths) = rule.pointer_mut("/http/paths").and_then(Value::as_array_mut) else {
            continue;
        };
        for path in paths {
            if let Some(backend) = path.get_mut("backend").and_then(Value::as_object_mut) {
                visit(backend);
            }
        }
    }
}

fn backend_service_name(backend: &mut Map<String, Value>) -> Option<&mut Value> {
    if backend.contains_key("serviceName") {
        return backend.get_mut("serviceName");
    }
    backend.get_mut("service")?.get_mut("name")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "mutate_test.rs"]
mod tests;
