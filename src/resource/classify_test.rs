use super::*;
use serde_json::json;

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn deployment(name: &str, app: &str) -> Resource {
    Resource::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name },
        "spec": {
            "replicas": 2,
            "selector": { "matchLabels": { "app": app } },
            "template": { "metadata": { "labels": { "app": app } } }
        }
    }))
    .unwrap()
}

fn service(name: &str, selector: serde_json::Value) -> Resource {
    Resource::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name },
        "spec": { "selector": selector }
    }))
    .unwrap()
}

#[test]
fn test_selector_matches_subset() {
    let l = labels(&[("app", "web"), ("tier", "frontend")]);
    assert!(selector_matches(&labels(&[("app", "web")]), &l));
    assert!(selector_matches(&l, &l));
    assert!(!selector_matches(&labels(&[("app", "api")]), &l));
    assert!(!selector_matches(&labels(&[("zone", "a")]), &l));
}

#[test]
fn test_selector_matches_empty_cases() {
    let l = labels(&[("app", "web")]);
    assert!(selector_matches(&BTreeMap::new(), &l));
    assert!(selector_matches(&BTreeMap::new(), &BTreeMap::new()));
    assert!(!selector_matches(&l, &BTreeMap::new()));
}

#[test]
fn test_selector_empty_value_still_requires_key() {
    let selector = labels(&[("canary", "")]);
    assert!(!selector_matches(&selector, &labels(&[("app", "web")])));
    assert!(selector_matches(&selector, &labels(&[("canary", "")])));
}

#[test]
fn test_is_service_routed() {
    let workloads = vec![deployment("web", "web")];
    assert!(is_service_routed(&service("web", json!({ "app": "web" })), &workloads));
    assert!(!is_service_routed(&service("api", json!({ "app": "api" })), &workloads));
}

#[test]
fn test_service_without_selector_is_not_routed() {
    let workloads = vec![deployment("web", "web")];
    let headless = Resource::from_value(json!({
        "kind": "Service",
        "metadata": { "name": "external" },
        "spec": { "type": "ExternalName", "externalName": "example.com" }
    }))
    .unwrap();
    assert!(!is_service_routed(&headless, &workloads));
}

#[test]
fn test_workload_without_match_labels_never_matches() {
    let bare = Resource::from_value(json!({
        "kind": "Deployment",
        "metadata": { "name": "legacy" },
        "spec": {}
    }))
    .unwrap();
    assert!(!is_service_routed(&service("web", json!({ "app": "web" })), &[bare]));
}

#[test]
fn test_bare_pod_matches_on_metadata_labels() {
    let pod = Resource::from_value(json!({
        "kind": "Pod",
        "metadata": { "name": "debug", "labels": { "app": "debug" } },
        "spec": { "containers": [] }
    }))
    .unwrap();
    assert!(is_service_routed(&service("debug", json!({ "app": "debug" })), &[pod]));
}

#[test]
fn test_classify_partitions_every_document() {
    let ingress = Resource::from_value(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": { "name": "web" },
        "spec": {}
    }))
    .unwrap();
    let config_map = Resource::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": "settings" },
        "data": {}
    }))
    .unwrap();

    let resources = vec![
        service("web", json!({ "app": "web" })),
        deployment("web", "web"),
        service("metrics", json!({ "app": "prometheus" })),
        ingress,
        config_map,
    ];

    let set = classify(&resources);

    assert_eq!(set.len(), resources.len());
    assert_eq!(set.workloads.len(), 1);
    assert_eq!(set.routed_services.len(), 1);
    assert_eq!(set.routed_services[0].name(), "web");
    assert_eq!(set.unrouted_services.len(), 1);
    assert_eq!(set.unrouted_services[0].name(), "metrics");
    assert_eq!(set.ingresses.len(), 1);
    assert_eq!(set.others.len(), 1);
    assert_eq!(
        set.service_name_map.get("web").map(String::as_str),
        Some("web-green")
    );
    assert!(!set.service_name_map.contains_key("metrics"));
}

#[test]
fn test_label_map_stringifies_scalars() {
    let map = label_map(&json!({ "version": 1, "enabled": true, "empty": null })).unwrap();
    assert_eq!(map.get("version").map(String::as_str), Some("1"));
    assert_eq!(map.get("enabled").map(String::as_str), Some("true"));
    assert_eq!(map.get("empty").map(String::as_str), Some(""));
}
