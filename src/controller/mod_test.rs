use super::*;
use crate::cluster::mock::MockCluster;
use crate::config::{DeploymentStrategy, TrafficSplitMethod};
use crate::controller::replicas::ValidationError;
use serde_json::json;

fn manifests() -> Vec<Resource> {
    [
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web" },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": "web" } },
                "template": {
                    "metadata": { "labels": { "app": "web" } },
                    "spec": {
                        "containers": [{ "name": "web", "image": "nginx" }],
                        "imagePullSecrets": [{ "name": "existing" }]
                    }
                }
            }
        }),
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "web" },
            "spec": { "selector": { "app": "web" } }
        }),
    ]
    .into_iter()
    .map(|v| Resource::from_value(v).unwrap())
    .collect()
}

#[tokio::test]
async fn test_run_rejects_invalid_config_before_touching_cluster() {
    let cluster = Arc::new(MockCluster::new());
    let config = DeployConfig {
        strategy: DeploymentStrategy::Canary,
        ..Default::default()
    };
    let ctx = Context::new_mock(cluster.clone(), config);

    let result = run(Action::Deploy, &manifests(), &ctx).await;

    assert!(matches!(
        result,
        Err(DeployError::Config(ConfigError::Validation(
            ValidationError::PercentageRequired
        )))
    ));
    assert!(cluster.applied().is_empty());
}

#[tokio::test]
async fn test_run_adds_image_pull_secrets_to_workloads() {
    let cluster = Arc::new(MockCluster::new());
    let config = DeployConfig {
        image_pull_secrets: vec!["regcred".to_string()],
        ..Default::default()
    };
    let ctx = Context::new_mock(cluster.clone(), config);

    let outcome = run(Action::Deploy, &manifests(), &ctx).await.unwrap();
    assert_eq!(outcome.applied.len(), 2);

    let web = cluster.applied_object("Deployment", "web").unwrap();
    assert_eq!(
        web.spec["template"]["spec"]["imagePullSecrets"],
        json!([{ "name": "existing" }, { "name": "regcred" }])
    );
    let service = cluster.applied_object("Service", "web").unwrap();
    assert!(service.spec.get("imagePullSecrets").is_none());
}

#[tokio::test]
async fn test_run_dispatches_action_to_strategy() {
    let cluster = Arc::new(MockCluster::new());
    let config = DeployConfig {
        strategy: DeploymentStrategy::Canary,
        traffic_split_method: TrafficSplitMethod::Pod,
        ..Default::default()
    };
    let ctx = Context::new_mock(cluster.clone(), config);

    let outcome = run(Action::Reject, &manifests(), &ctx).await.unwrap();

    assert!(outcome.applied.is_empty());
    assert_eq!(outcome.deleted.len(), 2);
}

#[tokio::test]
async fn test_basic_strategy_cannot_promote() {
    let cluster = Arc::new(MockCluster::new());
    let ctx = Context::new_mock(cluster.clone(), DeployConfig::default());

    let result = run(Action::Promote, &manifests(), &ctx).await;

    assert!(matches!(
        result,
        Err(DeployError::Strategy(StrategyError::UnsupportedAction { .. }))
    ));
}

#[tokio::test]
async fn test_traffic_split_api_version_is_cached() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_api_versions("apps/v1\nsplit.smi-spec.io/v1alpha2\nv1\n");
    let ctx = Context::new_mock(cluster.clone(), DeployConfig::default());

    assert_eq!(
        ctx.traffic_split_api_version().await.unwrap(),
        "split.smi-spec.io/v1alpha2"
    );
    cluster.set_api_versions("split.smi-spec.io/v1alpha4\n");
    assert_eq!(
        ctx.traffic_split_api_version().await.unwrap(),
        "split.smi-spec.io/v1alpha2"
    );
    assert_eq!(cluster.api_version_calls(), 1);
}

#[tokio::test]
async fn test_traffic_split_api_unavailable_is_retried() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_api_versions("apps/v1\nv1\n");
    let ctx = Context::new_mock(cluster.clone(), DeployConfig::default());

    assert!(matches!(
        ctx.traffic_split_api_version().await,
        Err(ClusterError::TrafficSplitApiUnavailable)
    ));

    // a failed lookup leaves the cache empty
    cluster.set_api_versions("split.smi-spec.io/v1alpha3\n");
    assert_eq!(
        ctx.traffic_split_api_version().await.unwrap(),
        "split.smi-spec.io/v1alpha3"
    );
    assert_eq!(cluster.api_version_calls(), 2);
}

#[test]
fn test_prepare_manifests_leaves_input_untouched() {
    let input = manifests();
    let config = DeployConfig {
        image_pull_secrets: vec!["regcred".to_string()],
        ..Default::default()
    };

    let prepared = prepare_manifests(&input, &config);

    assert_ne!(prepared[0], input[0]);
    assert_eq!(prepared[1], input[1]);
    assert_eq!(
        input[0].spec["template"]["spec"]["imagePullSecrets"],
        json!([{ "name": "existing" }])
    );
}
