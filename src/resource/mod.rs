//! Resource model for manifest documents
//!
//! A `Resource` is one parsed manifest document. `kind` and `metadata.name`
//! are checked when the document is parsed, so every `Resource` built through
//! [`Resource::from_value`] carries both.

pub mod classify;
pub mod mutate;
pub mod naming;

pub use classify::{classify, is_service_routed, selector_matches, ManifestSet};
pub use mutate::{
    derive_baseline_from_stable, derive_variant, is_marked_stable, update_image_pull_secrets,
    BlueGreenColor, CanaryVariant, Variant, BLUE_GREEN_VERSION_LABEL, CANARY_VERSION_LABEL,
};
pub use naming::VariantSuffix;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource kind not defined")]
    KindNotDefined,

    #[error("Input object metadata not defined (kind {0})")]
    MetadataNotDefined(String),

    #[error("Input object name not defined (kind {0})")]
    NameNotDefined(String),

    #[error("{kind} {name} has invalid spec.replicas {value}")]
    InvalidReplicas {
        kind: String,
        name: String,
        value: String,
    },

    #[error("Manifest document is not an object")]
    NotAnObject,

    #[error("Resource {name} does not end with variant suffix {suffix}")]
    MissingVariantSuffix { name: String, suffix: &'static str },

    #[error("Failed to decode resource: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to parse manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Closed set of kinds the engine treats specially
///
/// Anything else is `Other` and is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Service,
    Ingress,
    Other,
}

impl ResourceKind {
    /// Kind names are matched case-insensitively
    pub fn from_kind(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "pod" => ResourceKind::Pod,
            "deployment" => ResourceKind::Deployment,
            "replicaset" => ResourceKind::ReplicaSet,
            "statefulset" => ResourceKind::StatefulSet,
            "daemonset" => ResourceKind::DaemonSet,
            "job" => ResourceKind::Job,
            "cronjob" => ResourceKind::CronJob,
            "service" => ResourceKind::Service,
            "ingress" => ResourceKind::Ingress,
            _ => ResourceKind::Other,
        }
    }

    /// Kinds the strategies derive variants for
    pub fn is_deployment_like(self) -> bool {
        matches!(
            self,
            ResourceKind::Pod
                | ResourceKind::Deployment
                | ResourceKind::ReplicaSet
                | ResourceKind::StatefulSet
                | ResourceKind::DaemonSet
        )
    }

    /// Every kind that manages running containers
    pub fn is_workload(self) -> bool {
        self.is_deployment_like() || matches!(self, ResourceKind::Job | ResourceKind::CronJob)
    }

    pub fn has_replicas(self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment | ResourceKind::ReplicaSet | ResourceKind::StatefulSet
        )
    }

    pub fn has_pod_template(self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment
                | ResourceKind::ReplicaSet
                | ResourceKind::StatefulSet
                | ResourceKind::DaemonSet
                | ResourceKind::Job
        )
    }

    /// Pods have no selector of their own; services use a flat selector map
    pub fn has_selector(self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment
                | ResourceKind::ReplicaSet
                | ResourceKind::StatefulSet
                | ResourceKind::DaemonSet
                | ResourceKind::Job
                | ResourceKind::Service
        )
    }

    pub fn supports_rollout_status(self) -> bool {
        matches!(
            self,
            ResourceKind::Deployment | ResourceKind::DaemonSet | ResourceKind::StatefulSet
        )
    }
}

/// A single manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub spec: Value,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub status: Value,

    /// Top-level fields outside the common shape (ConfigMap `data`, etc.)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    /// Parse a manifest document, rejecting documents without kind or name
    pub fn from_value(value: Value) -> Result<Self, ResourceError> {
        let object = value.as_object().ok_or(ResourceError::NotAnObject)?;

        let kind = match object.get("kind").and_then(Value::as_str) {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => return Err(ResourceError::KindNotDefined),
        };

        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| ResourceError::MetadataNotDefined(kind.clone()))?;

        let name = match metadata.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(ResourceError::NameNotDefined(kind)),
        };

        if ResourceKind::from_kind(&kind).has_replicas() {
            if let Some(replicas) = value.pointer("/spec/replicas").filter(|r| !r.is_null()) {
                let in_range = replicas
                    .as_i64()
                    .and_then(|r| i32::try_from(r).ok())
                    .is_some_and(|r| r >= 0);
                if !in_range {
                    return Err(ResourceError::InvalidReplicas {
                        kind,
                        name,
                        value: replicas.to_string(),
                    });
                }
            }
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::from_kind(&self.kind)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Declared replica count, `None` for kinds without one
    ///
    /// A replica-carrying kind with no `spec.replicas` defaults to 1.
    pub fn replica_count(&self) -> Option<i32> {
        if !self.resource_kind().has_replicas() {
            return None;
        }
        let replicas = self
            .spec
            .get("replicas")
            .and_then(Value::as_i64)
            .and_then(|r| i32::try_from(r).ok())
            .unwrap_or(1);
        Some(replicas)
    }

    /// Reduce an object read back from the cluster to its declarative core
    ///
    /// Keeps name, namespace, labels and annotations; drops uid,
    /// resourceVersion, managedFields and the like, and clears status.
    pub fn strip_cluster_details(&mut self) {
        let metadata = std::mem::take(&mut self.metadata);
        self.metadata = ObjectMeta {
            name: metadata.name,
            namespace: metadata.namespace,
            labels: Some(metadata.labels.unwrap_or_default()),
            annotations: Some(metadata.annotations.unwrap_or_default()),
            ..Default::default()
        };
        if !self.status.is_null() {
            self.status = Value::Object(Map::new());
        }
    }

    pub fn to_value(&self) -> Result<Value, ResourceError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Parse a multi-document YAML stream into resources
///
/// Empty documents (a bare `---`) are skipped; every other document must
/// carry a kind and a name.
pub fn parse_documents(yaml: &str) -> Result<Vec<Resource>, ResourceError> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        resources.push(Resource::from_value(value)?);
    }
    Ok(resources)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "resource_test.rs"]
mod tests;
