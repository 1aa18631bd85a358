//! Service-mesh traffic split objects
//!
//! Weights are permille (0-1000), not percentages. Canary splits have three
//! backends (stable, baseline and canary); blue/green splits have two
//! (stable and green).

use super::replicas::{validate_percentage, ValidationError};
use crate::resource::{Resource, ResourceError, VariantSuffix};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub const TRAFFIC_SPLIT_KIND: &str = "TrafficSplit";

/// API group whose served version is discovered at runtime
pub const TRAFFIC_SPLIT_API_GROUP: &str = "split.smi-spec.io";

pub const TOTAL_WEIGHT: u32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WeightError {
    #[error("Traffic split weights must sum to 1000, got {stable}+{baseline}+{canary}")]
    InvalidSum { stable: u32, baseline: u32, canary: u32 },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSplitWeights {
    pub stable: u32,
    pub baseline: u32,
    pub canary: u32,
}

impl TrafficSplitWeights {
    /// All traffic to stable
    pub const STABLE: TrafficSplitWeights = TrafficSplitWeights {
        stable: TOTAL_WEIGHT,
        baseline: 0,
        canary: 0,
    };

    /// All traffic to canary
    pub const CANARY: TrafficSplitWeights = TrafficSplitWeights {
        stable: 0,
        baseline: 0,
        canary: TOTAL_WEIGHT,
    };

    pub fn new(stable: u32, baseline: u32, canary: u32) -> Result<Self, WeightError> {
        if stable + baseline + canary != TOTAL_WEIGHT {
            return Err(WeightError::InvalidSum {
                stable,
                baseline,
                canary,
            });
        }
        Ok(TrafficSplitWeights {
            stable,
            baseline,
            canary,
        })
    }

    /// Linear ramp from stable to canary+baseline
    ///
    /// The canary share is split evenly between canary and baseline:
    /// 20% gives stable 800, baseline 100, canary 100.
    pub fn for_percentage(percentage: i32) -> Result<Self, WeightError> {
        let percentage = validate_percentage(percentage)? as u32;
        let shifted = percentage * 10;
        let half = shifted / 2;
        Self::new(TOTAL_WEIGHT - shifted, half, half)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplitBackend {
    pub service: String,
    #[serde(deserialize_with = "deserialize_weight")]
    pub weight: u32,
}

impl TrafficSplitBackend {
    pub fn new(service: impl Into<String>, weight: u32) -> Self {
        TrafficSplitBackend {
            service: service.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplitSpec {
    pub service: String,
    pub backends: Vec<TrafficSplitBackend>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplitMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: TrafficSplitMetadata,
    pub spec: TrafficSplitSpec,
}

impl TrafficSplit {
    /// Split for `service_name` across its stable, baseline and canary services
    pub fn build(
        api_version: &str,
        service_name: &str,
        weights: TrafficSplitWeights,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Self {
        let backends = vec![
            TrafficSplitBackend::new(VariantSuffix::Stable.apply(service_name), weights.stable),
            TrafficSplitBackend::new(
                VariantSuffix::Baseline.apply(service_name),
                weights.baseline,
            ),
            TrafficSplitBackend::new(VariantSuffix::Canary.apply(service_name), weights.canary),
        ];
        Self::with_backends(api_version, service_name, backends, labels, annotations)
    }

    /// Split for `service_name` over any backends; weights are taken as given
    pub fn with_backends(
        api_version: &str,
        service_name: &str,
        backends: Vec<TrafficSplitBackend>,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Self {
        TrafficSplit {
            api_version: api_version.to_string(),
            kind: TRAFFIC_SPLIT_KIND.to_string(),
            metadata: TrafficSplitMetadata {
                name: traffic_split_name(service_name),
                namespace: None,
                labels: labels.clone(),
                annotations: annotations.clone(),
            },
            spec: TrafficSplitSpec {
                service: service_name.to_string(),
                backends,
            },
        }
    }

    pub fn from_resource(resource: &Resource) -> Result<Self, ResourceError> {
        Ok(serde_json::from_value(resource.to_value()?)?)
    }

    pub fn to_resource(&self) -> Result<Resource, ResourceError> {
        Resource::from_value(serde_json::to_value(self)?)
    }

    pub fn backend_weight(&self, backend: &str) -> Option<u32> {
        self.spec
            .backends
            .iter()
            .find(|b| b.service == backend)
            .map(|b| b.weight)
    }

    /// Does `backend` already receive the full weight?
    pub fn routes_fully_to(&self, backend: &str) -> bool {
        self.spec
            .backends
            .iter()
            .any(|b| b.service == backend && b.weight == TOTAL_WEIGHT)
    }
}

pub fn traffic_split_name(service_name: &str) -> String {
    VariantSuffix::TrafficSplit.apply(service_name)
}

/// First served version of the traffic split API group in `api-versions` output
pub fn parse_traffic_split_api_version(api_versions: &str) -> Option<String> {
    api_versions
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(TRAFFIC_SPLIT_API_GROUP))
        .map(str::to_string)
}

/// Read a weight written either as an integer or as a quantity string
///
/// Older split API versions store weights as quantities, so full weight
/// comes back as `"1000m"`.
pub fn parse_weight(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let s = s.trim();
            s.strip_suffix('m').unwrap_or(s).parse().ok()
        }
        _ => None,
    }
}

fn deserialize_weight<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_weight(&value)
        .ok_or_else(|| D::Error::custom(format!("invalid traffic split weight: {}", value)))
}
