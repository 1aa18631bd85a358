//! Command line and environment configuration
//!
//! Every setting is a `--flag` that falls back to a `SIIRTO_*` variable.
//! Manifest paths are positional.

use crate::controller::replicas::{validate_percentage, validate_replica_override, ValidationError};
use clap::{Args, Parser};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const ENV_ACTION: &str = "SIIRTO_ACTION";
pub const ENV_STRATEGY: &str = "SIIRTO_STRATEGY";
pub const ENV_TRAFFIC_SPLIT_METHOD: &str = "SIIRTO_TRAFFIC_SPLIT_METHOD";
pub const ENV_PERCENTAGE: &str = "SIIRTO_PERCENTAGE";
pub const ENV_BASELINE_AND_CANARY_REPLICAS: &str = "SIIRTO_BASELINE_AND_CANARY_REPLICAS";
pub const ENV_FORCE: &str = "SIIRTO_FORCE";
pub const ENV_NAMESPACE: &str = "SIIRTO_NAMESPACE";
pub const ENV_IMAGE_PULL_SECRETS: &str = "SIIRTO_IMAGE_PULL_SECRETS";
pub const ENV_ANNOTATIONS: &str = "SIIRTO_ANNOTATIONS";
pub const ENV_LABELS: &str = "SIIRTO_LABELS";
pub const ENV_KUBECTL: &str = "SIIRTO_KUBECTL";
pub const ENV_ROUTE_METHOD: &str = "SIIRTO_ROUTE_METHOD";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown action: {0} (expected deploy, promote or reject)")]
    UnknownAction(String),

    #[error("Unknown strategy: {0} (expected basic, canary or blue-green)")]
    UnknownStrategy(String),

    #[error("Unknown traffic split method: {0} (expected pod or smi)")]
    UnknownTrafficSplitMethod(String),

    #[error("Unknown route method: {0} (expected service, ingress or smi)")]
    UnknownRouteMethod(String),

    #[error("Entries must look like key=value, got {0:?}")]
    InvalidPair(String),

    #[error("List entries must not be blank")]
    BlankEntry,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    Deploy,
    Promote,
    Reject,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Deploy => "deploy",
            Action::Promote => "promote",
            Action::Reject => "reject",
        }
    }
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deploy" => Ok(Action::Deploy),
            "promote" => Ok(Action::Promote),
            "reject" => Ok(Action::Reject),
            _ => Err(ConfigError::UnknownAction(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentStrategy {
    #[default]
    Basic,
    Canary,
    BlueGreen,
}

impl DeploymentStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStrategy::Basic => "basic",
            DeploymentStrategy::Canary => "canary",
            DeploymentStrategy::BlueGreen => "blue-green",
        }
    }
}

impl FromStr for DeploymentStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" | "none" | "" => Ok(DeploymentStrategy::Basic),
            "canary" => Ok(DeploymentStrategy::Canary),
            "blue-green" => Ok(DeploymentStrategy::BlueGreen),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the canary share of traffic is shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrafficSplitMethod {
    /// Replica counts alone approximate the share
    #[default]
    Pod,
    /// An SMI TrafficSplit object carries explicit weights
    Smi,
}

impl FromStr for TrafficSplitMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pod" => Ok(TrafficSplitMethod::Pod),
            "smi" => Ok(TrafficSplitMethod::Smi),
            _ => Err(ConfigError::UnknownTrafficSplitMethod(s.to_string())),
        }
    }
}

impl TrafficSplitMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            TrafficSplitMethod::Pod => "pod",
            TrafficSplitMethod::Smi => "smi",
        }
    }
}

impl fmt::Display for TrafficSplitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How blue/green moves traffic between the two colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMethod {
    /// Service selectors are switched to the green label
    #[default]
    Service,
    /// Ingress backends are pointed at the `-green` services
    Ingress,
    /// A TrafficSplit shifts weight between `-stable` and `-green` services
    Smi,
}

impl RouteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteMethod::Service => "service",
            RouteMethod::Ingress => "ingress",
            RouteMethod::Smi => "smi",
        }
    }
}

impl FromStr for RouteMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service" => Ok(RouteMethod::Service),
            "ingress" => Ok(RouteMethod::Ingress),
            "smi" => Ok(RouteMethod::Smi),
            _ => Err(ConfigError::UnknownRouteMethod(s.to_string())),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Parser)]
#[command(name = "siirto", version)]
#[command(about = "Progressive rollouts of Kubernetes manifests through kubectl", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: DeployConfig,

    /// Manifest files, applied in argument order
    #[arg(required = true)]
    pub manifests: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct DeployConfig {
    #[arg(long, env = ENV_ACTION, default_value_t = Action::Deploy)]
    pub action: Action,

    #[arg(long, env = ENV_STRATEGY, default_value_t = DeploymentStrategy::Basic)]
    pub strategy: DeploymentStrategy,

    #[arg(long, env = ENV_TRAFFIC_SPLIT_METHOD, default_value_t = TrafficSplitMethod::Pod)]
    pub traffic_split_method: TrafficSplitMethod,

    /// Blue/green routing: service, ingress or smi
    #[arg(long, env = ENV_ROUTE_METHOD, default_value_t = RouteMethod::Service)]
    pub route_method: RouteMethod,

    /// Target canary share, 0-100
    #[arg(long, env = ENV_PERCENTAGE, allow_negative_numbers = true)]
    pub percentage: Option<i32>,

    /// Fixed replica count for canary and baseline, 0-100
    #[arg(long, env = ENV_BASELINE_AND_CANARY_REPLICAS, allow_negative_numbers = true)]
    pub baseline_and_canary_replicas: Option<i32>,

    #[arg(long, env = ENV_FORCE, value_parser = clap::builder::BoolishValueParser::new())]
    pub force: bool,

    /// Default namespace for every cluster call
    #[arg(long, env = ENV_NAMESPACE)]
    pub namespace: Option<String>,

    #[arg(long, env = ENV_IMAGE_PULL_SECRETS, value_delimiter = ',', value_parser = parse_entry)]
    pub image_pull_secrets: Vec<String>,

    /// Stamped on generated traffic split objects, as key=value,key=value
    #[arg(long, env = ENV_ANNOTATIONS, value_parser = parse_pairs, default_value = "")]
    pub annotations: BTreeMap<String, String>,

    #[arg(long, env = ENV_LABELS, value_parser = parse_pairs, default_value = "")]
    pub labels: BTreeMap<String, String>,

    #[arg(long = "kubectl", env = ENV_KUBECTL, default_value = "kubectl")]
    pub kubectl_path: PathBuf,
}

impl Default for DeployConfig {
    fn default() -> Self {
        DeployConfig {
            action: Action::default(),
            strategy: DeploymentStrategy::default(),
            traffic_split_method: TrafficSplitMethod::default(),
            route_method: RouteMethod::default(),
            percentage: None,
            baseline_and_canary_replicas: None,
            force: false,
            namespace: None,
            image_pull_secrets: Vec::new(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            kubectl_path: PathBuf::from("kubectl"),
        }
    }
}

impl DeployConfig {
    /// Check ranges before anything touches the cluster
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(percentage) = self.percentage {
            validate_percentage(percentage)?;
        }
        if let Some(replicas) = self.baseline_and_canary_replicas {
            validate_replica_override(replicas)?;
        }
        if self.strategy == DeploymentStrategy::Canary
            && self.action == Action::Deploy
            && self.percentage.is_none()
        {
            return Err(ValidationError::PercentageRequired.into());
        }
        Ok(())
    }

    pub fn canary_percentage(&self) -> i32 {
        self.percentage.unwrap_or(0)
    }
}

fn parse_entry(value: &str) -> Result<String, ConfigError> {
    match value.trim() {
        "" => Err(ConfigError::BlankEntry),
        entry => Ok(entry.to_string()),
    }
}

fn parse_pairs(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                Ok((k.trim().to_string(), v.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidPair(pair.to_string())),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::ffi::OsStr;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("siirto").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["app.yaml"]).unwrap();
        assert_eq!(cli.config, DeployConfig::default());
        assert_eq!(cli.config.kubectl_path, PathBuf::from("kubectl"));
        assert_eq!(cli.manifests, vec![PathBuf::from("app.yaml")]);
        assert!(cli.config.validate().is_ok());
    }

    #[test]
    fn test_manifests_are_required() {
        let err = parse(&["--strategy", "canary"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_full_canary_config() {
        let cli = parse(&[
            "--action",
            "Promote",
            "--strategy",
            "CANARY",
            "--traffic-split-method",
            "smi",
            "--percentage",
            "20",
            "--baseline-and-canary-replicas",
            "3",
            "--force",
            "--namespace",
            "prod",
            "--image-pull-secrets",
            "regcred, mirror-cred",
            "--annotations",
            "team=payments,run=42",
            "--kubectl",
            "/usr/local/bin/kubectl",
            "web.yaml",
            "svc.yaml",
        ])
        .unwrap();
        let config = cli.config;

        assert_eq!(config.action, Action::Promote);
        assert_eq!(config.strategy, DeploymentStrategy::Canary);
        assert_eq!(config.traffic_split_method, TrafficSplitMethod::Smi);
        assert_eq!(config.route_method, RouteMethod::Service);
        assert_eq!(config.percentage, Some(20));
        assert_eq!(config.baseline_and_canary_replicas, Some(3));
        assert!(config.force);
        assert_eq!(config.namespace.as_deref(), Some("prod"));
        assert_eq!(config.image_pull_secrets, vec!["regcred", "mirror-cred"]);
        assert_eq!(config.annotations.get("team").map(String::as_str), Some("payments"));
        assert_eq!(config.annotations.get("run").map(String::as_str), Some("42"));
        assert!(config.labels.is_empty());
        assert_eq!(config.kubectl_path, PathBuf::from("/usr/local/bin/kubectl"));
        assert_eq!(
            cli.manifests,
            vec![PathBuf::from("web.yaml"), PathBuf::from("svc.yaml")]
        );
    }

    #[test]
    fn test_blue_green_route_method() {
        let cli = parse(&["--strategy", "blue-green", "--route-method", "Ingress", "a.yaml"]).unwrap();
        assert_eq!(cli.config.strategy, DeploymentStrategy::BlueGreen);
        assert_eq!(cli.config.route_method, RouteMethod::Ingress);
    }

    #[test]
    fn test_every_setting_reads_its_variable() {
        let command = Cli::command();
        let expected = [
            ("action", ENV_ACTION),
            ("strategy", ENV_STRATEGY),
            ("traffic_split_method", ENV_TRAFFIC_SPLIT_METHOD),
            ("route_method", ENV_ROUTE_METHOD),
            ("percentage", ENV_PERCENTAGE),
            ("baseline_and_canary_replicas", ENV_BASELINE_AND_CANARY_REPLICAS),
            ("force", ENV_FORCE),
            ("namespace", ENV_NAMESPACE),
            ("image_pull_secrets", ENV_IMAGE_PULL_SECRETS),
            ("annotations", ENV_ANNOTATIONS),
            ("labels", ENV_LABELS),
            ("kubectl_path", ENV_KUBECTL),
        ];
        for (id, env) in expected {
            let arg = command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .unwrap_or_else(|| panic!("no argument {}", id));
            assert_eq!(arg.get_env(), Some(OsStr::new(env)), "argument {}", id);
        }
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        for args in [
            ["--strategy", "rainbow"],
            ["--action", "undo"],
            ["--traffic-split-method", "istio"],
            ["--route-method", "dns"],
        ] {
            let err = parse(&[args[0], args[1], "a.yaml"]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation, "{:?}", args);
        }
        assert_eq!(
            "rainbow".parse::<DeploymentStrategy>(),
            Err(ConfigError::UnknownStrategy("rainbow".to_string()))
        );
        assert_eq!(
            "dns".parse::<RouteMethod>(),
            Err(ConfigError::UnknownRouteMethod("dns".to_string()))
        );
    }

    #[test]
    fn test_malformed_values() {
        assert!(parse(&["--percentage", "twenty", "a.yaml"]).is_err());
        assert!(parse(&["--force=yes please", "a.yaml"]).is_err());
        assert!(parse(&["--labels", "team", "a.yaml"]).is_err());
        assert!(parse(&["--image-pull-secrets", "regcred,,mirror", "a.yaml"]).is_err());
        assert_eq!(parse_pairs("team"), Err(ConfigError::InvalidPair("team".to_string())));
    }

    #[test]
    fn test_negative_percentage_reaches_validation() {
        let cli = parse(&["--percentage", "-5", "a.yaml"]).unwrap();
        assert_eq!(
            cli.config.validate(),
            Err(ConfigError::Validation(ValidationError::PercentageOutOfRange(-5)))
        );
    }

    #[test]
    fn test_validate_ranges() {
        let config = DeployConfig {
            percentage: Some(150),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Validation(ValidationError::PercentageOutOfRange(150)))
        );

        let config = DeployConfig {
            baseline_and_canary_replicas: Some(101),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Validation(
                ValidationError::ReplicaOverrideOutOfRange(101)
            ))
        );
    }

    #[test]
    fn test_canary_deploy_needs_percentage() {
        let config = DeployConfig {
            strategy: DeploymentStrategy::Canary,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Validation(ValidationError::PercentageRequired))
        );

        let promote = DeployConfig {
            action: Action::Promote,
            ..config
        };
        assert!(promote.validate().is_ok());
    }
}
