//! `ClusterControl` backed by the kubectl binary

use super::{ClusterControl, ClusterError, ExecResult};
use crate::resource::Resource;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs kubectl, scoped to an optional default namespace
#[derive(Debug, Clone)]
pub struct Kubectl {
    kubectl_path: PathBuf,
    namespace: Option<String>,
}

impl Kubectl {
    pub fn new(kubectl_path: impl Into<PathBuf>, namespace: Option<String>) -> Self {
        Kubectl {
            kubectl_path: kubectl_path.into(),
            namespace,
        }
    }

    fn push_namespace(&self, args: &mut Vec<String>, namespace: Option<&str>) {
        if let Some(ns) = namespace.or(self.namespace.as_deref()) {
            args.push("--namespace".to_string());
            args.push(ns.to_string());
        }
    }

    pub(crate) fn apply_args(&self, force: bool) -> Vec<String> {
        let mut args = vec!["apply".to_string(), "-f".to_string(), "-".to_string()];
        if force {
            args.push("--force".to_string());
        }
        self.push_namespace(&mut args, None);
        args
    }

    pub(crate) fn get_args(&self, kind: &str, name: &str, namespace: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "get".to_string(),
            kind.to_string(),
            name.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        self.push_namespace(&mut args, namespace);
        args
    }

    pub(crate) fn delete_args(&self, targets: &[String]) -> Vec<String> {
        let mut args = vec!["delete".to_string()];
        args.extend(targets.iter().cloned());
        self.push_namespace(&mut args, None);
        args
    }

    pub(crate) fn describe_args(&self, namespace: Option<&str>, kind: &str, name: &str) -> Vec<String> {
        let mut args = vec!["describe".to_string()];
        self.push_namespace(&mut args, namespace);
        args.push(kind.to_string());
        args.push(name.to_string());
        args
    }

    pub(crate) fn rollout_status_args(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "rollout".to_string(),
            "status".to_string(),
            format!("{}/{}", kind, name),
        ];
        self.push_namespace(&mut args, namespace);
        args
    }

    async fn execute(
        &self,
        args: Vec<String>,
        stdin: Option<Vec<u8>>,
        silent: bool,
    ) -> Result<ExecResult, ClusterError> {
        let command_line = format!("{} {}", self.kubectl_path.display(), args.join(" "));
        debug!(command = %command_line, "Running kubectl");

        let spawn_error = |source| ClusterError::Spawn {
            command: command_line.clone(),
            source,
        };

        let mut command = Command::new(&self.kubectl_path);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(spawn_error)?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(&input).await.map_err(spawn_error)?;
                // pipe dropped here so kubectl sees EOF
            }
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;

        let result = ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !silent && !result.stdout.trim().is_empty() {
            info!("{}", result.stdout.trim());
        }

        Ok(result)
    }
}

#[async_trait]
impl ClusterControl for Kubectl {
    async fn apply(&self, manifests: &[Resource], force: bool) -> Result<ExecResult, ClusterError> {
        let list = serde_json::json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": manifests,
        });
        let body = serde_json::to_vec(&list)?;
        self.execute(self.apply_args(force), Some(body), false).await
    }

    async fn get(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> Result<ExecResult, ClusterError> {
        self.execute(self.get_args(kind, name, namespace), None, true)
            .await
    }

    async fn delete(&self, args: &[String]) -> Result<ExecResult, ClusterError> {
        self.execute(self.delete_args(args), None, false).await
    }

    async fn describe(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
        silent: bool,
    ) -> Result<ExecResult, ClusterError> {
        self.execute(self.describe_args(namespace, kind, name), None, silent)
            .await
    }

    async fn rollout_status(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<ExecResult, ClusterError> {
        self.execute(self.rollout_status_args(namespace, kind, name), None, false)
            .await
    }

    async fn api_versions(&self) -> Result<ExecResult, ClusterError> {
        self.execute(vec!["api-versions".to_string()], None, true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_apply_args() {
        let kubectl = Kubectl::new("kubectl", Some("testNamespace".to_string()));
        assert_eq!(
            kubectl.apply_args(false),
            strings(&["apply", "-f", "-", "--namespace", "testNamespace"])
        );
        assert_eq!(
            kubectl.apply_args(true),
            strings(&["apply", "-f", "-", "--force", "--namespace", "testNamespace"])
        );
    }

    #[test]
    fn test_get_args_prefers_explicit_namespace() {
        let kubectl = Kubectl::new("kubectl", Some("default".to_string()));
        assert_eq!(
            kubectl.get_args("deployment", "web", Some("prod")),
            strings(&["get", "deployment", "web", "-o", "json", "--namespace", "prod"])
        );
        assert_eq!(
            kubectl.get_args("deployment", "web", None),
            strings(&["get", "deployment", "web", "-o", "json", "--namespace", "default"])
        );
    }

    #[test]
    fn test_describe_args_without_namespace() {
        let kubectl = Kubectl::new("kubectl", None);
        assert_eq!(
            kubectl.describe_args(None, "pod", "debug"),
            strings(&["describe", "pod", "debug"])
        );
        assert_eq!(
            kubectl.describe_args(Some("prod"), "pod", "debug"),
            strings(&["describe", "--namespace", "prod", "pod", "debug"])
        );
    }

    #[test]
    fn test_rollout_status_and_delete_args() {
        let kubectl = Kubectl::new("kubectl", Some("prod".to_string()));
        assert_eq!(
            kubectl.rollout_status_args(None, "Deployment", "web-canary"),
            strings(&["rollout", "status", "Deployment/web-canary", "--namespace", "prod"])
        );
        assert_eq!(
            kubectl.delete_args(&strings(&["Deployment", "web-canary"])),
            strings(&["delete", "Deployment", "web-canary", "--namespace", "prod"])
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let kubectl = Kubectl::new("/nonexistent/kubectl-binary", None);
        let result = kubectl.api_versions().await;
        assert!(matches!(result, Err(ClusterError::Spawn { .. })));
    }
}
