//! In-memory `ClusterControl` for tests
//!
//! Stores applied objects so later `get` calls see them, records every
//! delete/describe/rollout-status call, and can be scripted to fail.

#![allow(clippy::unwrap_used)]

use super::{ClusterControl, ClusterError, ExecResult};
use crate::resource::Resource;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

type Key = (String, String);

fn key(kind: &str, name: &str) -> Key {
    (kind.to_ascii_lowercase(), name.to_string())
}

pub struct MockCluster {
    objects: Mutex<HashMap<Key, Value>>,
    scripted: Mutex<HashMap<Key, VecDeque<Value>>>,
    applied: Mutex<Vec<Vec<Resource>>>,
    forced: Mutex<Vec<bool>>,
    deleted: Mutex<Vec<(String, String)>>,
    described: Mutex<Vec<(String, String)>>,
    rollout_checked: Mutex<Vec<(String, String)>>,
    rollout_failures: Mutex<HashSet<String>>,
    gets: Mutex<Vec<Key>>,
    api_version_calls: Mutex<usize>,
    api_versions: Mutex<String>,
    fail_gets: Mutex<bool>,
    fail_applies: Mutex<bool>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        MockCluster {
            objects: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
            forced: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            described: Mutex::new(Vec::new()),
            rollout_checked: Mutex::new(Vec::new()),
            rollout_failures: Mutex::new(HashSet::new()),
            gets: Mutex::new(Vec::new()),
            api_version_calls: Mutex::new(0),
            api_versions: Mutex::new("v1\napps/v1\nsplit.smi-spec.io/v1alpha3\n".to_string()),
            fail_gets: Mutex::new(false),
            fail_applies: Mutex::new(false),
        }
    }

    /// Seed an object as if it were already on the cluster
    pub fn insert(&self, object: Value) {
        let kind = object["kind"].as_str().unwrap_or_default().to_string();
        let name = object["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.objects.lock().unwrap().insert(key(&kind, &name), object);
    }

    /// Successive `get` responses for one object; the last one repeats
    pub fn script(&self, kind: &str, name: &str, responses: Vec<Value>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(key(kind, name), responses.into());
    }

    pub fn fail_rollout(&self, name: &str) {
        self.rollout_failures.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_gets(&self) {
        *self.fail_gets.lock().unwrap() = true;
    }

    pub fn fail_applies(&self) {
        *self.fail_applies.lock().unwrap() = true;
    }

    pub fn set_api_versions(&self, versions: &str) {
        *self.api_versions.lock().unwrap() = versions.to_string();
    }

    pub fn applied(&self) -> Vec<Vec<Resource>> {
        self.applied.lock().unwrap().clone()
    }

    /// Names of every applied object, in apply order
    pub fn applied_names(&self) -> Vec<String> {
        self.applied()
            .iter()
            .flatten()
            .map(|r| r.name().to_string())
            .collect()
    }

    /// Last applied object with this kind and name
    pub fn applied_object(&self, kind: &str, name: &str) -> Option<Resource> {
        self.applied()
            .into_iter()
            .flatten()
            .filter(|r| r.kind.eq_ignore_ascii_case(kind) && r.name() == name)
            .last()
    }

    pub fn forced(&self) -> Vec<bool> {
        self.forced.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn described(&self) -> Vec<(String, String)> {
        self.described.lock().unwrap().clone()
    }

    pub fn rollout_checked(&self) -> Vec<(String, String)> {
        self.rollout_checked.lock().unwrap().clone()
    }

    pub fn get_count(&self, kind: &str, name: &str) -> usize {
        let wanted = key(kind, name);
        self.gets
            .lock()
            .unwrap()
            .iter()
            .filter(|k| **k == wanted)
            .count()
    }

    pub fn api_version_calls(&self) -> usize {
        *self.api_version_calls.lock().unwrap()
    }

    pub fn contains(&self, kind: &str, name: &str) -> bool {
        self.objects.lock().unwrap().contains_key(&key(kind, name))
    }
}

#[async_trait]
impl ClusterControl for MockCluster {
    async fn apply(&self, manifests: &[Resource], force: bool) -> Result<ExecResult, ClusterError> {
        if *self.fail_applies.lock().unwrap() {
            return Ok(ExecResult::failure("error: admission webhook denied the request"));
        }
        for manifest in manifests {
            self.objects.lock().unwrap().insert(
                key(&manifest.kind, manifest.name()),
                serde_json::to_value(manifest)?,
            );
        }
        self.applied.lock().unwrap().push(manifests.to_vec());
        self.forced.lock().unwrap().push(force);
        Ok(ExecResult::success("configured"))
    }

    async fn get(
        &self,
        kind: &str,
        name: &str,
        _namespace: Option<&str>,
    ) -> Result<ExecResult, ClusterError> {
        let k = key(kind, name);
        self.gets.lock().unwrap().push(k.clone());

        if *self.fail_gets.lock().unwrap() {
            return Err(ClusterError::CommandFailed("connection refused".to_string()));
        }

        if let Some(queue) = self.scripted.lock().unwrap().get_mut(&k) {
            let response = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(response) = response {
                return Ok(ExecResult::success(response.to_string()));
            }
        }

        match self.objects.lock().unwrap().get(&k) {
            Some(object) => Ok(ExecResult::success(object.to_string())),
            None => Ok(ExecResult::failure(format!(
                "Error from server (NotFound): {} \"{}\" not found",
                kind, name
            ))),
        }
    }

    async fn delete(&self, args: &[String]) -> Result<ExecResult, ClusterError> {
        let kind = args.first().cloned().unwrap_or_default();
        let name = args.get(1).cloned().unwrap_or_default();
        self.deleted.lock().unwrap().push((kind.clone(), name.clone()));

        match self.objects.lock().unwrap().remove(&key(&kind, &name)) {
            Some(_) => Ok(ExecResult::success(format!("{} \"{}\" deleted", kind, name))),
            None => Ok(ExecResult::failure(format!(
                "Error from server (NotFound): {} \"{}\" not found",
                kind, name
            ))),
        }
    }

    async fn describe(
        &self,
        _namespace: Option<&str>,
        kind: &str,
        name: &str,
        _silent: bool,
    ) -> Result<ExecResult, ClusterError> {
        self.described
            .lock()
            .unwrap()
            .push((kind.to_string(), name.to_string()));
        Ok(ExecResult::success(format!("Name: {}", name)))
    }

    async fn rollout_status(
        &self,
        _namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<ExecResult, ClusterError> {
        self.rollout_checked
            .lock()
            .unwrap()
            .push((kind.to_string(), name.to_string()));
        if self.rollout_failures.lock().unwrap().contains(name) {
            return Ok(ExecResult::failure(format!(
                "error: deployment \"{}\" exceeded its progress deadline",
                name
            )));
        }
        Ok(ExecResult::success(format!(
            "deployment \"{}\" successfully rolled out",
            name
        )))
    }

    async fn api_versions(&self) -> Result<ExecResult, ClusterError> {
        *self.api_version_calls.lock().unwrap() += 1;
        Ok(ExecResult::success(self.api_versions.lock().unwrap().clone()))
    }
}
