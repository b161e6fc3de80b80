//! In-memory control plane for exercising the runner and the orchestrator.

use remote_collect_cluster::{
    objects::{
        ConfigMap,
        Node,
        NodeCondition,
        NodeStatus,
        ObjectMeta,
        Pod,
        PodPhase,
        PodStatus,
        ResourceAttributes,
        RestartPolicy,
        HOSTNAME_LABEL,
    },
    ClusterError,
    ClusterFuture,
    ControlPlane,
    INTERNAL_ERROR_MARKER,
};
use serde_json::json;
use std::{
    collections::BTreeMap,
    sync::{
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

#[derive(Debug, Clone)]
pub(crate) struct Behaviour {
    /// Number of pod lookups after which a pod reaches `final_phase`.
    pub polls_to_finish: usize,
    pub final_phase: PodPhase,
    /// Log body for every pod instead of the per-node default.
    pub logs: Option<String>,
    /// Overrides the restart policy of created pods.
    pub restart_policy: Option<RestartPolicy>,
    pub fail_deletes: bool,
    /// Creates are committed at once but only answered after the delay.
    pub pod_create_delay: Option<Duration>,
    pub config_map_create_delay: Option<Duration>,
    /// `(verb, resource)` pairs access reviews deny, e.g. `("get", "pods/log")`.
    pub denied: Vec<(String, String)>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            polls_to_finish: 2,
            final_phase: PodPhase::Succeeded,
            logs: None,
            restart_policy: None,
            fail_deletes: false,
            pod_create_delay: None,
            config_map_create_delay: None,
            denied: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub nodes: Vec<Node>,
    pub config_maps: BTreeMap<String, ConfigMap>,
    pub pods: BTreeMap<String, Pod>,
    pub created_config_maps: Vec<ConfigMap>,
    pub created_pods: Vec<Pod>,
    pub deleted: Vec<String>,
    pub polls: BTreeMap<String, usize>,
    pub last_selector: Option<String>,
    pub behaviour: Behaviour,
}

#[derive(Debug, Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(behaviour: Behaviour) -> Self {
        let cluster = Self::default();
        cluster.state().behaviour = behaviour;
        cluster
    }

    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        let cluster = Self::default();
        cluster.state().nodes = nodes;
        cluster
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn last_selector(&self) -> Option<String> {
        self.state().last_selector.clone()
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state().pods.insert(pod.metadata.name.clone(), pod);
    }

    pub fn add_config_map(&self, config_map: ConfigMap) {
        self.state()
            .config_maps
            .insert(config_map.metadata.name.clone(), config_map);
    }
}

pub(crate) fn ready_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: name.to_string(),
            ..Default::default()
        },
        status: NodeStatus {
            conditions: vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
            }],
        },
        ..Default::default()
    }
}

/// The payload a pod on `node` produces unless overridden.
pub(crate) fn default_logs(node: &str) -> String {
    json!({ "host-collectors/system/hostos_info.json": format!("{{\"node\":\"{node}\"}}") }).to_string()
}

fn not_found(kind: &'static str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn already_exists(kind: &'static str, name: &str) -> ClusterError {
    ClusterError::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

impl FakeCluster {
    fn delete(&self, kind: &'static str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        if state.behaviour.fail_deletes {
            return Err(ClusterError::Api {
                status: 500,
                message: "delete refused".to_string(),
            });
        }
        let removed = match kind {
            "pod" => state.pods.remove(name).is_some(),
            _ => state.config_maps.remove(name).is_some(),
        };
        if !removed {
            return Err(not_found(kind, name));
        }
        state.deleted.push(format!("{kind}/{name}"));
        Ok(())
    }
}

impl ControlPlane for FakeCluster {
    fn list_nodes<'a>(&'a self, label_selector: Option<&'a str>) -> ClusterFuture<'a, Vec<Node>> {
        Box::pin(async move {
            let mut state = self.state();
            state.last_selector = label_selector.map(str::to_string);
            Ok(state.nodes.clone())
        })
    }

    fn get_config_map<'a>(&'a self, _namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ConfigMap> {
        Box::pin(async move {
            self.state()
                .config_maps
                .get(name)
                .cloned()
                .ok_or_else(|| not_found("configmap", name))
        })
    }

    fn create_config_map<'a>(&'a self, _namespace: &'a str, config_map: &'a ConfigMap) -> ClusterFuture<'a, ConfigMap> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                let name = &config_map.metadata.name;
                if state.config_maps.contains_key(name) {
                    return Err(already_exists("configmap", name));
                }
                state.config_maps.insert(name.clone(), config_map.clone());
                state.created_config_maps.push(config_map.clone());
                state.behaviour.config_map_create_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(config_map.clone())
        })
    }

    fn delete_config_map<'a>(&'a self, _namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()> {
        Box::pin(async move { self.delete("configmap", name) })
    }

    fn get_pod<'a>(&'a self, _namespace: &'a str, name: &'a str) -> ClusterFuture<'a, Pod> {
        Box::pin(async move {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(mut pod) = state.pods.get(name).cloned() else {
                return Err(not_found("pod", name));
            };
            let polls = state.polls.entry(name.to_string()).or_default();
            *polls += 1;
            let phase = if *polls >= state.behaviour.polls_to_finish {
                state.behaviour.final_phase
            } else {
                PodPhase::Running
            };
            pod.status = Some(PodStatus { phase: Some(phase) });
            Ok(pod)
        })
    }

    fn create_pod<'a>(&'a self, _namespace: &'a str, pod: &'a Pod) -> ClusterFuture<'a, Pod> {
        Box::pin(async move {
            let (pod, delay) = {
                let mut state = self.state();
                let name = &pod.metadata.name;
                if state.pods.contains_key(name) {
                    return Err(already_exists("pod", name));
                }
                let mut pod = pod.clone();
                if let Some(policy) = state.behaviour.restart_policy {
                    pod.spec.restart_policy = policy;
                }
                state.pods.insert(name.clone(), pod.clone());
                state.created_pods.push(pod.clone());
                (pod, state.behaviour.pod_create_delay)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(pod)
        })
    }

    fn delete_pod<'a>(&'a self, _namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()> {
        Box::pin(async move { self.delete("pod", name) })
    }

    fn pod_logs<'a>(&'a self, _namespace: &'a str, name: &'a str, _container: &'a str) -> ClusterFuture<'a, String> {
        Box::pin(async move {
            let state = self.state();
            let pod = state.pods.get(name).ok_or_else(|| not_found("pod", name))?;
            let logs = match &state.behaviour.logs {
                Some(logs) => logs.clone(),
                None => {
                    let node = pod
                        .spec
                        .node_selector
                        .get(HOSTNAME_LABEL)
                        .map(String::as_str)
                        .unwrap_or_default();
                    default_logs(node)
                }
            };
            if logs.contains(INTERNAL_ERROR_MARKER) {
                return Err(ClusterError::InternalErrorInLogs { logs });
            }
            Ok(logs)
        })
    }

    fn access_review<'a>(&'a self, attributes: &'a ResourceAttributes) -> ClusterFuture<'a, bool> {
        Box::pin(async move {
            let resource = match &attributes.subresource {
                Some(subresource) => format!("{}/{subresource}", attributes.resource),
                None => attributes.resource.clone(),
            };
            let denied = self
                .state()
                .behaviour
                .denied
                .iter()
                .any(|(verb, denied)| *verb == attributes.verb && *denied == resource);
            Ok(!denied)
        })
    }
}
