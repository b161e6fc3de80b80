//! Runs a task on one node as a short-lived pod.
//!
//! The task travels to the node as a `HostCollector` document in a config map
//! mounted into the pod. The pod runs the collector once, its stdout is the
//! node's payload, and both objects are deleted afterwards no matter how the
//! run ended.

use crate::{
    error::RunError,
    orchestrator::deadline_after,
    runner::{
        RunFuture,
        TaskRunner,
    },
};
use remote_collect_cluster::{
    objects::{
        ConfigMap,
        Container,
        ObjectMeta,
        Pod,
        PodPhase,
        PodSpec,
        RestartPolicy,
        Volume,
        VolumeMount,
        HOSTNAME_LABEL,
    },
    ClusterError,
    ControlPlane,
};
use remote_collect_config::{
    Config,
    TaskDescriptor,
};
use serde_json::json;
use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::time::{
    interval_at,
    timeout,
    MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

pub const JOB_TYPE: &str = "remote-collector";
pub const ROLE_LABEL: &str = "troubleshoot-role";
pub const CONTAINER_NAME: &str = "collector";
pub const SPEC_KEY: &str = "collector.json";
const SPEC_MOUNT_PATH: &str = "/troubleshoot/specs";

#[derive(Debug, Clone, PartialEq)]
pub struct PodSettings {
    pub image: String,
    pub pull_policy: String,
    pub service_account: String,
    pub poll_interval: Duration,
    pub cleanup_timeout: Duration,
}

impl From<&Config> for PodSettings {
    fn from(config: &Config) -> Self {
        Self {
            image: config.image.clone(),
            pull_policy: config.pull_policy.clone(),
            service_account: config.service_account.clone(),
            poll_interval: config.poll_interval(),
            cleanup_timeout: config.cleanup_timeout(),
        }
    }
}

impl Default for PodSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Lifecycle of one node's workload as seen by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkloadPhase {
    fn observed(phase: PodPhase) -> Option<Self> {
        match phase {
            PodPhase::Pending => Some(Self::Pending),
            PodPhase::Running => Some(Self::Running),
            PodPhase::Succeeded => Some(Self::Succeeded),
            PodPhase::Failed => Some(Self::Failed),
            PodPhase::Unknown => None,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct PhaseTracker<'a> {
    pod: &'a str,
    phase: WorkloadPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(pod: &'a str) -> Self {
        Self {
            pod,
            phase: WorkloadPhase::Pending,
        }
    }

    fn advance(&mut self, next: WorkloadPhase) {
        if self.phase != next && !self.phase.is_terminal() {
            debug!(pod = self.pod, from = %self.phase, to = %next, "Pod phase changed");
            self.phase = next;
        }
    }
}

/// Objects to remove on the way out. The config map carries the run's
/// generated name, so a reused one is removed as well. A pod counts as soon as
/// its create request may have reached the API server.
#[derive(Debug, Default, Clone, Copy)]
struct Provisioned {
    config_map: bool,
    pod: bool,
}

pub struct PodRunner {
    cluster: Arc<dyn ControlPlane>,
    settings: PodSettings,
}

impl PodRunner {
    pub fn new(cluster: Arc<dyn ControlPlane>, settings: PodSettings) -> Self {
        Self { cluster, settings }
    }

    async fn execute(
        &self,
        ctx: &CancellationToken,
        task: &TaskDescriptor,
        namespace: &str,
        name: &str,
        node: &str,
        provisioned: &mut Provisioned,
    ) -> Result<Vec<u8>, RunError> {
        self.ensure_config_map(ctx, task, namespace, name, provisioned).await?;
        let pod = self.create_pod(ctx, namespace, name, node, provisioned).await?;
        info!(pod = name, node, namespace, "Created collector pod");

        match self.wait_for_completion(ctx, namespace, &pod).await? {
            WorkloadPhase::Succeeded => {
                let logs = cancellable(ctx, self.cluster.pod_logs(namespace, name, CONTAINER_NAME))
                    .await?
                    .map_err(|source| RunError::Logs {
                        name: name.to_string(),
                        source,
                    })?;
                Ok(logs.into_bytes())
            }
            _ => {
                let logs = match cancellable(ctx, self.cluster.pod_logs(namespace, name, CONTAINER_NAME)).await? {
                    Ok(logs) => Some(logs),
                    Err(err) => {
                        debug!(pod = name, error = %err, "No logs for failed pod");
                        None
                    }
                };
                Err(RunError::WorkloadFailed {
                    name: name.to_string(),
                    logs,
                })
            }
        }
    }

    async fn ensure_config_map(
        &self,
        ctx: &CancellationToken,
        task: &TaskDescriptor,
        namespace: &str,
        name: &str,
        provisioned: &mut Provisioned,
    ) -> Result<(), RunError> {
        let provision_error = |source| RunError::ConfigMap {
            name: name.to_string(),
            source,
        };

        match cancellable(ctx, self.cluster.get_config_map(namespace, name)).await? {
            Ok(_) => {
                debug!(config_map = name, "Reusing existing config map");
                provisioned.config_map = true;
                return Ok(());
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(provision_error(err)),
        }

        // The request may be committed even if cancellation drops it.
        provisioned.config_map = true;
        let config_map = collector_config_map(task, namespace, name);
        match cancellable(ctx, self.cluster.create_config_map(namespace, &config_map)).await? {
            Ok(_) => Ok(()),
            Err(err) if err.is_already_exists() => {
                debug!(config_map = name, "Config map appeared concurrently, using it");
                Ok(())
            }
            Err(err) => Err(provision_error(err)),
        }
    }

    async fn create_pod(
        &self,
        ctx: &CancellationToken,
        namespace: &str,
        name: &str,
        node: &str,
        provisioned: &mut Provisioned,
    ) -> Result<Pod, RunError> {
        let create_error = |source| RunError::CreatePod {
            name: name.to_string(),
            source,
        };
        let exists = || RunError::PodExists { name: name.to_string() };

        match cancellable(ctx, self.cluster.get_pod(namespace, name)).await? {
            Ok(_) => return Err(exists()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(create_error(err)),
        }

        let pod = self.pod_manifest(namespace, name, node);
        provisioned.pod = true;
        match cancellable(ctx, self.cluster.create_pod(namespace, &pod)).await? {
            Ok(pod) => Ok(pod),
            Err(err) if err.is_already_exists() => {
                provisioned.pod = false;
                Err(exists())
            }
            Err(err) => Err(create_error(err)),
        }
    }

    async fn wait_for_completion(
        &self,
        ctx: &CancellationToken,
        namespace: &str,
        pod: &Pod,
    ) -> Result<WorkloadPhase, RunError> {
        let name = pod.metadata.name.as_str();
        let never_terminates = || RunError::NeverTerminates { name: name.to_string() };
        if pod.spec.restart_policy == RestartPolicy::Always {
            return Err(never_terminates());
        }

        let mut tracker = PhaseTracker::new(name);
        let poll_interval = self.settings.poll_interval;
        let mut ticker = interval_at(deadline_after(poll_interval), poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    tracker.advance(WorkloadPhase::Cancelled);
                    return Err(RunError::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            let current = match cancellable(ctx, self.cluster.get_pod(namespace, name)).await {
                Ok(Ok(current)) => current,
                Ok(Err(err)) if err.is_not_found() => {
                    return Err(RunError::PodVanished {
                        name: name.to_string(),
                        source: err,
                    });
                }
                Ok(Err(err)) => {
                    debug!(pod = name, error = %err, "Failed to get pod, retrying");
                    continue;
                }
                Err(err) => {
                    tracker.advance(WorkloadPhase::Cancelled);
                    return Err(err);
                }
            };

            if current.spec.restart_policy == RestartPolicy::Always {
                return Err(never_terminates());
            }
            if let Some(phase) = WorkloadPhase::observed(current.phase()) {
                tracker.advance(phase);
            }
            if tracker.phase.is_terminal() {
                return Ok(tracker.phase);
            }
        }
    }

    fn pod_manifest(&self, namespace: &str, name: &str, node: &str) -> Pod {
        let mut metadata = ObjectMeta::named(name, namespace);
        metadata.labels = BTreeMap::from([
            (JOB_TYPE.to_string(), name.to_string()),
            (ROLE_LABEL.to_string(), JOB_TYPE.to_string()),
        ]);

        let mount = |name: &str, path: &str| VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            read_only: true,
        };

        Pod::new(
            metadata,
            PodSpec {
                node_selector: BTreeMap::from([(HOSTNAME_LABEL.to_string(), node.to_string())]),
                service_account_name: Some(self.settings.service_account.clone()),
                restart_policy: RestartPolicy::Never,
                containers: vec![Container {
                    name: CONTAINER_NAME.to_string(),
                    image: self.settings.image.clone(),
                    image_pull_policy: Some(self.settings.pull_policy.clone()),
                    command: vec!["collect".to_string()],
                    args: vec![
                        "--collect-without-permissions".to_string(),
                        "--format=raw".to_string(),
                        format!("{SPEC_MOUNT_PATH}/{SPEC_KEY}"),
                    ],
                    volume_mounts: vec![
                        mount("collector", SPEC_MOUNT_PATH),
                        mount("kernel-modules", "/lib/modules"),
                        mount("ntp", "/run/dbus"),
                    ],
                }],
                volumes: vec![
                    Volume::config_map("collector", name),
                    Volume::host_path("kernel-modules", "/lib/modules"),
                    Volume::host_path("ntp", "/run/dbus"),
                ],
            },
        )
    }

    async fn cleanup(&self, namespace: &str, name: &str, provisioned: Provisioned) {
        let limit = self.settings.cleanup_timeout;
        if provisioned.pod {
            let result = timeout(limit, self.cluster.delete_pod(namespace, name)).await;
            log_deletion("pod", name, result);
        }
        if provisioned.config_map {
            let result = timeout(limit, self.cluster.delete_config_map(namespace, name)).await;
            log_deletion("config map", name, result);
        }
    }
}

impl TaskRunner for PodRunner {
    fn run<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        task: &'a TaskDescriptor,
        namespace: &'a str,
        name: &'a str,
        node: &'a str,
    ) -> RunFuture<'a> {
        Box::pin(async move {
            let mut provisioned = Provisioned::default();
            let result = self
                .execute(ctx, task, namespace, name, node, &mut provisioned)
                .await;
            self.cleanup(namespace, name, provisioned).await;

            match result {
                Ok(payload) => {
                    debug!(pod = name, node, bytes = payload.len(), "Collected node output");
                    Ok(payload)
                }
                Err(RunError::Cancelled) => {
                    debug!(pod = name, node, "Collection cancelled");
                    Err(RunError::Cancelled.into())
                }
                Err(err) => Err(err.into()),
            }
        })
    }
}

/// The config map carrying the task as a single-collector `HostCollector`
/// document.
pub fn collector_config_map(task: &TaskDescriptor, namespace: &str, name: &str) -> ConfigMap {
    let document = json!({
        "apiVersion": "troubleshoot.sh/v1beta2",
        "kind": "HostCollector",
        "metadata": { "name": "collector" },
        "spec": { "collectors": [task.to_collector_entry()] },
    });
    ConfigMap::new(ObjectMeta::named(name, namespace)).with_data(SPEC_KEY, document.to_string())
}

async fn cancellable<T>(
    ctx: &CancellationToken,
    call: impl Future<Output = Result<T, ClusterError>>,
) -> Result<Result<T, ClusterError>, RunError> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(RunError::Cancelled),
        result = call => Ok(result),
    }
}

fn log_deletion(kind: &str, name: &str, result: Result<Result<(), ClusterError>, tokio::time::error::Elapsed>) {
    match result {
        Ok(Ok(())) => debug!(kind, name, "Deleted"),
        Ok(Err(err)) if err.is_not_found() => debug!(kind, name, "Already deleted"),
        Ok(Err(err)) => warn!(kind, name, error = %err, "Failed to delete"),
        Err(_) => warn!(kind, name, "Timed out deleting"),
    }
}
