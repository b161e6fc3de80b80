use crate::{
    error::{
        CollectError,
        RunError,
    },
    names::NameGenerator,
    resolver::NodeResolver,
    runner::{
        NodeOutcome,
        TaskRunner,
    },
};
use remote_collect_config::{
    Config,
    TaskDescriptor,
};
use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        OwnedSemaphorePermit,
        Semaphore,
    },
    time::{
        sleep_until,
        timeout,
        Instant,
    },
};
use tokio_util::{
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::Instrument;

/// Node name to the raw output collected on that node.
pub type ResultSet = BTreeMap<String, Vec<u8>>;

// Same cap tokio applies to its own timers.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + duration`, capped instead of overflowing for huge durations.
pub(crate) fn deadline_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration.min(FAR_FUTURE)).unwrap_or(now + FAR_FUTURE)
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub namespace: String,
    pub name_prefix: String,
    /// How many nodes may run at the same time; unbounded when unset.
    pub max_concurrency: Option<usize>,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            name_prefix: config.name_prefix.clone(),
            max_concurrency: config.max_concurrency,
        }
    }
}

/// Fans a task out to every schedulable node and gathers one result per node
/// under a single deadline.
pub struct Orchestrator {
    resolver: Arc<dyn NodeResolver>,
    runner: Arc<dyn TaskRunner>,
    namespace: String,
    names: NameGenerator,
    max_concurrency: Option<usize>,
    tracker: TaskTracker,
}

impl Orchestrator {
    pub fn new(resolver: Arc<dyn NodeResolver>, runner: Arc<dyn TaskRunner>, settings: OrchestratorSettings) -> Self {
        Self {
            resolver,
            runner,
            namespace: settings.namespace,
            names: NameGenerator::new(settings.name_prefix),
            max_concurrency: settings.max_concurrency,
            tracker: TaskTracker::new(),
        }
    }

    /// Runs `task` on every node and returns either every node's output or a
    /// single error.
    ///
    /// Once the first worker fails, `timeout` elapses or `ctx` is cancelled,
    /// all remaining workers are cancelled and results gathered so far are
    /// dropped. Workers may still be deleting their objects when this returns;
    /// see [`Orchestrator::wait_for_cleanup`].
    pub async fn collect(
        &self,
        ctx: &CancellationToken,
        task: &TaskDescriptor,
        timeout: Duration,
    ) -> Result<ResultSet, CollectError> {
        if task.is_excluded() {
            info!(collector = task.title(), "Collector is excluded, skipping");
            return Ok(ResultSet::new());
        }

        let deadline = deadline_after(timeout);
        let nodes = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(CollectError::Cancelled),
            _ = sleep_until(deadline) => return Err(CollectError::DeadlineExceeded),
            nodes = self.resolver.list_schedulable_nodes() => nodes.map_err(|cause| CollectError::ListNodes { cause })?,
        };
        let mut pending = nodes.into_iter().collect::<BTreeSet<_>>();
        if pending.is_empty() {
            warn!(collector = task.title(), "No schedulable nodes found, nothing to collect");
            return Ok(ResultSet::new());
        }
        info!(collector = task.title(), nodes = pending.len(), ?timeout, "Starting remote collection");

        // Cancelled on every way out of this function.
        let run_ctx = ctx.child_token();
        let _cancel_on_return = run_ctx.clone().drop_guard();

        let (sender, mut receiver) = mpsc::channel(pending.len());
        let semaphore = self.max_concurrency.map(|limit| Arc::new(Semaphore::new(limit)));
        let task = Arc::new(task.clone());

        for node in &pending {
            let name = self.names.next_name();
            let span = info_span!("worker", node = %node, pod = %name);
            let worker = Worker {
                runner: self.runner.clone(),
                ctx: run_ctx.clone(),
                task: task.clone(),
                namespace: self.namespace.clone(),
                name,
                node: node.clone(),
                semaphore: semaphore.clone(),
            };
            self.tracker.spawn(worker.run(sender.clone()).instrument(span));
        }
        drop(sender);

        let mut results = ResultSet::new();
        while !pending.is_empty() {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    warn!(missing = ?pending, "Remote collection cancelled");
                    return Err(CollectError::Cancelled);
                }
                _ = sleep_until(deadline) => {
                    warn!(missing = ?pending, "Deadline exceeded before every node reported, discarding results");
                    return Err(CollectError::DeadlineExceeded);
                }
                outcome = receiver.recv() => match outcome {
                    Some(NodeOutcome { node, result: Ok(payload) }) => {
                        debug!(node = %node, bytes = payload.len(), "Node reported");
                        pending.remove(&node);
                        results.insert(node, payload);
                    }
                    Some(NodeOutcome { node, result: Err(cause) }) => {
                        error!(node = %node, error = %format!("{cause:#}"), "Node failed, cancelling remaining nodes");
                        return Err(CollectError::Node { node, cause });
                    }
                    None => {
                        return Err(CollectError::WorkerLost {
                            missing: pending.into_iter().collect(),
                        });
                    }
                },
            }
        }

        info!(collector = task.title(), nodes = results.len(), "Remote collection finished");
        Ok(results)
    }

    /// Waits up to `grace` for every worker to finish its cleanup. Returns
    /// `false` if some were still running.
    pub async fn wait_for_cleanup(&self, grace: Duration) -> bool {
        self.tracker.close();
        match timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(workers = self.tracker.len(), "Workers still cleaning up after grace period");
                false
            }
        }
    }
}

struct Worker {
    runner: Arc<dyn TaskRunner>,
    ctx: CancellationToken,
    task: Arc<TaskDescriptor>,
    namespace: String,
    name: String,
    node: String,
    semaphore: Option<Arc<Semaphore>>,
}

impl Worker {
    async fn run(self, sender: mpsc::Sender<NodeOutcome>) {
        let result = match self.acquire().await {
            Ok(_permit) => {
                self.runner
                    .run(&self.ctx, &self.task, &self.namespace, &self.name, &self.node)
                    .await
            }
            Err(err) => Err(err),
        };

        if sender.send(NodeOutcome { node: self.node, result }).await.is_err() {
            trace!("Collection already finished, dropping outcome");
        }
    }

    async fn acquire(&self) -> eyre::Result<Option<OwnedSemaphorePermit>> {
        let Some(semaphore) = &self.semaphore else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(RunError::Cancelled.into()),
            permit = semaphore.clone().acquire_owned() => Ok(Some(permit?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pod_runner::{
            PodRunner,
            PodSettings,
        },
        resolver::{
            ClusterNodeResolver,
            NodesFuture,
        },
        runner::RunFuture,
        testing::{
            default_logs,
            ready_node,
            FakeCluster,
        },
    };
    use eyre::eyre;
    use pretty_assertions::assert_eq;
    use remote_collect_cluster::objects::{
        ObjectMeta,
        Pod,
        PodSpec,
    };
    use remote_collect_config::TaskKind;
    use std::sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Mutex,
    };

    struct StaticResolver {
        nodes: eyre::Result<Vec<String>>,
        calls: AtomicUsize,
    }

    impl StaticResolver {
        fn new(count: usize) -> Arc<Self> {
            Self::with(Ok((1..=count).map(|i| format!("node-{i}")).collect()))
        }

        fn with(nodes: eyre::Result<Vec<String>>) -> Arc<Self> {
            Arc::new(Self {
                nodes,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl NodeResolver for StaticResolver {
        fn list_schedulable_nodes(&self) -> NodesFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match &self.nodes {
                    Ok(nodes) => Ok(nodes.clone()),
                    Err(err) => Err(eyre!("{err}")),
                }
            })
        }
    }

    /// Sleeps per node, then echoes the node name or fails.
    #[derive(Default)]
    struct ScriptedRunner {
        delay: Duration,
        delays: BTreeMap<String, Duration>,
        failing: Option<String>,
        active: AtomicUsize,
        peak: AtomicUsize,
        names: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    impl TaskRunner for ScriptedRunner {
        fn run<'a>(
            &'a self,
            ctx: &'a CancellationToken,
            _task: &'a TaskDescriptor,
            _namespace: &'a str,
            name: &'a str,
            node: &'a str,
        ) -> RunFuture<'a> {
            Box::pin(async move {
                self.names.lock().unwrap().push(name.to_string());
                let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(active, Ordering::SeqCst);

                let delay = self.delays.get(node).copied().unwrap_or(self.delay);
                let result = tokio::select! {
                    _ = ctx.cancelled() => Err(eyre!("cancelled")),
                    _ = tokio::time::sleep(delay) => match &self.failing {
                        Some(failing) if failing == node => Err(eyre!("boom")),
                        _ => Ok(node.as_bytes().to_vec()),
                    },
                };

                self.active.fetch_sub(1, Ordering::SeqCst);
                result
            })
        }
    }

    fn settings(max_concurrency: Option<usize>) -> OrchestratorSettings {
        OrchestratorSettings {
            namespace: "default".to_string(),
            name_prefix: "remote-collector".to_string(),
            max_concurrency,
        }
    }

    fn task() -> TaskDescriptor {
        TaskDescriptor::new(TaskKind::HostOs)
    }

    fn expected(nodes: usize) -> ResultSet {
        (1..=nodes)
            .map(|i| {
                let node = format!("node-{i}");
                let payload = node.as_bytes().to_vec();
                (node, payload)
            })
            .collect()
    }

    #[tokio::test]
    async fn collects_every_node_before_the_deadline() {
        let runner = Arc::new(ScriptedRunner::with_delay(Duration::from_millis(20)));
        let orchestrator = Orchestrator::new(StaticResolver::new(5), runner.clone(), settings(None));

        let results = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(results, expected(5));
        assert!(orchestrator.wait_for_cleanup(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn deadline_wins_over_slow_nodes() {
        let runner = Arc::new(ScriptedRunner::with_delay(Duration::from_millis(200)));
        let orchestrator = Orchestrator::new(StaticResolver::new(5), runner, settings(None));

        let err = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed remote collection: context deadline exceeded");
        assert!(orchestrator.wait_for_cleanup(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn huge_timeout_behaves_like_no_deadline() {
        let runner = Arc::new(ScriptedRunner::with_delay(Duration::from_millis(10)));
        let orchestrator = Orchestrator::new(StaticResolver::new(3), runner, settings(None));

        let results = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(results, expected(3));
        assert!(orchestrator.wait_for_cleanup(Duration::MAX).await);
    }

    #[tokio::test]
    async fn completion_order_does_not_matter() {
        let delays = (1..=5)
            .map(|i| (format!("node-{i}"), Duration::from_millis(60 - 10 * i)))
            .collect();
        let runner = Arc::new(ScriptedRunner {
            delays,
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(StaticResolver::new(5), runner, settings(None));

        let results = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(results, expected(5));
    }

    #[tokio::test]
    async fn failing_node_cancels_the_rest() {
        let mut delays = BTreeMap::new();
        delays.insert("node-2".to_string(), Duration::from_millis(10));
        let runner = Arc::new(ScriptedRunner {
            delay: Duration::from_secs(30),
            delays,
            failing: Some("node-2".to_string()),
            ..Default::default()
        });
        let orchestrator = Orchestrator::new(StaticResolver::new(4), runner.clone(), settings(None));

        let err = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed remote collection: node node-2: boom");

        assert!(orchestrator.wait_for_cleanup(Duration::from_secs(1)).await);
        assert_eq!(runner.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn caller_cancellation_stops_the_run() {
        let runner = Arc::new(ScriptedRunner::with_delay(Duration::from_secs(30)));
        let orchestrator = Orchestrator::new(StaticResolver::new(3), runner, settings(None));
        let ctx = CancellationToken::new();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = orchestrator
            .collect(&ctx, &task(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "failed remote collection: context canceled");
        assert!(orchestrator.wait_for_cleanup(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn bounded_concurrency_still_reports_every_node() {
        let runner = Arc::new(ScriptedRunner::with_delay(Duration::from_millis(20)));
        let orchestrator = Orchestrator::new(StaticResolver::new(6), runner.clone(), settings(Some(2)));

        let results = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results, expected(6));
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn excluded_task_is_not_dispatched() {
        let resolver = StaticResolver::new(3);
        let runner = Arc::new(ScriptedRunner::default());
        let orchestrator = Orchestrator::new(resolver.clone(), runner.clone(), settings(None));

        let mut task = task();
        task.exclude = true;
        let results = orchestrator
            .collect(&CancellationToken::new(), &task, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(runner.names.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_nodes_is_an_empty_result() {
        let orchestrator = Orchestrator::new(
            StaticResolver::new(0),
            Arc::new(ScriptedRunner::default()),
            settings(None),
        );

        let results = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn node_listing_failure_starts_nothing() {
        let runner = Arc::new(ScriptedRunner::default());
        let orchestrator = Orchestrator::new(
            StaticResolver::with(Err(eyre!("connection refused"))),
            runner.clone(),
            settings(None),
        );

        let err = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to get the list of nodes matching a nodeSelector: connection refused"
        );
        assert!(runner.names.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_run_uses_fresh_names() {
        let runner = Arc::new(ScriptedRunner::default());
        let orchestrator = Orchestrator::new(StaticResolver::new(3), runner.clone(), settings(None));

        for _ in 0..2 {
            orchestrator
                .collect(&CancellationToken::new(), &task(), Duration::from_secs(1))
                .await
                .unwrap();
        }

        let names = runner.names.lock().unwrap().clone();
        assert_eq!(names.len(), 6);
        assert_eq!(names.iter().collect::<BTreeSet<_>>().len(), 6);
        assert!(names.iter().all(|name| name.starts_with("remote-collector-")));
    }

    #[tokio::test]
    async fn leftovers_of_a_previous_run_do_not_collide() {
        let cluster = Arc::new(FakeCluster::with_nodes(vec![ready_node("node-1"), ready_node("node-2")]));
        let leftovers = NameGenerator::new("remote-collector");
        for _ in 0..5 {
            cluster.add_pod(Pod::new(
                ObjectMeta::named(leftovers.next_name(), "default"),
                PodSpec::default(),
            ));
        }

        let runner = PodRunner::new(
            cluster.clone(),
            PodSettings {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );
        let orchestrator = Orchestrator::new(
            Arc::new(ClusterNodeResolver::new(cluster.clone(), None)),
            Arc::new(runner),
            settings(None),
        );

        let results = orchestrator
            .collect(&CancellationToken::new(), &task(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(orchestrator.wait_for_cleanup(Duration::from_secs(1)).await);

        assert_eq!(results.len(), 2);
        assert_eq!(results["node-1"], default_logs("node-1").into_bytes());
        assert_eq!(results["node-2"], default_logs("node-2").into_bytes());
        let state = cluster.state();
        assert_eq!(state.pods.len(), 5);
        assert!(state.config_maps.is_empty());
    }
}
