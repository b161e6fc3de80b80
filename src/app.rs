use crate::bundle;
use eyre::{
    bail,
    Context as _,
    Result,
};
use remote_collect_cluster::{
    ControlPlane,
    KubeClient,
};
use remote_collect_config::{
    Args,
    Config,
};
use remote_collect_orchestrator::{
    check_permissions,
    ClusterNodeResolver,
    Orchestrator,
    OrchestratorSettings,
    PodRunner,
    PodSettings,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct App {
    config: Config,
}

impl App {
    pub fn new(args: Args) -> Result<Self> {
        let config = Config::new(args).context("Failed to load configuration")?;
        config.validate()?;
        debug!(namespace = %config.namespace, collector = config.task.title(), "Loaded configuration");
        Ok(Self { config })
    }

    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        let task = &config.task;

        let cluster: Arc<dyn ControlPlane> =
            Arc::new(KubeClient::new(&config.cluster).context("Failed to create the api server client")?);

        if config.collect_without_permissions {
            debug!("Skipping access review");
        } else {
            let denied = check_permissions(cluster.as_ref(), &config.namespace)
                .await
                .context("Failed to review permissions")?;
            if !denied.is_empty() {
                for permission in &denied {
                    error!(%permission, "Missing permission");
                }
                bail!(
                    "Insufficient permissions to run the {} collector, pass --collect-without-permissions to try anyway",
                    task.title()
                );
            }
        }

        let resolver = ClusterNodeResolver::new(cluster.clone(), config.label_selector.clone());
        let runner = PodRunner::new(cluster, PodSettings::from(config));
        let orchestrator = Orchestrator::new(
            Arc::new(resolver),
            Arc::new(runner),
            OrchestratorSettings::from(config),
        );

        let ctx = CancellationToken::new();
        let interrupt = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling collection");
                interrupt.cancel();
            }
        });

        let outcome = orchestrator.collect(&ctx, task, config.timeout()).await;
        // Deleting a pod and its config map each get `cleanup_timeout`.
        orchestrator.wait_for_cleanup(config.cleanup_timeout().saturating_mul(2)).await;
        let results = outcome.wrap_err_with(|| format!("Failed to run the {} collector", task.title()))?;

        let written = bundle::write_results(&config.bundle_path, &results).await?;
        info!(
            collector = task.title(),
            nodes = results.len(),
            files = written.len(),
            bundle = %config.bundle_path.display(),
            "Wrote results"
        );
        Ok(())
    }
}
