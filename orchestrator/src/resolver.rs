use eyre::WrapErr;
use remote_collect_cluster::ControlPlane;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
};

pub type NodesFuture<'a> = Pin<Box<dyn Future<Output = eyre::Result<Vec<String>>> + Send + 'a>>;

pub trait NodeResolver: Send + Sync {
    /// Names of the nodes a workload can be scheduled on right now.
    fn list_schedulable_nodes(&self) -> NodesFuture<'_>;
}

/// Asks the control plane for nodes matching an optional label selector.
pub struct ClusterNodeResolver {
    cluster: Arc<dyn ControlPlane>,
    label_selector: Option<String>,
}

impl ClusterNodeResolver {
    pub fn new(cluster: Arc<dyn ControlPlane>, label_selector: Option<String>) -> Self {
        Self {
            cluster,
            label_selector,
        }
    }
}

impl NodeResolver for ClusterNodeResolver {
    fn list_schedulable_nodes(&self) -> NodesFuture<'_> {
        Box::pin(async move {
            let nodes = self
                .cluster
                .list_nodes(self.label_selector.as_deref())
                .await
                .wrap_err("failed to list nodes")?;

            let mut names = Vec::with_capacity(nodes.len());
            for node in &nodes {
                if node.spec.unschedulable {
                    debug!(node = node.name(), "Skipping cordoned node");
                } else if !node.is_ready() {
                    debug!(node = node.name(), "Skipping node that is not ready");
                } else {
                    names.push(node.name().to_string());
                }
            }
            names.sort();
            names.dedup();

            debug!(selector = ?self.label_selector, total = nodes.len(), eligible = names.len(), "Resolved nodes");
            Ok(names)
        })
    }
}
