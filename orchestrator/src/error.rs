use remote_collect_cluster::ClusterError;

/// Why a single node's collection failed.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("failed to provision config map {name:?}")]
    ConfigMap {
        name: String,
        #[source]
        source: ClusterError,
    },
    #[error("pod {name:?} already exists")]
    PodExists { name: String },
    #[error("failed to create pod {name:?}")]
    CreatePod {
        name: String,
        #[source]
        source: ClusterError,
    },
    #[error("pod {name:?} will never terminate with a succeeded state since its restart policy is Always")]
    NeverTerminates { name: String },
    #[error("pod {name:?} disappeared while waiting for it to complete")]
    PodVanished {
        name: String,
        #[source]
        source: ClusterError,
    },
    #[error("pod {name:?} failed: {}", logs.as_deref().unwrap_or("no logs available"))]
    WorkloadFailed { name: String, logs: Option<String> },
    #[error("failed to get logs of pod {name:?}")]
    Logs {
        name: String,
        #[source]
        source: ClusterError,
    },
    #[error("context canceled")]
    Cancelled,
}

/// Why a whole collection run failed. A run either yields one entry per node
/// or exactly one of these.
#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    #[error("failed to get the list of nodes matching a nodeSelector: {cause:#}")]
    ListNodes { cause: eyre::Report },
    #[error("failed remote collection: context deadline exceeded")]
    DeadlineExceeded,
    #[error("failed remote collection: context canceled")]
    Cancelled,
    #[error("failed remote collection: node {node}: {cause:#}")]
    Node { node: String, cause: eyre::Report },
    #[error("failed remote collection: workers exited without reporting for {}", missing.join(", "))]
    WorkerLost { missing: Vec<String> },
}
