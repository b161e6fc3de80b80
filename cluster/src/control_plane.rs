use crate::{
    error::ClusterError,
    objects::{
        ConfigMap,
        Node,
        Pod,
        ResourceAttributes,
    },
};
use std::{
    future::Future,
    pin::Pin,
};

pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClusterError>> + Send + 'a>>;

/// The control-plane calls the per-node collection needs.
///
/// Implementations map "does not exist" to [`ClusterError::NotFound`] and
/// name collisions on create to [`ClusterError::AlreadyExists`]. Log
/// retrieval reports a body carrying the API server's internal error marker
/// as [`ClusterError::InternalErrorInLogs`] instead of returning it as output.
pub trait ControlPlane: Send + Sync {
    fn list_nodes<'a>(&'a self, label_selector: Option<&'a str>) -> ClusterFuture<'a, Vec<Node>>;

    fn get_config_map<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ConfigMap>;

    fn create_config_map<'a>(&'a self, namespace: &'a str, config_map: &'a ConfigMap) -> ClusterFuture<'a, ConfigMap>;

    fn delete_config_map<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()>;

    fn get_pod<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, Pod>;

    fn create_pod<'a>(&'a self, namespace: &'a str, pod: &'a Pod) -> ClusterFuture<'a, Pod>;

    fn delete_pod<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()>;

    fn pod_logs<'a>(&'a self, namespace: &'a str, name: &'a str, container: &'a str) -> ClusterFuture<'a, String>;

    /// Whether the current identity may perform the described access.
    fn access_review<'a>(&'a self, attributes: &'a ResourceAttributes) -> ClusterFuture<'a, bool>;
}
