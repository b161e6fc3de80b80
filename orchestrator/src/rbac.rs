use futures::future::try_join_all;
use remote_collect_cluster::{
    objects::ResourceAttributes,
    ClusterError,
    ControlPlane,
};
use std::fmt;

/// An access the run needs but the current identity lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDenied {
    pub attributes: ResourceAttributes,
}

impl fmt::Display for PermissionDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attributes = &self.attributes;
        write!(f, "cannot {} {}", attributes.verb, attributes.resource)?;
        if let Some(subresource) = &attributes.subresource {
            write!(f, "/{subresource}")?;
        }
        match &attributes.namespace {
            Some(namespace) => write!(f, " in namespace {namespace:?}"),
            None => write!(f, " at cluster scope"),
        }
    }
}

fn required_access(namespace: &str) -> Vec<ResourceAttributes> {
    let namespaced = |verb: &str, resource: &str, subresource: Option<&str>| ResourceAttributes {
        namespace: Some(namespace.to_string()),
        verb: verb.to_string(),
        group: None,
        resource: resource.to_string(),
        subresource: subresource.map(str::to_string),
    };

    let mut access = Vec::new();
    for resource in ["configmaps", "pods"] {
        for verb in ["create", "get", "delete"] {
            access.push(namespaced(verb, resource, None));
        }
    }
    access.push(namespaced("get", "pods", Some("log")));
    access.push(ResourceAttributes {
        verb: "list".to_string(),
        resource: "nodes".to_string(),
        ..Default::default()
    });
    access
}

/// Reviews every access a collection run in `namespace` performs and returns
/// the ones that are denied.
pub async fn check_permissions(
    cluster: &dyn ControlPlane,
    namespace: &str,
) -> Result<Vec<PermissionDenied>, ClusterError> {
    let required = required_access(namespace);
    let allowed = try_join_all(required.iter().map(|attributes| cluster.access_review(attributes))).await?;

    let denied = required
        .into_iter()
        .zip(allowed)
        .filter(|(_, allowed)| !allowed)
        .map(|(attributes, _)| PermissionDenied { attributes })
        .collect::<Vec<_>>();
    for permission in &denied {
        debug!(%permission, "Access review denied");
    }
    Ok(denied)
}
