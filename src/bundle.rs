//! Lays the per-node results out in the bundle directory.
//!
//! Every node reports a JSON object mapping bundle paths to file contents,
//! e.g. `{"host-collectors/system/hostos_info.json": "{...}"}`. Each file is
//! stored under a per-node directory next to the path it was reported with:
//! `host-collectors/system/<node>/hostos_info.json`.

use eyre::{
    bail,
    eyre,
    Context as _,
    Result,
};
use remote_collect_orchestrator::ResultSet;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    path::{
        Component,
        Path,
        PathBuf,
    },
};

pub const NODE_LIST_PATH: &str = "host-collectors/system/node_list.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<String>,
}

/// Writes every node's files below `bundle` and returns their paths relative
/// to it. The node list is only written if the bundle has none yet.
pub async fn write_results(bundle: &Path, results: &ResultSet) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (node, payload) in results {
        let files: BTreeMap<String, String> =
            serde_json::from_slice(payload).wrap_err_with(|| format!("Failed to decode results of node {node}"))?;
        for (path, content) in files {
            let relative = node_path(&path, node)?;
            save(bundle, &relative, content.as_bytes()).await?;
            written.push(relative);
        }
    }

    let node_list = bundle.join(NODE_LIST_PATH);
    if tokio::fs::try_exists(&node_list).await.unwrap_or(false) {
        debug!(path = %node_list.display(), "Node list already present");
    } else {
        let nodes = NodeList {
            nodes: results.keys().cloned().collect(),
        };
        save(bundle, Path::new(NODE_LIST_PATH), &serde_json::to_vec_pretty(&nodes)?).await?;
        written.push(PathBuf::from(NODE_LIST_PATH));
    }

    Ok(written)
}

/// `dir/file` reported by `node` becomes `dir/<node>/file`.
fn node_path(path: &str, node: &str) -> Result<PathBuf> {
    if node.is_empty() || node.contains(['/', '\\']) || node == "." || node == ".." {
        bail!("Invalid node name {node:?}");
    }

    let path = Path::new(path);
    if !path.components().all(|component| matches!(component, Component::Normal(_))) {
        bail!("Refusing to write result {path:?} outside of the bundle");
    }
    let file = path
        .file_name()
        .ok_or_else(|| eyre!("Result path {path:?} has no file name"))?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));

    Ok(dir.join(node).join(file))
}

async fn save(bundle: &Path, relative: &Path, content: &[u8]) -> Result<()> {
    let path = bundle.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .wrap_err_with(|| format!("Failed to create directory {}", parent.display()))?;
    }
    tokio::fs::write(&path, content)
        .await
        .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    trace!(path = %path.display(), bytes = content.len(), "Saved result");
    Ok(())
}
