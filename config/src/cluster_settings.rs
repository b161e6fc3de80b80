use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;
use url::Url;

/// How to reach the Kubernetes API server.
///
/// When `api_server` is unset the in-cluster service account environment is
/// used instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            api_server: None,
            token: None,
            token_file: None,
            ca_file: None,
            insecure_skip_tls_verify: false,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}
