/// Marker the API server embeds in a log body when it could not actually
/// read the container logs.
pub const INTERNAL_ERROR_MARKER: &str = "Internal Error";

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String },
    #[error("api server responded with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("fetched log contains \"Internal Error\": {logs:?}")]
    InternalErrorInLogs { logs: String },
    #[error("request to the api server failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode api server response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid cluster configuration: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }
}
