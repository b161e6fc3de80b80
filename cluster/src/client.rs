use crate::{
    control_plane::{
        ClusterFuture,
        ControlPlane,
    },
    error::{
        ClusterError,
        INTERNAL_ERROR_MARKER,
    },
    objects::{
        ConfigMap,
        Node,
        NodeList,
        Pod,
        ResourceAttributes,
        SelfSubjectAccessReview,
        Status,
    },
};
use remote_collect_config::ClusterSettings;
use reqwest::{
    Client as HttpClient,
    Method,
    RequestBuilder,
    Response,
    StatusCode,
};
use serde::de::DeserializeOwned;
use std::{
    env,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use url::Url;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Talks to the Kubernetes REST API directly over HTTP.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: HttpClient,
    api_server: Url,
    token: Option<String>,
}

impl KubeClient {
    /// Uses the explicit endpoint from the settings, or the in-cluster
    /// service account when none is configured.
    pub fn new(settings: &ClusterSettings) -> Result<Self, ClusterError> {
        match &settings.api_server {
            Some(api_server) => Self::build(
                api_server.clone(),
                settings,
                settings.ca_file.clone(),
                settings.token_file.clone(),
            ),
            None => Self::in_cluster(settings),
        }
    }

    fn in_cluster(settings: &ClusterSettings) -> Result<Self, ClusterError> {
        let host = env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ClusterError::Config("no api_server configured and KUBERNETES_SERVICE_HOST is not set".to_string())
        })?;
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let host = if host.contains(':') { format!("[{host}]") } else { host };
        let api_server = Url::parse(&format!("https://{host}:{port}"))
            .map_err(|err| ClusterError::Config(format!("invalid in-cluster endpoint: {err}")))?;

        let service_account = Path::new(SERVICE_ACCOUNT_DIR);
        let ca_file = settings
            .ca_file
            .clone()
            .unwrap_or_else(|| service_account.join("ca.crt"));
        let token_file = settings
            .token_file
            .clone()
            .unwrap_or_else(|| service_account.join("token"));

        debug!(%api_server, "Using in-cluster configuration");
        Self::build(api_server, settings, Some(ca_file), Some(token_file))
    }

    fn build(
        api_server: Url,
        settings: &ClusterSettings,
        ca_file: Option<PathBuf>,
        token_file: Option<PathBuf>,
    ) -> Result<Self, ClusterError> {
        let mut builder = HttpClient::builder();
        if settings.request_timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(settings.request_timeout_seconds));
        }

        if let Some(ca_file) = &ca_file {
            let pem = std::fs::read(ca_file).map_err(|err| {
                ClusterError::Config(format!("failed to read CA file {}: {err}", ca_file.display()))
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        if settings.insecure_skip_tls_verify {
            warn!(%api_server, "TLS verification of the api server is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let token = match (&settings.token, &token_file) {
            (Some(token), _) => Some(token.trim().to_string()),
            (None, Some(path)) => {
                let token = std::fs::read_to_string(path).map_err(|err| {
                    ClusterError::Config(format!("failed to read token file {}: {err}", path.display()))
                })?;
                Some(token.trim().to_string())
            }
            (None, None) => None,
        };

        Ok(Self {
            http: builder.build()?,
            api_server,
            token,
        })
    }

    pub fn api_server(&self) -> &Url {
        &self.api_server
    }

    fn url(&self, path: &str) -> Result<Url, ClusterError> {
        // Keep any path prefix of the endpoint, e.g. when going through a proxy.
        let base = self.api_server.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|err| ClusterError::Config(format!("invalid request url {path:?}: {err}")))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClusterError> {
        let mut request = self.http.request(method, self.url(path)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn send(&self, request: RequestBuilder, kind: &'static str, name: &str) -> Result<Response, ClusterError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Status>(&body)
            .ok()
            .map(|status| status.message)
            .filter(|message| !message.is_empty())
            .unwrap_or(body);
        trace!(%status, kind, name, %message, "api server returned an error");

        Err(match status {
            StatusCode::NOT_FOUND => ClusterError::NotFound {
                kind,
                name: name.to_string(),
            },
            StatusCode::CONFLICT => ClusterError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ClusterError::Forbidden { message },
            _ => ClusterError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        kind: &'static str,
        name: &str,
    ) -> Result<T, ClusterError> {
        let bytes = self.send(request, kind, name).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl ControlPlane for KubeClient {
    fn list_nodes<'a>(&'a self, label_selector: Option<&'a str>) -> ClusterFuture<'a, Vec<Node>> {
        Box::pin(async move {
            let mut request = self.request(Method::GET, "/api/v1/nodes")?;
            if let Some(selector) = label_selector.filter(|selector| !selector.is_empty()) {
                request = request.query(&[("labelSelector", selector)]);
            }
            let list: NodeList = self.json(request, "nodes", "").await?;
            Ok(list.items)
        })
    }

    fn get_config_map<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ConfigMap> {
        Box::pin(async move {
            let request = self.request(
                Method::GET,
                &format!("/api/v1/namespaces/{namespace}/configmaps/{name}"),
            )?;
            self.json(request, "configmap", name).await
        })
    }

    fn create_config_map<'a>(&'a self, namespace: &'a str, config_map: &'a ConfigMap) -> ClusterFuture<'a, ConfigMap> {
        Box::pin(async move {
            let request = self
                .request(Method::POST, &format!("/api/v1/namespaces/{namespace}/configmaps"))?
                .json(config_map);
            self.json(request, "configmap", &config_map.metadata.name).await
        })
    }

    fn delete_config_map<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let request = self.request(
                Method::DELETE,
                &format!("/api/v1/namespaces/{namespace}/configmaps/{name}"),
            )?;
            self.send(request, "configmap", name).await?;
            Ok(())
        })
    }

    fn get_pod<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, Pod> {
        Box::pin(async move {
            let request = self.request(Method::GET, &format!("/api/v1/namespaces/{namespace}/pods/{name}"))?;
            self.json(request, "pod", name).await
        })
    }

    fn create_pod<'a>(&'a self, namespace: &'a str, pod: &'a Pod) -> ClusterFuture<'a, Pod> {
        Box::pin(async move {
            let request = self
                .request(Method::POST, &format!("/api/v1/namespaces/{namespace}/pods"))?
                .json(pod);
            self.json(request, "pod", &pod.metadata.name).await
        })
    }

    fn delete_pod<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let request = self.request(
                Method::DELETE,
                &format!("/api/v1/namespaces/{namespace}/pods/{name}"),
            )?;
            self.send(request, "pod", name).await?;
            Ok(())
        })
    }

    fn pod_logs<'a>(&'a self, namespace: &'a str, name: &'a str, container: &'a str) -> ClusterFuture<'a, String> {
        Box::pin(async move {
            let request = self
                .request(
                    Method::GET,
                    &format!("/api/v1/namespaces/{namespace}/pods/{name}/log"),
                )?
                .query(&[("container", container), ("previous", "false")]);
            let logs = self.send(request, "pod", name).await?.text().await?;
            if logs.contains(INTERNAL_ERROR_MARKER) {
                return Err(ClusterError::InternalErrorInLogs { logs });
            }
            Ok(logs)
        })
    }

    fn access_review<'a>(&'a self, attributes: &'a ResourceAttributes) -> ClusterFuture<'a, bool> {
        Box::pin(async move {
            let review = SelfSubjectAccessReview::new(attributes.clone());
            let request = self
                .request(
                    Method::POST,
                    "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews",
                )?
                .json(&review);
            let review: SelfSubjectAccessReview = self
                .json(request, "selfsubjectaccessreview", &attributes.resource)
                .await?;
            Ok(review.status.is_some_and(|status| status.allowed))
        })
    }
}
