use crate::task::TaskKind;
use clap::Parser;
use std::{
    path::PathBuf,
    time::Duration,
};

/// Runs one host collector on every schedulable node of a cluster and writes
/// the per-node results into a bundle directory.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Additional YAML configuration file, applied on top of the stored one.
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Namespace in which the per-node config maps and pods are created.
    #[clap(long, short = 'n', value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Base name of the generated per-node objects.
    #[clap(long, value_name = "PREFIX")]
    pub name_prefix: Option<String>,

    /// Image of the pod running the collector on each node.
    #[clap(long, value_name = "IMAGE")]
    pub image: Option<String>,

    /// Pull policy of the collector image (Always, IfNotPresent, Never).
    #[clap(long, value_name = "POLICY")]
    pub pull_policy: Option<String>,

    /// Service account of the collector pods.
    #[clap(long, value_name = "NAME")]
    pub service_account: Option<String>,

    /// Only collect from nodes matching this label selector.
    #[clap(long, short = 'l', value_name = "SELECTOR")]
    pub selector: Option<String>,

    /// Deadline for the whole collection in whole seconds, e.g. `30s` or `2m`.
    #[clap(long, value_name = "DURATION", value_parser = parse_whole_seconds)]
    pub timeout: Option<Duration>,

    /// How often the collector pods are polled, e.g. `500ms`.
    #[clap(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Maximum number of nodes collected from at the same time.
    #[clap(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Directory the collected results are written to.
    #[clap(long, value_name = "DIR")]
    pub bundle_path: Option<PathBuf>,

    /// URL of the Kubernetes API server. Defaults to the in-cluster endpoint.
    #[clap(long, value_name = "URL", env = "REMOTE_COLLECT_API_SERVER")]
    pub api_server: Option<String>,

    /// File containing the bearer token used against the API server.
    #[clap(long, value_name = "FILE")]
    pub token_file: Option<PathBuf>,

    /// CA bundle used to verify the API server certificate.
    #[clap(long, value_name = "FILE")]
    pub ca_file: Option<PathBuf>,

    /// Do not verify the API server certificate.
    #[clap(long, action)]
    pub insecure_skip_tls_verify: bool,

    /// Skip the access review done before any object is created.
    #[clap(long, action)]
    pub collect_without_permissions: bool,

    /// Collector to run on every node.
    #[clap(long, value_name = "KIND")]
    pub kind: Option<TaskKind>,

    /// Name of the collector, used as its title in the bundle.
    #[clap(long, value_name = "NAME")]
    pub collector_name: Option<String>,

    /// Collector parameter, repeatable. Values are parsed as JSON when
    /// possible and used as plain strings otherwise.
    #[clap(long = "param", short = 'p', value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, serde_json::Value)>,

    /// Log at debug level.
    #[clap(long, short = 'v', action)]
    pub verbose: bool,
}

fn parse_whole_seconds(raw: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(raw).map_err(|err| err.to_string())?;
    if duration.subsec_nanos() != 0 {
        return Err(format!("{raw:?} is not a whole number of seconds"));
    }
    if duration.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(duration)
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
        ValueKind,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(namespace) = &self.namespace {
                cache.insert("namespace".to_string(), namespace.clone().into());
            }
            if let Some(name_prefix) = &self.name_prefix {
                cache.insert("name_prefix".to_string(), name_prefix.clone().into());
            }
            if let Some(image) = &self.image {
                cache.insert("image".to_string(), image.clone().into());
            }
            if let Some(pull_policy) = &self.pull_policy {
                cache.insert("pull_policy".to_string(), pull_policy.clone().into());
            }
            if let Some(service_account) = &self.service_account {
                cache.insert("service_account".to_string(), service_account.clone().into());
            }
            if let Some(selector) = &self.selector {
                cache.insert("label_selector".to_string(), selector.clone().into());
            }
            if let Some(timeout) = &self.timeout {
                cache.insert("timeout_seconds".to_string(), (timeout.as_secs() as i64).into());
            }
            if let Some(poll_interval) = &self.poll_interval {
                cache.insert(
                    "poll_interval_ms".to_string(),
                    (poll_interval.as_millis() as i64).into(),
                );
            }
            if let Some(max_concurrency) = self.max_concurrency {
                cache.insert("max_concurrency".to_string(), (max_concurrency as i64).into());
            }
            if let Some(bundle_path) = &self.bundle_path {
                cache.insert("bundle_path".to_string(), bundle_path.display().to_string().into());
            }
            if let Some(api_server) = &self.api_server {
                cache.insert("cluster.api_server".to_string(), api_server.clone().into());
            }
            if let Some(token_file) = &self.token_file {
                cache.insert("cluster.token_file".to_string(), token_file.display().to_string().into());
            }
            if let Some(ca_file) = &self.ca_file {
                cache.insert("cluster.ca_file".to_string(), ca_file.display().to_string().into());
            }
            if self.insecure_skip_tls_verify {
                cache.insert("cluster.insecure_skip_tls_verify".to_string(), true.into());
            }
            if self.collect_without_permissions {
                cache.insert("collect_without_permissions".to_string(), true.into());
            }
            if let Some(kind) = &self.kind {
                cache.insert("task.kind".to_string(), kind.to_string().into());
            }
            if let Some(collector_name) = &self.collector_name {
                cache.insert("task.collector_name".to_string(), collector_name.clone().into());
            }
            for (key, value) in &self.params {
                cache.insert(format!("task.params.{key}"), json_to_config(value));
            }
            Ok(cache)
        }
    }

    fn json_to_config(value: &serde_json::Value) -> Value {
        let kind = match value {
            serde_json::Value::Null => ValueKind::Nil,
            serde_json::Value::Bool(b) => ValueKind::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ValueKind::I64(i),
                None => ValueKind::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => ValueKind::String(s.clone()),
            serde_json::Value::Array(items) => ValueKind::Array(items.iter().map(json_to_config).collect()),
            serde_json::Value::Object(map) => ValueKind::Table(Map::from_iter(
                map.iter().map(|(k, v)| (k.clone(), json_to_config(v))),
            )),
        };
        Value::new(None, kind)
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let config_dir_path = crate::get_config_dir().display().to_string();

    format!(
        "\
{version}

Authors: {author}

Config directory: {config_dir_path}",
        version = env!("CARGO_PKG_VERSION"),
    )
}
