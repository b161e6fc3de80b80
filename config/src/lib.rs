#[macro_use]
extern crate tracing;

mod app_config;
mod args;
mod cluster_settings;
mod task;

pub use app_config::get_config_dir;
pub use args::Args;
pub use cluster_settings::ClusterSettings;
use color_eyre::Result;
use eyre::eyre;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    path::PathBuf,
    time::Duration,
};
pub use task::{
    TaskDescriptor,
    TaskKind,
    TaskKindIter,
};

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

/// Upper bound for every configured duration.
pub const MAX_DURATION_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub namespace: String,
    pub name_prefix: String,
    pub image: String,
    pub pull_policy: String,
    pub service_account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    pub timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub cleanup_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    pub bundle_path: PathBuf,
    #[serde(default)]
    pub collect_without_permissions: bool,
    #[serde(default)]
    pub cluster: ClusterSettings,
    pub task: TaskDescriptor,
}

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl Config {
    /// Layers, lowest first: built-in defaults, `config.yaml` in the config
    /// directory, the file passed with `--config`, then the command line.
    pub fn new(args: Args) -> Result<Self, config::ConfigError> {
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Yaml));

        let config_files = [("config.yaml", config::FileFormat::Yaml)];

        for (file, format) in &config_files {
            let source = config::File::from(config_dir.join(file))
                .format(*format)
                .required(false);
            builder = builder.add_source(source);
        }

        if let Some(path) = &args.config {
            debug!(?path, "Adding configuration file from args");
            builder = builder.add_source(
                config::File::from(path.clone())
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(args);

        let cfg: Self = builder.build()?.try_deserialize()?;

        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(eyre!("config.namespace must be non-empty"));
        }
        if self.name_prefix.trim().is_empty() {
            return Err(eyre!("config.name_prefix must be non-empty"));
        }
        if self.timeout_seconds == 0 {
            return Err(eyre!("config.timeout_seconds must be greater than zero"));
        }
        if self.timeout_seconds > MAX_DURATION_SECONDS {
            return Err(eyre!("config.timeout_seconds must be at most {MAX_DURATION_SECONDS}"));
        }
        if self.poll_interval_ms == 0 {
            return Err(eyre!("config.poll_interval_ms must be greater than zero"));
        }
        if self.poll_interval_ms > MAX_DURATION_SECONDS * 1000 {
            return Err(eyre!(
                "config.poll_interval_ms must be at most {}",
                MAX_DURATION_SECONDS * 1000
            ));
        }
        if self.cleanup_timeout_seconds > MAX_DURATION_SECONDS {
            return Err(eyre!("config.cleanup_timeout_seconds must be at most {MAX_DURATION_SECONDS}"));
        }
        if self.max_concurrency == Some(0) {
            return Err(eyre!("config.max_concurrency must be greater than zero when set"));
        }
        Ok(())
    }
}
