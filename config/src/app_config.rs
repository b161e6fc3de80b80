use directories::ProjectDirs;
use std::{
    env,
    path::PathBuf,
};

lazy_static::lazy_static! {
    static ref CONFIG_FOLDER: Option<PathBuf> = env::var("REMOTE_COLLECT_CONFIG").ok().map(PathBuf::from);
}

/// Directory holding the optional `config.yaml`. `REMOTE_COLLECT_CONFIG`
/// overrides the platform default.
pub fn get_config_dir() -> PathBuf {
    if let Some(dir) = CONFIG_FOLDER.clone() {
        dir
    } else if let Some(dirs) = ProjectDirs::from("sh", "troubleshoot", "remote-collect") {
        dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}
