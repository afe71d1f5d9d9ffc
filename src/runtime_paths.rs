use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use std::sync::RwLock;

const APP_NAME: &str = "planora";
const HOME_ENV: &str = "PLANORA_HOME";

static ROOT_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Pins the data root for the rest of the process. Mostly for tests.
pub fn set_app_root_override(path: Option<PathBuf>) {
    let mut guard = ROOT_OVERRIDE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = path;
}

fn root_override() -> Option<PathBuf> {
    ROOT_OVERRIDE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

fn env_root() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn platform_root() -> PathBuf {
    ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .or_else(|| BaseDirs::new().map(|dirs| dirs.data_local_dir().join(APP_NAME)))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

/// Resolution order: explicit override, `PLANORA_HOME`, platform data dir.
pub fn app_root() -> PathBuf {
    root_override()
        .or_else(env_root)
        .unwrap_or_else(platform_root)
}

pub fn default_db_path() -> String {
    app_root()
        .join("data")
        .join("planora.db")
        .to_string_lossy()
        .to_string()
}

pub fn default_config_path() -> PathBuf {
    app_root().join("config.json")
}
