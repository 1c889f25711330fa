pub mod api;
pub mod client;
pub mod pipeline;
pub mod settings;
pub mod storage;

use std::path::PathBuf;

pub const APP_ROOT_ENV: &str = "ADCRAFT_APP_ROOT";

/// Directory relative settings paths and routine scripts are anchored on:
/// `ADCRAFT_APP_ROOT` when set, otherwise the working directory.
pub fn default_app_root() -> PathBuf {
    std::env::var(APP_ROOT_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
