use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::pipeline::outcome::ReportingConvention;

pub const SETTINGS_PATH_ENV: &str = "ADCRAFT_SETTINGS";
pub const DEFAULT_SETTINGS_RELATIVE_PATH: &str = "config/adcraft.settings.toml";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_PROMPT: &str = "studio lighting";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("PORT must be a TCP port number, got '{0}'")]
    InvalidPort(String),
    #[error("bind host must be an IP address, got '{0}'")]
    InvalidBindHost(String),
    #[error("public base url is not a valid absolute url: '{0}'")]
    InvalidPublicUrl(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerateMode {
    /// Spawn the scene routine.
    Process,
    /// Echo the input image back after `echo_delay_ms`; nothing is spawned.
    Echo,
}

impl GenerateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Echo => "echo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutineSettings {
    pub program: String,
    /// Leading arguments, typically the script path. The job's own
    /// arguments are appended after these.
    pub args: Vec<String>,
    pub convention: ReportingConvention,
    pub cwd: Option<PathBuf>,
}

impl Default for RoutineSettings {
    fn default() -> Self {
        Self {
            program: String::from("python3"),
            args: Vec::new(),
            convention: ReportingConvention::StdoutMarker,
            cwd: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateSceneSettings {
    pub program: String,
    pub args: Vec<String>,
    pub convention: ReportingConvention,
    pub cwd: Option<PathBuf>,
    pub mode: GenerateMode,
    pub echo_delay_ms: u64,
}

impl Default for GenerateSceneSettings {
    fn default() -> Self {
        Self {
            program: String::from("python3"),
            args: vec![String::from("ai_modules/ad_generator.py")],
            convention: ReportingConvention::StdoutMarker,
            cwd: None,
            mode: GenerateMode::Process,
            echo_delay_ms: 2_000,
        }
    }
}

impl GenerateSceneSettings {
    pub fn routine(&self) -> RoutineSettings {
        RoutineSettings {
            program: self.program.clone(),
            args: self.args.clone(),
            convention: self.convention,
            cwd: self.cwd.clone(),
        }
    }

    pub fn echo_delay(&self) -> Duration {
        Duration::from_millis(self.echo_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub bind_host: String,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub client_dist_dir: PathBuf,
    /// Scheme and host used in returned artifact URLs. When unset the
    /// request's `Host` header is used.
    pub public_base_url: Option<String>,
    pub max_upload_bytes: usize,
    pub default_prompt: String,
    pub remove_background: RoutineSettings,
    pub generate_scene: GenerateSceneSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            bind_host: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            uploads_dir: PathBuf::from("uploads"),
            client_dist_dir: PathBuf::from("client/dist"),
            public_base_url: None,
            max_upload_bytes: 25 * 1024 * 1024,
            default_prompt: String::from(DEFAULT_PROMPT),
            remove_background: RoutineSettings {
                args: vec![String::from("ai_modules/bg_processor.py")],
                ..RoutineSettings::default()
            },
            generate_scene: GenerateSceneSettings::default(),
        }
    }
}

impl AppSettings {
    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        let ip: IpAddr = self
            .bind_host
            .trim()
            .parse()
            .map_err(|_| SettingsError::InvalidBindHost(self.bind_host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn public_base_url(&self) -> Result<Option<Url>, SettingsError> {
        self.public_base_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|raw| {
                Url::parse(raw)
                    .ok()
                    .filter(|url| !url.cannot_be_a_base())
                    .ok_or_else(|| SettingsError::InvalidPublicUrl(raw.to_string()))
            })
            .transpose()
    }

    /// Anchors every relative path on `app_root`; routines without an
    /// explicit `cwd` run from `app_root`.
    pub fn anchored_at(mut self, app_root: &Path) -> Self {
        self.uploads_dir = anchor(app_root, self.uploads_dir);
        self.client_dist_dir = anchor(app_root, self.client_dist_dir);
        self.remove_background.cwd = Some(anchor(
            app_root,
            self.remove_background
                .cwd
                .take()
                .unwrap_or_else(|| app_root.to_path_buf()),
        ));
        self.generate_scene.cwd = Some(anchor(
            app_root,
            self.generate_scene
                .cwd
                .take()
                .unwrap_or_else(|| app_root.to_path_buf()),
        ));
        self
    }
}

/// Defaults, then the settings file, then environment overrides.
pub fn load_app_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AppSettings, SettingsError> {
    let explicit = explicit_path
        .map(str::to_string)
        .or_else(|| env(SETTINGS_PATH_ENV))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| anchor(app_root, PathBuf::from(v)));

    let settings = match explicit {
        Some(path) => load_settings_file(path.as_path())?,
        None => {
            let default_path = app_root.join(DEFAULT_SETTINGS_RELATIVE_PATH);
            if default_path.exists() {
                load_settings_file(default_path.as_path())?
            } else {
                AppSettings::default()
            }
        }
    };

    let settings = apply_env_overrides(settings, env)?;
    settings.public_base_url()?;
    Ok(settings.anchored_at(app_root))
}

pub fn load_settings_file(path: &Path) -> Result<AppSettings, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    toml::from_str(raw.as_str()).map_err(|error| SettingsError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })
}

fn apply_env_overrides(
    mut settings: AppSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AppSettings, SettingsError> {
    if let Some(port) = env("PORT").map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        settings.port = port
            .parse::<u16>()
            .map_err(|_| SettingsError::InvalidPort(port.clone()))?;
    }
    if let Some(host) = env("ADCRAFT_BIND_HOST")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        settings.bind_host = host;
    }
    if let Some(url) = env("ADCRAFT_PUBLIC_URL")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        settings.public_base_url = Some(url);
    }
    Ok(settings)
}

fn anchor(app_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        app_root.join(path)
    }
}
