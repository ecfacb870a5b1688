//! Service configuration: an optional TOML file (`LAUNCH_CONFIG`) with
//! environment overrides on top. Every field has a default.

use serde::Deserialize;
use std::{path::{Path, PathBuf}, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::debug;
use crate::{clients, storage::DEFAULT_STAGING_DIR};

pub const CONFIG_PATH_ENV: &str = "LAUNCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode { #[default] Postgres, Memory }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat { #[default] Compact, Json }

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StagingSettings {
    /// `fs`, `memory` or `s3`.
    pub mode: String,
    pub dir: PathBuf,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
}

impl Default for StagingSettings {
    fn default() -> Self { Self { mode: "fs".into(), dir: PathBuf::from(DEFAULT_STAGING_DIR), bucket: None, endpoint: None } }
}

/// Tunables of the orchestration pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_files: usize,
    pub strip_root_folder: bool,
    /// Number of `ready` deployments a user may hold.
    pub free_tier_limit: i64,
    pub branch: String,
    pub repo_description: String,
    pub fallback_domain: String,
    pub store_prefix: String,
    pub store_name_max_len: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_files: 200,
            strip_root_folder: true,
            free_tier_limit: 1,
            branch: "main".into(),
            repo_description: "Deployed with LaunchPlane".into(),
            fallback_domain: "vercel.app".into(),
            store_prefix: "launchplane".into(),
            store_name_max_len: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings { pub level: String, pub format: LogFormat }

impl Default for LogSettings {
    fn default() -> Self { Self { level: "info".into(), format: LogFormat::Compact } }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub store_mode: StoreMode,
    pub staging: StagingSettings,
    pub github_api: String,
    pub vercel_api: String,
    pub http_timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub vercel_client_id: Option<String>,
    pub vercel_client_secret: Option<String>,
    pub pipeline: PipelineSettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            database_url: None,
            store_mode: StoreMode::Postgres,
            staging: StagingSettings::default(),
            github_api: clients::github::DEFAULT_API_BASE.into(),
            vercel_api: clients::vercel::DEFAULT_API_BASE.into(),
            http_timeout_secs: 30,
            max_upload_bytes: 50 * 1024 * 1024,
            vercel_client_id: None,
            vercel_client_secret: None,
            pipeline: PipelineSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bind_addr", &self.bind_addr)
            .field("has_database_url", &self.database_url.is_some())
            .field("store_mode", &self.store_mode)
            .field("staging", &self.staging)
            .field("github_api", &self.github_api)
            .field("vercel_api", &self.vercel_api)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("has_vercel_oauth", &(self.vercel_client_id.is_some() && self.vercel_client_secret.is_some()))
            .field("pipeline", &self.pipeline)
            .field("log", &self.log)
            .finish()
    }
}

impl Settings {
    /// File named by `LAUNCH_CONFIG` (if any), then process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.is_empty()) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        settings.apply_env(|k| std::env::var(k).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let settings = toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        debug!(event = "config.file_loaded", path = %path.display());
        Ok(settings)
    }

    /// Overlay `LAUNCH_*` (and `DATABASE_URL`) values. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("LAUNCH_BIND_ADDR") { self.bind_addr = v; }
        if let Some(v) = get("DATABASE_URL") { self.database_url = Some(v); }
        if let Some(v) = get("LAUNCH_STORE_MODE") {
            self.store_mode = match v.to_ascii_lowercase().as_str() {
                "postgres" => StoreMode::Postgres,
                "memory" => StoreMode::Memory,
                _ => return Err(ConfigError::Invalid { key: "LAUNCH_STORE_MODE", value: v }),
            };
        }
        if let Some(v) = get("LAUNCH_STAGING_MODE") {
            let mode = v.to_ascii_lowercase();
            if !matches!(mode.as_str(), "fs" | "memory" | "s3") { return Err(ConfigError::Invalid { key: "LAUNCH_STAGING_MODE", value: v }); }
            self.staging.mode = mode;
        }
        if let Some(v) = get("LAUNCH_STAGING_DIR") { self.staging.dir = PathBuf::from(v); }
        if let Some(v) = get("LAUNCH_STAGING_BUCKET") { self.staging.bucket = Some(v); }
        if let Some(v) = get("LAUNCH_GITHUB_API") { self.github_api = v; }
        if let Some(v) = get("LAUNCH_VERCEL_API") { self.vercel_api = v; }
        if let Some(v) = get("LAUNCH_HTTP_TIMEOUT_SECS") { self.http_timeout_secs = parse("LAUNCH_HTTP_TIMEOUT_SECS", v)?; }
        if let Some(v) = get("LAUNCH_MAX_FILES") { self.pipeline.max_files = parse("LAUNCH_MAX_FILES", v)?; }
        if let Some(v) = get("LAUNCH_STRIP_ROOT_FOLDER") { self.pipeline.strip_root_folder = parse_bool("LAUNCH_STRIP_ROOT_FOLDER", v)?; }
        if let Some(v) = get("LAUNCH_FREE_TIER_LIMIT") { self.pipeline.free_tier_limit = parse("LAUNCH_FREE_TIER_LIMIT", v)?; }
        if let Some(v) = get("LAUNCH_MAX_UPLOAD_BYTES") { self.max_upload_bytes = parse("LAUNCH_MAX_UPLOAD_BYTES", v)?; }
        if let Some(v) = get("LAUNCH_VERCEL_CLIENT_ID") { self.vercel_client_id = Some(v); }
        if let Some(v) = get("LAUNCH_VERCEL_CLIENT_SECRET") { self.vercel_client_secret = Some(v); }
        if let Some(v) = get("LAUNCH_LOG_LEVEL") { self.log.level = v; }
        if let Some(v) = get("LAUNCH_LOG_FORMAT") {
            self.log.format = match v.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" | "text" => LogFormat::Compact,
                _ => return Err(ConfigError::Invalid { key: "LAUNCH_LOG_FORMAT", value: v }),
            };
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration { Duration::from_secs(self.http_timeout_secs.max(1)) }

    /// Client id and secret for the hosting platform's OAuth app, when both are set.
    pub fn vercel_oauth(&self) -> Option<(&str, &str)> {
        Some((self.vercel_client_id.as_deref()?, self.vercel_client_secret.as_deref()?))
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}
