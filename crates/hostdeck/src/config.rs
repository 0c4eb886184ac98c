//! Application configuration.
//!
//! Layered as defaults, then the TOML file, then `HOSTDECK__SECTION__KEY`
//! environment variables. Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use hostdeck_core::{SupervisorConfig, TerminalConfig};

pub const APP_NAME: &str = "hostdeck";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub jobs: SupervisorConfig,
    pub terminal: TerminalConfig,
    pub files: FilesConfig,
    pub logs: LogsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to make credentialed cross-origin requests.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory no file or terminal operation may leave.
    pub root: String,
    /// Scripts directory. Defaults to `<root>/scripts`.
    pub scripts_dir: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: "~".to_string(),
            scripts_dir: None,
        }
    }
}

impl SandboxConfig {
    pub fn root_path(&self) -> Result<PathBuf> {
        expand_str_path(&self.root)
    }

    pub fn scripts_path(&self) -> Result<PathBuf> {
        match &self.scripts_dir {
            Some(dir) => expand_str_path(dir),
            None => Ok(self.root_path()?.join("scripts")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Maximum upload or edit size in bytes.
    pub max_upload_size: u64,
    /// Largest file returned by the text viewer.
    pub max_view_size: u64,
    /// Uncompressed size limit for backup archives.
    pub max_backup_bytes: u64,
    /// File count limit for backup archives.
    pub max_backup_entries: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 100 * 1024 * 1024,
            max_view_size: 5 * 1024 * 1024,
            max_backup_bytes: 100 * 1024 * 1024,
            max_backup_entries: 10_000,
        }
    }
}

/// Log viewer limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Most log files listed at once.
    pub max_files: usize,
    /// Lines returned when tailing a file.
    pub tail_lines: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            max_files: 500,
            tail_lines: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from `path` (optional) and the environment.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(&env_prefix()).separator("__"))
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    built
        .try_deserialize()
        .context("parsing configuration")
}

/// Write a default configuration file, creating its directory.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = format!("# Configuration for {}\n# File: {}\n\n", APP_NAME, path.display());
    body.push_str(&toml);
    std::fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME).join("config.toml"));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME).join("config.toml"));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME).join("config.toml"))
        .context("unable to determine configuration directory")
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}
