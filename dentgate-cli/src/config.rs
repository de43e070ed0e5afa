//! CLI configuration handling.

use anyhow::{Context, Result, bail};
use dentgate_core::{GatewayConfig, StoreBackend};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `gateway.base_url`.
pub const BASE_URL_ENV: &str = "DENTGATE_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Clinic API settings.
    pub gateway: GatewayConfig,

    /// Where credentials are kept.
    pub store: StoreBackend,

    /// Credentials file for the `file` backend. Defaults to the platform
    /// data directory.
    pub credentials_path: Option<PathBuf>,

    /// Logging level used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            store: StoreBackend::default(),
            credentials_path: None,
            log_level: "warn".to_string(),
            config_path: PathBuf::new(),
        }
    }
}

impl CliConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration")
    }

    /// Apply an explicit base URL, typically from [`BASE_URL_ENV`].
    pub fn apply_base_url_override(&mut self, base_url: Option<String>) {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.gateway.base_url = url;
        }
    }
}

/// Default location of `config.toml`.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("dentgate.toml"))
}

/// Load configuration from `explicit`, or from the default location.
///
/// A missing default file yields defaults; a missing explicit file is an
/// error.
pub fn load_config(explicit: Option<&Path>) -> Result<CliConfig> {
    let config_path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {:?} does not exist", path);
            }
            path.to_path_buf()
        }
        None => default_config_path(),
    };

    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        CliConfig::from_toml(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.apply_base_url_override(std::env::var(BASE_URL_ENV).ok());
    config
        .gateway
        .validate()
        .with_context(|| format!("Invalid [gateway] settings in {:?}", config_path))?;
    config.config_path = config_path;

    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "dentgate", "dentgate")
}
