//! Gateway configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Error type for invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The base URL could not be parsed or cannot carry paths.
    #[error("invalid base URL {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    /// A timeout must be at least one second.
    #[error("{field} must be greater than zero")]
    InvalidTimeout { field: &'static str },

    /// The HTTP client could not be built from the configuration.
    #[error("failed to build HTTP client: {message}")]
    HttpClient { message: String },
}

/// Settings for talking to the clinic API.
///
/// Every field has a default, so a partial `[gateway]` table is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Root of the API; request paths are resolved against it.
    pub base_url: String,

    /// Login endpoint, relative to `base_url`.
    pub login_path: String,

    /// Refresh endpoint, relative to `base_url`.
    pub refresh_path: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Upper bound on a single refresh call in seconds.
    pub refresh_timeout_secs: u64,

    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/".to_string(),
            login_path: "auth/login".to_string(),
            refresh_path: "auth/refresh".to_string(),
            request_timeout_secs: 30,
            refresh_timeout_secs: 15,
            user_agent: concat!("dentgate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl GatewayConfig {
    /// Override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Parse the base URL, normalised to end with `/` so relative paths
    /// append to it instead of replacing its last segment.
    pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            message: e.to_string(),
        })?;

        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                message: "URL cannot be a base".to_string(),
            });
        }

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(url)
    }

    /// Check every setting the gateway depends on.
    ///
    /// A zero refresh timeout would fail every refresh and wipe the session,
    /// so zero timeouts are rejected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "request_timeout_secs",
            });
        }
        if self.refresh_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout {
                field: "refresh_timeout_secs",
            });
        }
        self.parsed_base_url().map(|_| ())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.refresh_path, "auth/refresh");
        assert_eq!(config.refresh_timeout(), Duration::from_secs(15));
        assert!(config.user_agent.starts_with("dentgate/"));
    }

    #[test]
    fn test_base_url_gains_trailing_slash() {
        let config = GatewayConfig::default().with_base_url("https://clinic.example.com/api");
        let url = config.parsed_base_url().unwrap();
        assert_eq!(url.as_str(), "https://clinic.example.com/api/");
        assert_eq!(
            url.join("patients").unwrap().as_str(),
            "https://clinic.example.com/api/patients"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = GatewayConfig::default().with_base_url("not a url");
        assert!(matches!(
            config.parsed_base_url(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        let config = GatewayConfig::default().with_base_url("mailto:front-desk@example.com");
        assert!(config.parsed_base_url().is_err());
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        assert!(GatewayConfig::default().validate().is_ok());

        let config = GatewayConfig {
            refresh_timeout_secs: 0,
            ..GatewayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout {
                field: "refresh_timeout_secs"
            })
        ));

        let config = GatewayConfig {
            request_timeout_secs: 0,
            ..GatewayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout {
                field: "request_timeout_secs"
            })
        ));
    }

    #[test]
    fn test_validate_checks_base_url() {
        let config = GatewayConfig::default().with_base_url("not a url");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"base_url": "https://clinic.example.com/"}"#).unwrap();
        assert_eq!(config.base_url, "https://clinic.example.com/");
        assert_eq!(config.login_path, "auth/login");
        assert_eq!(config.request_timeout_secs, 30);
    }
}
