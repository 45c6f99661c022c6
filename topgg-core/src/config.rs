//! File and environment configuration.
//!
//! The library itself never reads configuration; applications load an
//! [`AppConfig`] and hand the relevant pieces to the client, autoposter and
//! webhook server.

use crate::error::{ConfigError, CoreError};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://top.gg/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Top.gg refuses to be posted to more often than every 15 minutes.
pub const MIN_AUTOPOST_INTERVAL_SECS: u64 = 900;

pub const TOKEN_ENV_VAR: &str = "TOPGG_TOKEN";
pub const WEBHOOK_PORT_ENV_VAR: &str = "TOPGG_WEBHOOK_PORT";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub autopost: AutopostSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutopostSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub routes: Vec<RouteSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteSettings {
    pub path: String,
    #[serde(default)]
    pub secret: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_interval_secs() -> u64 {
    MIN_AUTOPOST_INTERVAL_SECS
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for AutopostSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: None,
            routes: Vec::new(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AutopostSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Parses a TOML document without touching the environment.
    pub fn from_toml_str(contents: &str) -> Result<Self, CoreError> {
        let config: AppConfig = toml::from_str(contents).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Reads `path`, applies environment overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                CoreError::Io(e)
            }
        })?;

        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Builds a configuration purely from the environment. `TOPGG_TOKEN` is
    /// required.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = AppConfig {
            api: ApiConfig::default(),
            autopost: AutopostSettings::default(),
            webhook: WebhookSettings::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;

        if config.api.token.is_empty() {
            return Err(ConfigError::MissingEnvironmentVariable {
                var_name: TOKEN_ENV_VAR.to_string(),
            }
            .into());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(TOKEN_ENV_VAR) {
            debug!("Using API token from {}", TOKEN_ENV_VAR);
            self.api.token = token;
        }

        if let Some(port) = lookup(WEBHOOK_PORT_ENV_VAR) {
            let parsed = port.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: WEBHOOK_PORT_ENV_VAR.to_string(),
                value: port.clone(),
            })?;
            self.webhook.port = Some(parsed);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.api.token.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "api.token".to_string(),
            }
            .into());
        }

        if self.autopost.interval_secs < MIN_AUTOPOST_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue {
                field: "autopost.interval_secs".to_string(),
                value: self.autopost.interval_secs.to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for route in &self.webhook.routes {
            if !route.path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "webhook.routes.path".to_string(),
                    value: route.path.clone(),
                }
                .into());
            }
            if !seen.insert(route.path.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "webhook.routes.path".to_string(),
                    value: format!("{} (duplicate)", route.path),
                }
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [api]
        token = "abc.def.ghi"

        [autopost]
        interval_secs = 1800

        [webhook]
        port = 8080

        [[webhook.routes]]
        path = "/votes"
        secret = "youshallnotpass"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.api.token, "abc.def.ghi");
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert_eq!(config.autopost.interval(), Duration::from_secs(1800));
        assert_eq!(config.webhook.port, Some(8080));
        assert_eq!(config.webhook.routes.len(), 1);
        assert_eq!(config.webhook.routes[0].secret, "youshallnotpass");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.autopost.interval_secs, MIN_AUTOPOST_INTERVAL_SECS);
        assert_eq!(config.webhook.bind_address, IpAddr::from([0, 0, 0, 0]));
        assert!(matches!(
            config.validate(),
            Err(CoreError::Config(ConfigError::MissingField { .. }))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config
            .apply_env_overrides(|name| match name {
                TOKEN_ENV_VAR => Some("from.env.token".to_string()),
                WEBHOOK_PORT_ENV_VAR => Some("9000".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.api.token, "from.env.token");
        assert_eq!(config.webhook.port, Some(9000));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let result = config.apply_env_overrides(|name| {
            (name == WEBHOOK_PORT_ENV_VAR).then(|| "not-a-port".to_string())
        });
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_interval_below_minimum_is_rejected() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.autopost.interval_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_routes_are_rejected() {
        let config = AppConfig::from_toml_str(
            r#"
            [api]
            token = "t"

            [[webhook.routes]]
            path = "/votes"

            [[webhook.routes]]
            path = "/votes"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::load("/definitely/not/here/topgg.toml");
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_parse_error() {
        let result = AppConfig::from_toml_str("[api\ntoken = ");
        assert!(matches!(
            result,
            Err(CoreError::Config(ConfigError::Parse(_)))
        ));
    }
}
