use std::path::{Path, PathBuf};
use std::time::Duration;

use panel_sync::{ClientConfig, Credentials};
use panel_types::{CommonError, PanelKind};
use serde::{Deserialize, Serialize};

use crate::cli::ConnectionArgs;
use crate::error::{CliError, Result};

/// Environment variable holding the panel password.
pub const PASSWORD_ENV: &str = "PANELS_PASSWORD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelsConfig {
    #[serde(default = "ConnectionConfig::threexui")]
    pub threexui: ConnectionConfig,
    #[serde(default = "ConnectionConfig::pasarguard")]
    pub pasarguard: ConnectionConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub accept_invalid_certs: bool,
}

impl ConnectionConfig {
    fn threexui() -> Self {
        Self {
            base_url: "http://127.0.0.1:2053".to_string(),
            username: "admin".to_string(),
            password: None,
        }
    }

    fn pasarguard() -> Self {
        Self {
            base_url: "https://127.0.0.1:8000".to_string(),
            username: "admin".to_string(),
            password: None,
        }
    }
}

impl Default for PanelsConfig {
    fn default() -> Self {
        Self {
            threexui: ConnectionConfig::threexui(),
            pasarguard: ConnectionConfig::pasarguard(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            accept_invalid_certs: true,
        }
    }
}

/// Connection details after the config file, flags and environment are
/// merged. The password may still be missing.
#[derive(Debug, Clone)]
pub struct ResolvedConnection {
    pub client: ClientConfig,
    pub username: String,
    pub password: Option<String>,
}

impl ResolvedConnection {
    pub fn credentials(&self, password: String) -> Credentials {
        Credentials::new(self.username.clone(), password)
    }
}

pub struct ConfigManager {
    config: PanelsConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);

        let config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let default_config = PanelsConfig::default();
            Self::save_config(&default_config, &config_path)?;
            default_config
        };

        Ok(Self { config, config_path })
    }

    pub fn get_config(&self) -> &PanelsConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn validate_config(&self) -> std::result::Result<(), CommonError> {
        for (name, section) in [("threexui", &self.config.threexui), ("pasarguard", &self.config.pasarguard)] {
            if section.base_url.trim().is_empty() {
                return Err(CommonError::Validation(format!("[{}] base_url is empty", name)));
            }
            if section.username.trim().is_empty() {
                return Err(CommonError::Validation(format!("[{}] username is empty", name)));
            }
        }
        if self.config.http.timeout_secs == 0 {
            return Err(CommonError::Configuration("[http] timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    /// Merge the panel's section with command line overrides and the
    /// password from the environment.
    pub fn resolve(&self, panel: PanelKind, overrides: &ConnectionArgs, env_password: Option<String>) -> ResolvedConnection {
        let section = match panel {
            PanelKind::ThreeXui => &self.config.threexui,
            PanelKind::PasarGuard => &self.config.pasarguard,
        };

        let base_url = overrides.url.clone().unwrap_or_else(|| section.base_url.clone());
        let client = ClientConfig::new(base_url)
            .with_timeout(Duration::from_secs(self.config.http.timeout_secs))
            .with_accept_invalid_certs(self.config.http.accept_invalid_certs);

        ResolvedConnection {
            client,
            username: overrides.username.clone().unwrap_or_else(|| section.username.clone()),
            password: env_password
                .filter(|password| !password.is_empty())
                .or_else(|| section.password.clone()),
        }
    }

    fn default_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("panels").join("config.toml")
        } else {
            PathBuf::from("/etc/panels/config.toml")
        }
    }

    fn load_config(path: &Path) -> Result<PanelsConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::ConfigError(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content).map_err(|e| CliError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    fn save_config(config: &PanelsConfig, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CliError::ConfigError(format!("Failed to create config directory: {}", e)))?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| CliError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| CliError::ConfigError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}
