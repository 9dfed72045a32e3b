// ABOUTME: Layered configuration: defaults, config file, PORTAINER_* environment, then CLI flags
// Produces the validated API settings and the exec target handed to the session

use crate::error::{AuthError, ConfigError};
use crate::portainer::Credentials;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: u64 = 1;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_COMMAND: &str = "bash";
const ENV_PREFIX: &str = "PORTAINER_";
const CONFIG_DIR_NAME: &str = ".portainer-shell";

/// Settings as they may appear in `config.toml`, `config.json` or `config.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub endpoint: Option<u64>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Fields set in `other` win.
    fn merge(self, other: FileConfig) -> FileConfig {
        FileConfig {
            api_url: other.api_url.or(self.api_url),
            endpoint: other.endpoint.or(self.endpoint),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            api_key: other.api_key.or(self.api_key),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
        }
    }

    fn from_env<F>(lookup: F) -> Result<FileConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key)).filter(|v| !v.is_empty());
        Ok(FileConfig {
            api_url: var("API_URL"),
            endpoint: var("ENDPOINT")
                .map(|v| parse_number("PORTAINER_ENDPOINT", &v))
                .transpose()?,
            user: var("USER"),
            password: var("PASSWORD"),
            api_key: var("API_KEY"),
            timeout_secs: var("TIMEOUT")
                .map(|v| parse_number("PORTAINER_TIMEOUT", &v))
                .transpose()?,
        })
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Values given on the command line, plus an optional explicit config path.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub settings: FileConfig,
}

#[derive(Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub endpoint: u64,
    pub user: String,
    pub password: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_url", &self.api_url)
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("api_key_set", &!self.api_key.is_empty())
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Loads from the real filesystem and process environment.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let file = match &overrides.config_path {
            Some(path) => Some(read_config_file(path)?),
            None => match find_config_file(&search_paths()) {
                Some(path) => Some(read_config_file(&path)?),
                None => {
                    debug!("no config file found");
                    None
                }
            },
        };
        Self::resolve(file, |key| std::env::var(key).ok(), &overrides.settings)
    }

    /// Applies the layers in order: defaults, file, environment, CLI.
    pub fn resolve<F>(
        file: Option<FileConfig>,
        env: F,
        cli: &FileConfig,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let merged = file
            .unwrap_or_default()
            .merge(FileConfig::from_env(env)?)
            .merge(cli.clone());

        let config = AppConfig {
            api_url: merged.api_url.unwrap_or_default(),
            endpoint: merged.endpoint.unwrap_or(DEFAULT_ENDPOINT),
            user: merged.user.unwrap_or_default(),
            password: merged.password.unwrap_or_default(),
            api_key: merged.api_key.unwrap_or_default(),
            timeout_secs: merged.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.is_empty() {
            return Err(ConfigError::Missing("api_url"));
        }
        match url::Url::parse(&self.api_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "api_url".to_string(),
                    value: self.api_url.clone(),
                })
            }
        }
        if self.endpoint == 0 {
            return Err(ConfigError::InvalidValue {
                key: "endpoint".to_string(),
                value: "0".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.api_key.is_empty() && (self.user.is_empty() || self.password.is_empty()) {
            return Err(ConfigError::Missing("api_key, or both user and password"));
        }
        Ok(())
    }

    pub fn credentials(&self) -> Result<Credentials, AuthError> {
        Credentials::new(&self.user, &self.password, &self.api_key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub container_pattern: String,
    pub command: Vec<String>,
    pub run_as_user: Option<String>,
    pub workdir: Option<String>,
}

impl ExecTarget {
    pub fn new(
        container_pattern: &str,
        command: Vec<String>,
        run_as_user: Option<String>,
        workdir: Option<String>,
    ) -> Result<Self, ConfigError> {
        if container_pattern.is_empty() {
            return Err(ConfigError::Missing("container"));
        }
        let command = if command.is_empty() {
            vec![DEFAULT_COMMAND.to_string()]
        } else {
            command
        };
        Ok(Self {
            container_pattern: container_pattern.to_string(),
            command,
            run_as_user: run_as_user.filter(|u| !u.is_empty()),
            workdir: workdir.filter(|w| !w.is_empty()),
        })
    }
}

/// `./`, `~/.portainer-shell/`, then `/etc/portainer-shell/`; TOML, then JSON, then YAML.
pub fn search_paths() -> Vec<PathBuf> {
    let mut dirs_to_search = vec![PathBuf::from(".")];
    if let Some(home) = dirs::home_dir() {
        dirs_to_search.push(home.join(CONFIG_DIR_NAME));
    }
    dirs_to_search.push(PathBuf::from("/etc/portainer-shell"));

    dirs_to_search
        .into_iter()
        .flat_map(|dir| {
            [
                dir.join("config.toml"),
                dir.join("config.json"),
                dir.join("config.yml"),
            ]
        })
        .collect()
}

pub fn find_config_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

pub fn read_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let shown = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: shown.clone(),
        source,
    })?;

    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
        Some("yml" | "yaml") => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
        _ => toml::from_str(&content).map_err(|e| e.to_string()),
    };

    let config = parsed.map_err(|reason| ConfigError::Parse {
        path: shown.clone(),
        reason,
    })?;
    info!(path = %shown, "loaded config file");
    Ok(config)
}
