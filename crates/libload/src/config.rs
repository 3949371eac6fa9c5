//! Manager configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional JSON file, and `LIBLOAD_*` environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::{HttpClientConfig, DEFAULT_USER_AGENT};
use crate::logging::LogLevel;
use crate::repository::MAVEN_CENTRAL;
use crate::{LibraryError, Result};

const ENV_PREFIX: &str = "LIBLOAD_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Cache directory name under the host's data directory
    #[serde(default = "default_directory_name")]
    pub directory_name: String,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Repositories added to every manager built from this config
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Repository tried after all others; `null` disables it
    #[serde(default = "default_fallback_repository")]
    pub fallback_repository: Option<String>,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Re-hash cached artifacts against their declared checksum
    #[serde(default)]
    pub verify_cached: bool,
}

fn default_directory_name() -> String {
    "lib".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_fallback_repository() -> Option<String> {
    Some(MAVEN_CENTRAL.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory_name: default_directory_name(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            proxy: None,
            repositories: Vec::new(),
            fallback_repository: default_fallback_repository(),
            log_level: LogLevel::default(),
            verify_cached: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build configuration from defaults, an optional file and the environment
    pub fn build<P: AsRef<Path>>(file: Option<P>, use_environment: bool) -> Result<Self> {
        let loader = ConfigLoader::new(use_environment);

        let mut config = match file {
            Some(path) => loader.load_config_file(path)?,
            None => Self::default(),
        };

        if use_environment {
            config.apply_env_overrides(&loader)?;
        }

        Ok(config)
    }

    pub fn http_config(&self) -> HttpClientConfig {
        let mut http = HttpClientConfig::new()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_user_agent(self.user_agent.clone());
        if let Some(proxy) = &self.proxy {
            http = http.with_proxy(proxy.clone());
        }
        http
    }

    fn apply_env_overrides(&mut self, loader: &ConfigLoader) -> Result<()> {
        if let Some(name) = loader.get_env_config("directory-name") {
            self.directory_name = name;
        }

        if let Some(timeout) = loader.get_env_u64("timeout")? {
            self.timeout = timeout;
        }

        if let Some(timeout) = loader.get_env_u64("connect-timeout")? {
            self.connect_timeout = timeout;
        }

        if let Some(user_agent) = loader.get_env_config("user-agent") {
            self.user_agent = user_agent;
        }

        if let Some(proxy) = loader.get_env_config("proxy") {
            self.proxy = Some(proxy);
        }

        if let Some(repositories) = loader.get_env_config("repositories") {
            self.repositories = repositories
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(fallback) = loader.get_env_config("fallback-repository") {
            self.fallback_repository = match fallback.to_lowercase().as_str() {
                "none" | "off" => None,
                _ => Some(fallback),
            };
        }

        if let Some(level) = loader.get_env_config("log-level") {
            self.log_level = level
                .parse()
                .map_err(|err| LibraryError::Config(format!("{ENV_PREFIX}LOG_LEVEL: {err}")))?;
        }

        if let Some(verify) = loader.get_env_bool("verify-cached") {
            self.verify_cached = verify;
        }

        Ok(())
    }
}

/// Reads configuration files and `LIBLOAD_*` environment variables.
#[derive(Debug)]
pub struct ConfigLoader {
    use_environment: bool,
}

impl ConfigLoader {
    pub fn new(use_environment: bool) -> Self {
        Self { use_environment }
    }

    /// Load configuration from a JSON file; a missing file yields defaults
    pub fn load_config_file<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| LibraryError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| LibraryError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Get a configuration value from the environment.
    /// Converts "foo-bar" to "LIBLOAD_FOO_BAR"
    pub fn get_env_config(&self, key: &str) -> Option<String> {
        if !self.use_environment {
            return None;
        }

        let var = format!("{}{}", ENV_PREFIX, key.replace('-', "_").to_uppercase());
        env::var(var).ok().filter(|s| !s.is_empty())
    }

    pub fn get_env_bool(&self, key: &str) -> Option<bool> {
        self.get_env_config(key)
            .map(|val| !matches!(val.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
    }

    pub fn get_env_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get_env_config(key)
            .map(|val| {
                val.trim().parse().map_err(|_| {
                    LibraryError::Config(format!(
                        "{}{} must be a number of seconds, got {:?}",
                        ENV_PREFIX,
                        key.replace('-', "_").to_uppercase(),
                        val
                    ))
                })
            })
            .transpose()
    }
}
