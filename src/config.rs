//! Application configuration.

use crate::consts::poll::{INITIAL_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS};
use crate::environment::{Environment, EnvironmentType};
use crate::error::ClientError;
use crate::lifecycle::{FetchPolicy, PollConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use std::{fs, path::Path};

/// Path of the config file: `./ebi.config` when present, otherwise `~/.ebi/config.json`.
pub fn get_config_path() -> Result<PathBuf, std::io::Error> {
    let local_config_path = std::env::current_dir()?.join("ebi.config");
    if local_config_path.exists() {
        return Ok(local_config_path);
    }

    let home_path = home::home_dir().ok_or(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "Home directory not found",
    ))?;
    Ok(home_path.join(".ebi").join("config.json"))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Environment name; empty means production.
    #[serde(default)]
    pub environment: String,

    /// Default contact address for submitted jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Service root overriding the environment's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_initial_poll_interval_ms")]
    pub initial_poll_interval_ms: u64,

    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Give up waiting for a job after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_timeout_secs: Option<u64>,

    #[serde(default)]
    pub fetch_policy: FetchPolicy,

    /// Jobs in flight at once for multi-FASTA runs.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

fn default_initial_poll_interval_ms() -> u64 {
    INITIAL_POLL_INTERVAL_MS
}

fn default_max_poll_interval_ms() -> u64 {
    MAX_POLL_INTERVAL_MS
}

fn default_max_jobs() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Config {
            environment: String::new(),
            email: None,
            base_url: None,
            initial_poll_interval_ms: default_initial_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            poll_timeout_secs: None,
            fetch_policy: FetchPolicy::default(),
            max_jobs: default_max_jobs(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file at the given path.
    ///
    /// # Errors
    /// Returns an `std::io::Error` if reading from file fails or JSON is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let buf = fs::read(path)?;
        let config: Config = serde_json::from_slice(&buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(config)
    }

    /// Like [`Config::load_from_file`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, std::io::Error> {
        match Self::load_from_file(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Saves the configuration to a JSON file at the given path.
    ///
    /// Directories will be created if they don't exist. This method overwrites existing files.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Serialization failed: {}", e),
            )
        })?;
        fs::write(path, json)?;
        Ok(())
    }

    /// The configured environment with the base URL override applied.
    pub fn environment(&self) -> Result<Environment, ClientError> {
        let env_type = if self.environment.trim().is_empty() {
            EnvironmentType::default()
        } else {
            self.environment.parse::<EnvironmentType>().map_err(|_| {
                ClientError::Config(format!("unknown environment {:?}", self.environment))
            })?
        };
        Ok(Environment::new(env_type).with_base_url(self.base_url.clone()))
    }

    /// Polling settings; `timeout_secs` from the command line wins over the file.
    pub fn poll_config(&self, timeout_secs: Option<u64>) -> Result<PollConfig, ClientError> {
        if self.initial_poll_interval_ms == 0 || self.max_poll_interval_ms == 0 {
            return Err(ClientError::Config(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.initial_poll_interval_ms > self.max_poll_interval_ms {
            return Err(ClientError::Config(format!(
                "initial_poll_interval_ms ({}) exceeds max_poll_interval_ms ({})",
                self.initial_poll_interval_ms, self.max_poll_interval_ms
            )));
        }
        Ok(PollConfig {
            initial_interval: Duration::from_millis(self.initial_poll_interval_ms),
            max_interval: Duration::from_millis(self.max_poll_interval_ms),
            timeout: timeout_secs
                .or(self.poll_timeout_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}
