//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Shared primitives and utilities for the component runtime."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;
use crate::time::UtcTimestamp;

/// Environment variables recognised by [`ComponentConfig`]. The names match
/// the ones the simulation manager exports for every started component.
pub const ENV_SIMULATION_ID: &str = "SIMULATION_ID";
pub const ENV_COMPONENT_NAME: &str = "SIMULATION_COMPONENT_NAME";
pub const ENV_STATE_TOPIC: &str = "SIMULATION_STATE_MESSAGE_TOPIC";
pub const ENV_EPOCH_TOPIC: &str = "SIMULATION_EPOCH_MESSAGE_TOPIC";
pub const ENV_STATUS_TOPIC: &str = "SIMULATION_STATUS_MESSAGE_TOPIC";
pub const ENV_ERROR_TOPIC: &str = "SIMULATION_ERROR_MESSAGE_TOPIC";
pub const ENV_OTHER_TOPICS: &str = "SIMULATION_OTHER_TOPICS";

fn default_component_name() -> String {
    "component".to_owned()
}

fn default_state_topic() -> String {
    "SimState".to_owned()
}

fn default_epoch_topic() -> String {
    "Epoch".to_owned()
}

fn default_status_topic() -> String {
    "Status.Ready".to_owned()
}

fn default_error_topic() -> String {
    "Status.Error".to_owned()
}

fn default_start_message_id() -> u64 {
    1
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Topic names a component publishes to and listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Simulation state broadcasts from the simulation manager.
    #[serde(default = "default_state_topic")]
    pub state: String,
    /// Epoch messages from the simulation manager.
    #[serde(default = "default_epoch_topic")]
    pub epoch: String,
    /// Outbound ready-status messages.
    #[serde(default = "default_status_topic")]
    pub status: String,
    /// Outbound error messages.
    #[serde(default = "default_error_topic")]
    pub error: String,
    /// Additional topics the component wants delivered to its listener.
    #[serde(default)]
    pub other: Vec<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            state: default_state_topic(),
            epoch: default_epoch_topic(),
            status: default_status_topic(),
            error: default_error_topic(),
            other: Vec::new(),
        }
    }
}

/// Logging destination and format selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: default_log_format(),
        }
    }
}

/// Primary configuration object for a simulation component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Identifier of the simulation run, a timestamp-shaped string.
    pub simulation_id: String,
    #[serde(default = "default_component_name")]
    pub component_name: String,
    #[serde(default)]
    pub topics: TopicConfig,
    /// First number used for generated message ids.
    #[serde(default = "default_start_message_id")]
    pub start_message_id: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ComponentConfig {
    pub const ENV_CONFIG_PATH: &'static str = "C_SIM_CONFIG";

    /// Load configuration from disk, respecting the `C_SIM_CONFIG` override,
    /// then apply environment-variable overrides on top.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let mut config = Self::from_path(PathBuf::from(env_path))?;
                config.apply_env_overrides();
                config.validate()?;
                return Ok(config);
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let mut config = Self::from_path(candidate.as_ref().to_path_buf())?;
                config.apply_env_overrides();
                config.validate()?;
                return Ok(config);
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Build configuration purely from environment variables. Requires
    /// `SIMULATION_ID` to be set; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let simulation_id = std::env::var(ENV_SIMULATION_ID)
            .with_context(|| format!("{} environment variable is not set", ENV_SIMULATION_ID))?;
        let mut config = Self {
            simulation_id,
            component_name: default_component_name(),
            topics: TopicConfig::default(),
            start_message_id: default_start_message_id(),
            logging: LoggingConfig::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<ComponentConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 6] = [
            (ENV_SIMULATION_ID, &mut self.simulation_id),
            (ENV_COMPONENT_NAME, &mut self.component_name),
            (ENV_STATE_TOPIC, &mut self.topics.state),
            (ENV_EPOCH_TOPIC, &mut self.topics.epoch),
            (ENV_STATUS_TOPIC, &mut self.topics.status),
            (ENV_ERROR_TOPIC, &mut self.topics.error),
        ];
        for (variable, target) in overrides {
            if let Ok(value) = std::env::var(variable) {
                if !value.trim().is_empty() {
                    *target = value;
                }
            }
        }
        if let Ok(value) = std::env::var(ENV_OTHER_TOPICS) {
            if !value.trim().is_empty() {
                self.topics.other = value
                    .split(',')
                    .map(|topic| topic.trim().to_owned())
                    .filter(|topic| !topic.is_empty())
                    .collect();
            }
        }
    }

    /// Check the invariants the rest of the toolkit relies on.
    pub fn validate(&self) -> Result<()> {
        UtcTimestamp::parse(&self.simulation_id)
            .map_err(|err| anyhow!("invalid simulation_id: {err}"))?;
        if self.component_name.trim().is_empty() {
            return Err(anyhow!("component_name must not be empty"));
        }
        for (label, topic) in [
            ("state", &self.topics.state),
            ("epoch", &self.topics.epoch),
            ("status", &self.topics.status),
            ("error", &self.topics.error),
        ] {
            if topic.trim().is_empty() {
                return Err(anyhow!("{label} topic must not be empty"));
            }
        }
        Ok(())
    }
}
