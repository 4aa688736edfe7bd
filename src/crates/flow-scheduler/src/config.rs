//! Scheduler configuration: loaded once at startup from TOML, and reloaded
//! uncached (never memoized) on each auto-restart-planner tick since the
//! condemned-host list can change between runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadError { path: PathBuf, source: std::io::Error },
    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    pub inactivity_secs: f64,
    pub workflow_secs: f64,
    pub stall_secs: f64,
    pub restart_secs: f64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: 3600.0,
            workflow_secs: 0.0,
            stall_secs: 0.0,
            restart_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortEvent {
    Stall,
    StallTimeout,
    InactivityTimeout,
    WorkflowTimeout,
    RestartTimeout,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Which timer/condition events should be promoted to a fatal abort
    /// rather than merely logged.
    #[serde(default)]
    pub abort_on: Vec<AbortEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoRestartConfig {
    /// Hostnames this workflow must not keep running on; trailing `!`
    /// means force-stop with no migration attempt.
    #[serde(default)]
    pub condemned: Vec<String>,
    /// Hosts eligible to receive a migrated workflow.
    #[serde(default)]
    pub candidate_hosts: Vec<String>,
    #[serde(default)]
    pub delay_max_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphWindowConfig {
    pub n_edge_distance: u32,
}

impl Default for GraphWindowConfig {
    fn default() -> Self {
        Self { n_edge_distance: 1 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub auto_restart: AutoRestartConfig,
    #[serde(default)]
    pub graph_window: GraphWindowConfig,
}

impl SchedulerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SchedulerConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SchedulerConfig = toml::from_str(&contents)?;
        if config.owner.is_empty() || config.name.is_empty() {
            return Err(SchedulerConfigError::InvalidConfig(
                "owner and name must both be set".to_string(),
            ));
        }
        Ok(config)
    }

    /// Load order: `CONFIG_PATH` env var, then `config/flow-scheduler.toml`,
    /// then `./flow-scheduler.toml`. Called fresh (never cached) wherever
    /// the auto-restart planner needs the current condemned-host list.
    pub fn load() -> Result<Self, SchedulerConfigError> {
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            return Self::from_file(config_path);
        }

        let candidates = [
            PathBuf::from("config/flow-scheduler.toml"),
            PathBuf::from("./flow-scheduler.toml"),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::from_file(path);
            }
        }

        Err(SchedulerConfigError::InvalidConfig(
            "configuration file not found; set CONFIG_PATH or place flow-scheduler.toml in config/".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
owner = "alice"
name = "daily-pipeline"
"#;
        let dir = std::env::temp_dir().join("flow-scheduler-config-test-minimal.toml");
        std::fs::write(&dir, toml).unwrap();
        let cfg = SchedulerConfig::from_file(&dir).unwrap();
        assert_eq!(cfg.owner, "alice");
        assert_eq!(cfg.graph_window.n_edge_distance, 1);
        std::fs::remove_file(&dir).ok();
    }

    #[test]
    fn rejects_missing_name() {
        let toml = r#"
owner = "alice"
name = ""
"#;
        let dir = std::env::temp_dir().join("flow-scheduler-config-test-missing.toml");
        std::fs::write(&dir, toml).unwrap();
        let err = SchedulerConfig::from_file(&dir).unwrap_err();
        assert!(matches!(err, SchedulerConfigError::InvalidConfig(_)));
        std::fs::remove_file(&dir).ok();
    }

    #[test]
    fn parses_condemned_host_list_with_force_marker() {
        let toml = r#"
owner = "alice"
name = "daily-pipeline"

[auto_restart]
condemned = ["host-a!", "host-b"]
candidate_hosts = ["host-c"]
"#;
        let dir = std::env::temp_dir().join("flow-scheduler-config-test-condemned.toml");
        std::fs::write(&dir, toml).unwrap();
        let cfg = SchedulerConfig::from_file(&dir).unwrap();
        assert_eq!(cfg.auto_restart.condemned, vec!["host-a!", "host-b"]);
        std::fs::remove_file(&dir).ok();
    }
}
