//! datalens configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::DetectorConfig;

/// Main datalens configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Supervisor control channel
    pub control: ControlConfig,

    /// Background task limits
    pub tasks: TasksConfig,

    /// Viewer notification fan-out
    pub bus: BusConfig,

    /// Issue analysis
    pub analysis: AnalysisConfig,

    /// Default log level when none is given on the command line
    #[serde(rename = "log-level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            tasks: TasksConfig::default(),
            bus: BusConfig::default(),
            analysis: AnalysisConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .datalens.yml
        let local_config = PathBuf::from(".datalens.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/datalens/datalens.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("datalens").join("datalens.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::debug!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Supervisor control channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Host the supervisor listens on
    pub host: String,

    /// Environment variable holding the supervisor port
    #[serde(rename = "port-env")]
    pub port_env: String,

    /// Environment variable holding the shared secret
    #[serde(rename = "authkey-env")]
    pub authkey_env: String,

    /// Connection attempts before giving up
    #[serde(rename = "connect-attempts")]
    pub connect_attempts: u32,

    /// Pause between connection attempts in milliseconds
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_env: "CONNECTION_PORT".to_string(),
            authkey_env: "CONNECTION_AUTHKEY".to_string(),
            connect_attempts: 10,
            retry_backoff_ms: 100,
        }
    }
}

impl ControlConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Background task limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Maximum concurrently running tasks
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// How long shutdown waits for running tasks, in milliseconds
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl TasksConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Viewer notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages buffered per viewer before it is dropped
    #[serde(rename = "session-buffer")]
    pub session_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { session_buffer: 64 }
    }
}

/// Issue analysis settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Parent directory for per-column image scratch space
    #[serde(rename = "scratch-dir")]
    pub scratch_dir: Option<PathBuf>,

    /// Image detector thresholds
    pub detector: DetectorConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.control.host, "127.0.0.1");
        assert_eq!(config.control.port_env, "CONNECTION_PORT");
        assert_eq!(config.control.authkey_env, "CONNECTION_AUTHKEY");
        assert_eq!(config.control.connect_attempts, 10);
        assert_eq!(config.control.retry_backoff(), Duration::from_millis(100));
        assert_eq!(config.tasks.max_concurrent, 2);
        assert_eq!(config.bus.session_buffer, 64);
        assert_eq!(config.log_level, "info");
        assert!(config.analysis.scratch_dir.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
control:
  host: 127.0.0.1
  port-env: MY_PORT
  authkey-env: MY_KEY
  connect-attempts: 3
  retry-backoff-ms: 250

tasks:
  max-concurrent: 4
  shutdown-timeout-ms: 1000

bus:
  session-buffer: 8

analysis:
  scratch-dir: /tmp/datalens
  detector:
    blurry-threshold: 12.5
    near-duplicate-distance: 2

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.control.port_env, "MY_PORT");
        assert_eq!(config.control.authkey_env, "MY_KEY");
        assert_eq!(config.control.connect_attempts, 3);
        assert_eq!(config.control.retry_backoff_ms, 250);
        assert_eq!(config.tasks.max_concurrent, 4);
        assert_eq!(config.tasks.shutdown_timeout(), Duration::from_secs(1));
        assert_eq!(config.bus.session_buffer, 8);
        assert_eq!(config.analysis.scratch_dir, Some(PathBuf::from("/tmp/datalens")));
        assert_eq!(config.analysis.detector.blurry_threshold, 12.5);
        assert_eq!(config.analysis.detector.near_duplicate_distance, 2);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
tasks:
  max-concurrent: 8
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.tasks.max_concurrent, 8);

        // Defaults for unspecified
        assert_eq!(config.tasks.shutdown_timeout_ms, 5_000);
        assert_eq!(config.control.connect_attempts, 10);
        assert_eq!(config.analysis.detector, DetectorConfig::default());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datalens.yml");
        fs::write(&path, "bus:\n  session-buffer: 3\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bus.session_buffer, 3);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_invalid_yaml_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.yml");
        fs::write(&path, "tasks: [not, a, map]\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
