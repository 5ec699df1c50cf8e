// src/config.rs - Engine configuration loaded from YAML

use crate::error::{BosunError, Result};
use crate::thresholds::InstallationContext;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main Bosun configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scan loop period in milliseconds
    #[serde(default = "default_scan_time")]
    pub scan_time_ms: u64,

    /// Reading-to-audio budget for critical alarms
    #[serde(default = "default_response_budget")]
    pub response_budget_ms: u64,

    /// Alarm history ledger
    #[serde(default)]
    pub history: HistorySettings,

    /// GPS and autopilot watchers
    #[serde(default)]
    pub monitors: MonitorSettings,

    /// Vessel context that selects default thresholds
    #[serde(default)]
    pub installation: InstallationContext,

    /// Durable state
    #[serde(default)]
    pub persistence: PersistenceSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_time_ms: default_scan_time(),
            response_budget_ms: default_response_budget(),
            history: HistorySettings::default(),
            monitors: MonitorSettings::default(),
            installation: InstallationContext::default(),
            persistence: PersistenceSettings::default(),
        }
    }
}

impl Config {
    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BosunError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse and validate YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_time_ms == 0 {
            return Err(BosunError::Config("scan_time_ms must be greater than 0".into()));
        }
        if self.response_budget_ms == 0 {
            return Err(BosunError::Config("response_budget_ms must be greater than 0".into()));
        }
        if self.history.capacity == 0 {
            return Err(BosunError::Config("history.capacity must be greater than 0".into()));
        }
        if self.history.persist_limit > self.history.capacity {
            return Err(BosunError::Config(format!(
                "history.persist_limit ({}) exceeds history.capacity ({})",
                self.history.persist_limit, self.history.capacity
            )));
        }
        self.monitors.validate()
    }

    pub fn scan_time(&self) -> Duration {
        Duration::from_millis(self.scan_time_ms)
    }

    pub fn response_budget(&self) -> Duration {
        Duration::from_millis(self.response_budget_ms)
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Alarm history sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Entries kept in memory
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,

    /// Newest entries written to durable state
    #[serde(default = "default_persist_limit")]
    pub persist_limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            persist_limit: default_persist_limit(),
        }
    }
}

/// Condition monitor timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// No GPS fix for this long raises `gps-loss`
    #[serde(default = "default_gps_timeout")]
    pub gps_timeout_ms: u64,

    /// No heartbeat for this long while engaged raises `autopilot-failure`
    #[serde(default = "default_autopilot_timeout")]
    pub autopilot_timeout_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            gps_timeout_ms: default_gps_timeout(),
            autopilot_timeout_ms: default_autopilot_timeout(),
        }
    }
}

impl MonitorSettings {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(BosunError::Config("monitors.poll_interval_ms must be greater than 0".into()));
        }
        if self.gps_timeout_ms < self.poll_interval_ms || self.autopilot_timeout_ms < self.poll_interval_ms {
            return Err(BosunError::Config("monitor timeouts must not be shorter than the poll interval".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn gps_timeout(&self) -> Duration {
        Duration::from_millis(self.gps_timeout_ms)
    }

    pub fn autopilot_timeout(&self) -> Duration {
        Duration::from_millis(self.autopilot_timeout_ms)
    }
}

/// Where and when state is saved
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// State file; in-memory only when absent
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Save after every profile write
    #[serde(default)]
    pub autosave: bool,
}

// ============================================================================
// DEFAULT VALUE FUNCTIONS
// ============================================================================

fn default_scan_time() -> u64 { 250 }
fn default_response_budget() -> u64 { 500 }
fn default_history_capacity() -> usize { 1000 }
fn default_persist_limit() -> usize { 500 }
fn default_poll_interval() -> u64 { 5_000 }
fn default_gps_timeout() -> u64 { 60_000 }
fn default_autopilot_timeout() -> u64 { 10_000 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{BatteryChemistry, TemperatureLocation};
    use std::io::Write;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.response_budget_ms, 500);
        assert_eq!(config.history.capacity, 1000);
        assert_eq!(config.monitors.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.monitors.gps_timeout(), Duration::from_secs(60));
        assert!(config.persistence.path.is_none());
    }

    #[test]
    fn test_installation_section() {
        let yaml = r#"
installation:
  battery_chemistry: lifepo4
  temperature_location: refrigerator
history:
  capacity: 200
  persist_limit: 50
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.installation.battery_chemistry, BatteryChemistry::Lifepo4);
        assert_eq!(config.installation.temperature_location, TemperatureLocation::Refrigerator);
        assert_eq!(config.history.persist_limit, 50);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(Config::from_yaml("scan_time_ms: 0"), Err(BosunError::Config(_))));
        assert!(Config::from_yaml("history: {capacity: 10, persist_limit: 20}").is_err());
        assert!(Config::from_yaml("monitors: {poll_interval_ms: 5000, gps_timeout_ms: 100}").is_err());
        assert!(matches!(Config::from_yaml("scan_time_ms: [1"), Err(BosunError::Yaml(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "response_budget_ms: 250").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.response_budget(), Duration::from_millis(250));

        assert!(Config::from_file("/nonexistent/bosun.yaml").is_err());
    }
}
