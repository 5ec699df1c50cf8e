// src/health.rs - Derived system health view

use crate::alarms::ActiveAlarmOccurrence;
use crate::profiles::ConfigurationProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const WARN_NO_THRESHOLDS: &str = "No alarm thresholds configured";
pub const WARN_ALERTS_DISABLED: &str = "All alert methods disabled";
pub const WARN_THRESHOLDS_DISABLED: &str = "All alarm thresholds disabled";

/// Health status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Snapshot returned by `get_system_health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub version: String,
    pub profile_count: usize,
    pub current_profile_id: String,
    pub history_size: usize,
    pub active_alarms: usize,
    pub active_snoozes: usize,
    /// Active occurrences at critical or emergency
    pub critical_alarms: usize,
    pub warnings: Vec<String>,
}

/// Inputs gathered by the engine
#[derive(Debug)]
pub struct HealthInputs<'a> {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub profile_count: usize,
    pub current_profile: &'a ConfigurationProfile,
    pub history_size: usize,
    pub active_alarms: &'a [ActiveAlarmOccurrence],
    pub active_snoozes: usize,
}

impl SystemHealth {
    /// Derive the health view
    ///
    /// A profile without any usable threshold leaves the vessel unprotected
    /// and is unhealthy; disabled alert methods only degrade.
    pub fn assess(inputs: HealthInputs<'_>) -> Self {
        let profile = inputs.current_profile;
        let mut warnings = Vec::new();
        let mut status = Status::Healthy;

        if profile.thresholds.is_empty() {
            warnings.push(WARN_NO_THRESHOLDS.to_string());
            status = Status::Unhealthy;
        } else if profile.enabled_thresholds().next().is_none() {
            warnings.push(WARN_THRESHOLDS_DISABLED.to_string());
            status = Status::Unhealthy;
        }
        if profile.settings.all_alerts_disabled() {
            warnings.push(WARN_ALERTS_DISABLED.to_string());
            status = status.max(Status::Degraded);
        }

        Self {
            status,
            timestamp: inputs.timestamp,
            uptime_seconds: inputs.uptime_seconds,
            version: crate::VERSION.to_string(),
            profile_count: inputs.profile_count,
            current_profile_id: profile.id.clone(),
            history_size: inputs.history_size,
            active_alarms: inputs.active_alarms.len(),
            active_snoozes: inputs.active_snoozes,
            critical_alarms: inputs
                .active_alarms
                .iter()
                .filter(|occ| occ.escalation_level.is_critical_or_above())
                .count(),
            warnings,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == Status::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ProfileSettings;
    use crate::thresholds::ThresholdRegistry;

    fn assess(profile: &ConfigurationProfile) -> SystemHealth {
        SystemHealth::assess(HealthInputs {
            timestamp: Utc::now(),
            uptime_seconds: 1,
            profile_count: 1,
            current_profile: profile,
            history_size: 0,
            active_alarms: &[],
            active_snoozes: 0,
        })
    }

    #[test]
    fn test_default_profile_is_healthy() {
        let profile = ConfigurationProfile::system_default(&ThresholdRegistry::default(), Utc::now());
        let health = assess(&profile);
        assert!(health.is_healthy());
        assert!(health.warnings.is_empty());
    }

    #[test]
    fn test_warnings() {
        let mut profile = ConfigurationProfile::system_default(&ThresholdRegistry::default(), Utc::now());
        profile.settings = ProfileSettings {
            sound_enabled: false,
            vibration_enabled: false,
            ..Default::default()
        };
        for t in profile.thresholds.iter_mut() {
            t.enabled = false;
        }
        let health = assess(&profile);
        assert_eq!(health.status, Status::Unhealthy);
        assert_eq!(health.warnings, vec![WARN_THRESHOLDS_DISABLED, WARN_ALERTS_DISABLED]);

        profile.thresholds.clear();
        assert_eq!(assess(&profile).warnings[0], WARN_NO_THRESHOLDS);
    }
}
