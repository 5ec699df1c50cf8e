// File: src/alarms.rs
// Alarm data model for the Bosun critical alarm engine
//
// Alarm types, the escalation ladder, active occurrences and snooze records.
// The lifecycle that mutates these lives in `alarm_manager.rs`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest snooze any caller may request
pub const MAX_SNOOZE_MINUTES: i64 = 15;

/// Snooze ceiling as a [`Duration`]
pub fn max_snooze() -> Duration {
    Duration::minutes(MAX_SNOOZE_MINUTES)
}

// ==========================================
// SECTION 1: ALARM CLASSIFICATION
// ==========================================

/// Kind of condition an alarm reports
///
/// The five fixed variants are the safety-relevant critical alarm types.
/// Anything else is a user-defined comfort or informational alarm keyed by
/// its threshold id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlarmType {
    /// Depth below keel under the safe minimum
    ShallowWater,

    /// Engine coolant or exhaust temperature too high
    EngineOverheat,

    /// House or start battery depleted
    LowBattery,

    /// Autopilot heartbeat lost while engaged
    AutopilotFailure,

    /// No GPS fix update within the staleness timeout
    GpsLoss,

    /// User-defined threshold alarm
    Custom(String),
}

impl AlarmType {
    /// Every fixed critical alarm type
    pub const CRITICAL: [AlarmType; 5] = [
        AlarmType::ShallowWater,
        AlarmType::EngineOverheat,
        AlarmType::LowBattery,
        AlarmType::AutopilotFailure,
        AlarmType::GpsLoss,
    ];

    /// Stable string form (`shallow-water`, ..., or the custom id)
    pub fn as_str(&self) -> &str {
        match self {
            AlarmType::ShallowWater => "shallow-water",
            AlarmType::EngineOverheat => "engine-overheat",
            AlarmType::LowBattery => "low-battery",
            AlarmType::AutopilotFailure => "autopilot-failure",
            AlarmType::GpsLoss => "gps-loss",
            AlarmType::Custom(id) => id,
        }
    }

    /// Whether this is one of the safety-relevant fixed types
    pub fn is_critical(&self) -> bool {
        !matches!(self, AlarmType::Custom(_))
    }
}

impl From<String> for AlarmType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "shallow-water" => AlarmType::ShallowWater,
            "engine-overheat" => AlarmType::EngineOverheat,
            "low-battery" => AlarmType::LowBattery,
            "autopilot-failure" => AlarmType::AutopilotFailure,
            "gps-loss" => AlarmType::GpsLoss,
            _ => AlarmType::Custom(s),
        }
    }
}

impl From<&str> for AlarmType {
    fn from(s: &str) -> Self {
        AlarmType::from(s.to_string())
    }
}

impl From<AlarmType> for String {
    fn from(t: AlarmType) -> Self {
        match t {
            AlarmType::Custom(id) => id,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for AlarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity of an alarm occurrence
///
/// Comparisons always go through the derived ordering:
/// `Info < Warning < Caution < Critical < Emergency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    /// Informational, may auto-acknowledge
    Info,
    /// Attention required soon
    Warning,
    /// Condition developing toward critical
    Caution,
    /// Safety-relevant, never mutable or silently snoozable
    Critical,
    /// Immediate danger
    Emergency,
}

impl EscalationLevel {
    /// All levels in ascending severity
    pub const ALL: [EscalationLevel; 5] = [
        EscalationLevel::Info,
        EscalationLevel::Warning,
        EscalationLevel::Caution,
        EscalationLevel::Critical,
        EscalationLevel::Emergency,
    ];

    /// Critical or emergency
    pub fn is_critical_or_above(self) -> bool {
        self >= EscalationLevel::Critical
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationLevel::Info => "info",
            EscalationLevel::Warning => "warning",
            EscalationLevel::Caution => "caution",
            EscalationLevel::Critical => "critical",
            EscalationLevel::Emergency => "emergency",
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// SECTION 2: RUNTIME STATE
// ==========================================

/// Active audio suppression for one occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnoozeRecord {
    /// Alarm the snooze applies to
    pub alarm_id: String,

    /// Snooze end
    pub until: DateTime<Utc>,

    /// Operator supplied reason
    pub reason: String,

    /// Level at the moment the snooze was granted
    pub level: EscalationLevel,

    /// Whether the privileged critical override was used
    pub allow_critical: bool,
}

impl SnoozeRecord {
    /// Snooze still in force at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.until
    }
}

/// One trip of one alarm, from first crossing until the condition clears
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlarmOccurrence {
    /// Unique per trip
    pub occurrence_id: Uuid,

    /// Stable per threshold/metric (or monitor)
    pub alarm_id: String,

    /// Alarm classification
    pub alarm_type: AlarmType,

    /// Current severity, follows the value up and down
    pub escalation_level: EscalationLevel,

    /// Highest severity reached during this trip
    pub peak_level: EscalationLevel,

    /// First crossing
    pub triggered_at: DateTime<Utc>,

    /// First acknowledgement
    pub acknowledged_at: Option<DateTime<Utc>>,

    /// Who acknowledged
    pub acknowledged_by: Option<String>,

    /// Current snooze, if any
    pub snooze: Option<SnoozeRecord>,

    /// Snoozes granted during this trip
    pub snooze_count: u32,

    /// Latest reading (absent for synthetic alarms)
    pub value: Option<f64>,

    /// Trip point of the current level
    pub threshold_value: Option<f64>,

    /// Data path or monitor that produced the alarm
    pub source: String,

    /// Human-readable description
    pub message: String,
}

impl ActiveAlarmOccurrence {
    /// Start a new occurrence at `level`
    pub fn new(
        alarm_id: impl Into<String>,
        alarm_type: AlarmType,
        level: EscalationLevel,
        source: impl Into<String>,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            occurrence_id: Uuid::new_v4(),
            alarm_id: alarm_id.into(),
            alarm_type,
            escalation_level: level,
            peak_level: level,
            triggered_at,
            acknowledged_at: None,
            acknowledged_by: None,
            snooze: None,
            snooze_count: 0,
            value: None,
            threshold_value: None,
            source: source.into(),
            message: String::new(),
        }
    }

    /// Snooze in force at `now`
    pub fn is_snoozed_at(&self, now: DateTime<Utc>) -> bool {
        self.snooze.as_ref().map_or(false, |s| s.is_active_at(now))
    }

    /// Acknowledged at least once
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    /// Time from trigger to acknowledgement
    pub fn response_time(&self) -> Option<Duration> {
        self.acknowledged_at.map(|at| at - self.triggered_at)
    }

    /// Move to `level`, keeping `peak_level` monotonic
    pub fn set_level(&mut self, level: EscalationLevel) {
        self.escalation_level = level;
        if level > self.peak_level {
            self.peak_level = level;
        }
    }
}
