//! Threshold definitions and the contextual default registry.
//!
//! A [`Threshold`] is one numeric alarm rule over a dotted data path. Sensors
//! with several metrics (battery, engine) carry a map of metric key to
//! threshold, which [`SensorAlarmConfig`] models as a tagged variant so the
//! evaluator can consume every sensor the same way.
//!
//! Default trip points depend on the installation: battery chemistry changes
//! the voltage floor, engine type changes the coolant ceiling, and the
//! location of a temperature probe changes what "too warm" means.

use crate::alarms::{AlarmType, EscalationLevel};
use crate::error::{BosunError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Threshold primitives
// =============================================================================

/// Side of the trip point that counts as alarming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Alarm when the value rises past the trip point
    Above,
    /// Alarm when the value falls past the trip point
    Below,
}

impl Direction {
    /// `value` is strictly past `trip` on the alarming side
    pub fn is_past(self, value: f64, trip: f64) -> bool {
        match self {
            Direction::Above => value > trip,
            Direction::Below => value < trip,
        }
    }

    /// `a` is strictly more severe than `b` in this direction
    pub fn is_more_severe(self, a: f64, b: f64) -> bool {
        self.is_past(a, b)
    }

    /// Trip point shifted by `band` toward the safe side
    pub fn recovery_point(self, trip: f64, band: f64) -> f64 {
        match self {
            Direction::Above => trip - band,
            Direction::Below => trip + band,
        }
    }
}

/// Audible pattern for a severity band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundPattern {
    None,
    Intermittent,
    Warble,
    RapidPulse,
    TripleBlast,
    Continuous,
    MorseU,
}

/// Sound pattern per severity band of a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundPatterns {
    #[serde(default = "default_warning_pattern")]
    pub warning: SoundPattern,
    #[serde(default = "default_critical_pattern")]
    pub critical: SoundPattern,
    #[serde(default = "default_emergency_pattern")]
    pub emergency: SoundPattern,
}

impl Default for SoundPatterns {
    fn default() -> Self {
        Self {
            warning: default_warning_pattern(),
            critical: default_critical_pattern(),
            emergency: default_emergency_pattern(),
        }
    }
}

impl SoundPatterns {
    /// Pattern to play at `level`
    pub fn for_level(&self, level: EscalationLevel) -> SoundPattern {
        match level {
            EscalationLevel::Info => SoundPattern::None,
            EscalationLevel::Warning | EscalationLevel::Caution => self.warning,
            EscalationLevel::Critical => self.critical,
            EscalationLevel::Emergency => self.emergency,
        }
    }
}

fn default_warning_pattern() -> SoundPattern { SoundPattern::Intermittent }
fn default_critical_pattern() -> SoundPattern { SoundPattern::RapidPulse }
fn default_emergency_pattern() -> SoundPattern { SoundPattern::Continuous }
fn default_true() -> bool { true }

/// One numeric alarm rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Unique per profile, doubles as the alarm id
    pub id: String,

    /// Alarm raised when this threshold trips
    pub alarm_type: AlarmType,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Dotted field locator in the sensor snapshot (e.g. `engine.coolantTemp`)
    pub data_path: String,

    /// Alarming side
    pub direction: Direction,

    /// Critical trip point
    pub value: f64,

    /// Less severe trip point on the same side
    #[serde(default)]
    pub warning_value: Option<f64>,

    /// More severe trip point on the same side
    #[serde(default)]
    pub emergency_value: Option<f64>,

    /// Recovery band a value must cross back through before a level clears
    #[serde(default)]
    pub hysteresis: f64,

    /// Disabled thresholds are never evaluated
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sound per severity band
    #[serde(default)]
    pub sound_patterns: SoundPatterns,

    /// Engineering units
    #[serde(default)]
    pub units: Option<String>,
}

impl Threshold {
    /// Build an enabled threshold with no warning band
    pub fn new(
        id: impl Into<String>,
        alarm_type: AlarmType,
        data_path: impl Into<String>,
        direction: Direction,
        value: f64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            alarm_type,
            data_path: data_path.into(),
            direction,
            value,
            warning_value: None,
            emergency_value: None,
            hysteresis: 0.0,
            enabled: true,
            sound_patterns: SoundPatterns::default(),
            units: None,
        }
    }

    /// Set the warning trip point
    pub fn with_warning(mut self, warning: f64) -> Self {
        self.warning_value = Some(warning);
        self
    }

    /// Set the emergency trip point
    pub fn with_emergency(mut self, emergency: f64) -> Self {
        self.emergency_value = Some(emergency);
        self
    }

    /// Set the recovery band
    pub fn with_hysteresis(mut self, hysteresis: f64) -> Self {
        self.hysteresis = hysteresis;
        self
    }

    /// Set the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set engineering units
    pub fn in_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Trip points in ascending severity
    pub fn trip_points(&self) -> Vec<(EscalationLevel, f64)> {
        let mut points = Vec::with_capacity(3);
        if let Some(w) = self.warning_value {
            points.push((EscalationLevel::Warning, w));
        }
        points.push((EscalationLevel::Critical, self.value));
        if let Some(e) = self.emergency_value {
            points.push((EscalationLevel::Emergency, e));
        }
        points
    }

    /// Trip point that defines `level`, if the threshold has one
    pub fn trip_point(&self, level: EscalationLevel) -> Option<f64> {
        self.trip_points()
            .into_iter()
            .find(|(l, _)| *l == level)
            .map(|(_, v)| v)
    }

    /// Check structural and ordering invariants
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BosunError::Validation("threshold id must not be empty".into()));
        }
        if self.data_path.trim().is_empty() {
            return Err(BosunError::Validation(format!(
                "threshold '{}' has an empty data path",
                self.id
            )));
        }

        let numbers = [Some(self.value), self.warning_value, self.emergency_value, Some(self.hysteresis)];
        if numbers.iter().flatten().any(|v| !v.is_finite()) {
            return Err(BosunError::Validation(format!(
                "threshold '{}' contains a non-finite value",
                self.id
            )));
        }
        if self.hysteresis < 0.0 {
            return Err(BosunError::Validation(format!(
                "threshold '{}' hysteresis must not be negative",
                self.id
            )));
        }

        if let Some(warning) = self.warning_value {
            if !self.direction.is_more_severe(self.value, warning) {
                let relation = match self.direction {
                    Direction::Above => "below",
                    Direction::Below => "above",
                };
                return Err(BosunError::Validation(format!(
                    "threshold '{}': warning value {} must be {} critical value {}",
                    self.id, warning, relation, self.value
                )));
            }
        }
        if let Some(emergency) = self.emergency_value {
            if !self.direction.is_more_severe(emergency, self.value) {
                return Err(BosunError::Validation(format!(
                    "threshold '{}': emergency value {} must be more severe than critical value {}",
                    self.id, emergency, self.value
                )));
            }
        }
        Ok(())
    }
}

/// Validate a threshold list, including id uniqueness
pub fn validate_thresholds(thresholds: &[Threshold]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for threshold in thresholds {
        threshold.validate()?;
        if !seen.insert(threshold.id.as_str()) {
            return Err(BosunError::Validation(format!(
                "duplicate threshold id '{}'",
                threshold.id
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Per-sensor alarm configuration
// =============================================================================

/// Alarm rules attached to one sensor type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorAlarmConfig {
    /// Several metrics, each with its own threshold
    MultiMetric { metrics: BTreeMap<String, Threshold> },
    /// A single threshold
    SingleMetric { threshold: Threshold },
    /// Sensor without numeric alarms (handled by monitors or not at all)
    None,
}

impl SensorAlarmConfig {
    /// Every threshold in this config, in metric-key order
    pub fn thresholds(&self) -> Vec<&Threshold> {
        match self {
            SensorAlarmConfig::MultiMetric { metrics } => metrics.values().collect(),
            SensorAlarmConfig::SingleMetric { threshold } => vec![threshold],
            SensorAlarmConfig::None => Vec::new(),
        }
    }

    /// Threshold for `metric` (single-metric configs answer any key)
    pub fn metric(&self, metric: &str) -> Option<&Threshold> {
        match self {
            SensorAlarmConfig::MultiMetric { metrics } => metrics.get(metric),
            SensorAlarmConfig::SingleMetric { threshold } => Some(threshold),
            SensorAlarmConfig::None => None,
        }
    }
}

// =============================================================================
// Installation context
// =============================================================================

/// House battery chemistry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryChemistry {
    #[default]
    LeadAcid,
    Agm,
    Gel,
    Lifepo4,
    LithiumIon,
}

/// Propulsion engine type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    #[default]
    Diesel,
    Gasoline,
    Outboard,
}

/// Where a temperature probe is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureLocation {
    #[default]
    EngineRoom,
    Cabin,
    Refrigerator,
    Freezer,
    Seawater,
}

/// Environmental context that selects default trip points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstallationContext {
    #[serde(default)]
    pub battery_chemistry: BatteryChemistry,
    #[serde(default)]
    pub engine_type: EngineType,
    #[serde(default)]
    pub temperature_location: TemperatureLocation,
}

/// Sensor families the registry knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Depth,
    Battery,
    Engine,
    Temperature,
    Wind,
    Gps,
    Autopilot,
}

impl SensorType {
    /// All sensor families in registry order
    pub const ALL: [SensorType; 7] = [
        SensorType::Depth,
        SensorType::Battery,
        SensorType::Engine,
        SensorType::Temperature,
        SensorType::Wind,
        SensorType::Gps,
        SensorType::Autopilot,
    ];
}

// =============================================================================
// Registry
// =============================================================================

/// Static, context-dependent default thresholds
///
/// Pure lookup: the registry holds no state beyond the context it was built
/// for.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdRegistry {
    context: InstallationContext,
}

impl ThresholdRegistry {
    /// Registry for one installation
    pub fn new(context: InstallationContext) -> Self {
        Self { context }
    }

    /// Context the defaults are computed for
    pub fn context(&self) -> InstallationContext {
        self.context
    }

    /// Default alarm config for a sensor family
    pub fn sensor_config(&self, sensor: SensorType) -> SensorAlarmConfig {
        match sensor {
            SensorType::Depth => SensorAlarmConfig::SingleMetric {
                threshold: Threshold::new("depth", AlarmType::ShallowWater, "depth", Direction::Below, 2.0)
                    .with_warning(3.0)
                    .with_emergency(1.0)
                    .with_hysteresis(0.2)
                    .named("Shallow water")
                    .in_units("m"),
            },
            SensorType::Battery => self.battery_config(),
            SensorType::Engine => self.engine_config(),
            SensorType::Temperature => self.temperature_config(),
            SensorType::Wind => SensorAlarmConfig::SingleMetric {
                threshold: Threshold::new(
                    "wind.trueSpeed",
                    AlarmType::Custom("high-wind".into()),
                    "wind.trueSpeed",
                    Direction::Above,
                    35.0,
                )
                .with_warning(25.0)
                .with_hysteresis(2.0)
                .named("High wind")
                .in_units("kn"),
            },
            // Absence-of-data conditions, handled by the condition monitors
            SensorType::Gps | SensorType::Autopilot => SensorAlarmConfig::None,
        }
    }

    /// Every default threshold, flattened in sensor order
    pub fn default_thresholds(&self) -> Vec<Threshold> {
        SensorType::ALL
            .iter()
            .flat_map(|sensor| {
                self.sensor_config(*sensor)
                    .thresholds()
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Default threshold for `sensor` and `metric`
    pub fn lookup(&self, sensor: SensorType, metric: &str) -> Option<Threshold> {
        self.sensor_config(sensor).metric(metric).cloned()
    }

    fn battery_config(&self) -> SensorAlarmConfig {
        // (critical, warning) resting voltage floor for a 12 V bank
        let (critical, warning) = match self.context.battery_chemistry {
            BatteryChemistry::LeadAcid => (11.8, 12.2),
            BatteryChemistry::Agm | BatteryChemistry::Gel => (11.9, 12.3),
            BatteryChemistry::Lifepo4 => (12.0, 12.8),
            BatteryChemistry::LithiumIon => (11.5, 12.0),
        };

        let mut metrics = BTreeMap::new();
        metrics.insert(
            "voltage".to_string(),
            Threshold::new("battery.voltage", AlarmType::LowBattery, "electrical.batteryVoltage", Direction::Below, critical)
                .with_warning(warning)
                .with_hysteresis(0.1)
                .named("Battery voltage")
                .in_units("V"),
        );
        metrics.insert(
            "stateOfCharge".to_string(),
            Threshold::new("battery.stateOfCharge", AlarmType::LowBattery, "electrical.stateOfCharge", Direction::Below, 20.0)
                .with_warning(50.0)
                .with_hysteresis(2.0)
                .named("Battery state of charge")
                .in_units("%"),
        );
        let temp_limit = match self.context.battery_chemistry {
            BatteryChemistry::Lifepo4 | BatteryChemistry::LithiumIon => 55.0,
            _ => 50.0,
        };
        metrics.insert(
            "temperature".to_string(),
            Threshold::new(
                "battery.temperature",
                AlarmType::Custom("battery-temperature".into()),
                "electrical.batteryTemperature",
                Direction::Above,
                temp_limit,
            )
            .with_warning(temp_limit - 5.0)
            .with_hysteresis(1.0)
            .named("Battery temperature")
            .in_units("°C"),
        );
        SensorAlarmConfig::MultiMetric { metrics }
    }

    fn engine_config(&self) -> SensorAlarmConfig {
        // (coolant critical, coolant warning, oil critical, oil warning)
        let (coolant_crit, coolant_warn, oil_crit, oil_warn) = match self.context.engine_type {
            EngineType::Diesel => (95.0, 90.0, 100.0, 150.0),
            EngineType::Gasoline => (90.0, 85.0, 70.0, 100.0),
            EngineType::Outboard => (85.0, 80.0, 50.0, 80.0),
        };

        let mut metrics = BTreeMap::new();
        metrics.insert(
            "coolantTemp".to_string(),
            Threshold::new("engine.coolantTemp", AlarmType::EngineOverheat, "engine.coolantTemp", Direction::Above, coolant_crit)
                .with_warning(coolant_warn)
                .with_emergency(coolant_crit + 10.0)
                .with_hysteresis(2.0)
                .named("Coolant temperature")
                .in_units("°C"),
        );
        metrics.insert(
            "oilPressure".to_string(),
            Threshold::new(
                "engine.oilPressure",
                AlarmType::Custom("low-oil-pressure".into()),
                "engine.oilPressure",
                Direction::Below,
                oil_crit,
            )
            .with_warning(oil_warn)
            .with_hysteresis(10.0)
            .named("Oil pressure")
            .in_units("kPa"),
        );
        metrics.insert(
            "alternatorVoltage".to_string(),
            Threshold::new(
                "engine.alternatorVoltage",
                AlarmType::Custom("alternator-voltage".into()),
                "engine.alternatorVoltage",
                Direction::Below,
                12.5,
            )
            .with_warning(13.2)
            .with_hysteresis(0.1)
            .named("Alternator voltage")
            .in_units("V"),
        );
        SensorAlarmConfig::MultiMetric { metrics }
    }

    fn temperature_config(&self) -> SensorAlarmConfig {
        let threshold = match self.context.temperature_location {
            TemperatureLocation::EngineRoom => {
                Threshold::new("temperature.engineRoom", AlarmType::Custom("engine-room-temperature".into()), "environment.engineRoomTemp", Direction::Above, 60.0)
                    .with_warning(50.0)
                    .with_hysteresis(2.0)
            }
            TemperatureLocation::Cabin => {
                Threshold::new("temperature.cabin", AlarmType::Custom("cabin-temperature".into()), "environment.cabinTemp", Direction::Above, 35.0)
                    .with_warning(30.0)
                    .with_hysteresis(1.0)
            }
            TemperatureLocation::Refrigerator => {
                Threshold::new("temperature.refrigerator", AlarmType::Custom("refrigerator-temperature".into()), "environment.refrigeratorTemp", Direction::Above, 8.0)
                    .with_warning(5.0)
                    .with_hysteresis(0.5)
            }
            TemperatureLocation::Freezer => {
                Threshold::new("temperature.freezer", AlarmType::Custom("freezer-temperature".into()), "environment.freezerTemp", Direction::Above, -10.0)
                    .with_warning(-15.0)
                    .with_hysteresis(0.5)
            }
            TemperatureLocation::Seawater => {
                Threshold::new("temperature.seawater", AlarmType::Custom("seawater-temperature".into()), "environment.waterTemp", Direction::Above, 32.0)
                    .with_warning(30.0)
                    .with_hysteresis(0.5)
            }
        };
        SensorAlarmConfig::SingleMetric {
            threshold: threshold.named("Temperature").in_units("°C"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_must_be_less_severe_above() {
        let ok = Threshold::new("t", AlarmType::EngineOverheat, "engine.coolantTemp", Direction::Above, 95.0)
            .with_warning(90.0);
        assert!(ok.validate().is_ok());

        let inverted = ok.clone().with_warning(99.0);
        assert!(inverted.validate().is_err());

        let equal = ok.with_warning(95.0);
        assert!(equal.validate().is_err());
    }

    #[test]
    fn test_warning_must_be_less_severe_below() {
        let ok = Threshold::new("d", AlarmType::ShallowWater, "depth", Direction::Below, 1.5).with_warning(2.5);
        assert!(ok.validate().is_ok());
        assert!(ok.with_warning(1.0).validate().is_err());
    }

    #[test]
    fn test_rejects_negative_hysteresis_and_nan() {
        let t = Threshold::new("d", AlarmType::ShallowWater, "depth", Direction::Below, 1.5);
        assert!(t.clone().with_hysteresis(-0.1).validate().is_err());
        assert!(Threshold { value: f64::NAN, ..t }.validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let t = Threshold::new("d", AlarmType::ShallowWater, "depth", Direction::Below, 1.5);
        assert!(validate_thresholds(&[t.clone(), t]).is_err());
    }

    #[test]
    fn test_battery_defaults_follow_chemistry() {
        let lead = ThresholdRegistry::new(InstallationContext::default());
        let lithium = ThresholdRegistry::new(InstallationContext {
            battery_chemistry: BatteryChemistry::Lifepo4,
            ..Default::default()
        });

        let lead_v = lead.lookup(SensorType::Battery, "voltage").unwrap();
        let lithium_v = lithium.lookup(SensorType::Battery, "voltage").unwrap();
        assert_eq!(lead_v.value, 11.8);
        assert_eq!(lithium_v.value, 12.0);
        assert_eq!(lithium_v.warning_value, Some(12.8));
    }

    #[test]
    fn test_gps_and_autopilot_have_no_numeric_config() {
        let registry = ThresholdRegistry::default();
        assert_eq!(registry.sensor_config(SensorType::Gps), SensorAlarmConfig::None);
        assert!(registry.sensor_config(SensorType::Autopilot).thresholds().is_empty());
    }

    #[test]
    fn test_all_defaults_are_valid() {
        for chemistry in [BatteryChemistry::LeadAcid, BatteryChemistry::Agm, BatteryChemistry::Gel, BatteryChemistry::Lifepo4, BatteryChemistry::LithiumIon] {
            for engine_type in [EngineType::Diesel, EngineType::Gasoline, EngineType::Outboard] {
                for location in [TemperatureLocation::EngineRoom, TemperatureLocation::Cabin, TemperatureLocation::Refrigerator, TemperatureLocation::Freezer, TemperatureLocation::Seawater] {
                    let registry = ThresholdRegistry::new(InstallationContext {
                        battery_chemistry: chemistry,
                        engine_type,
                        temperature_location: location,
                    });
                    validate_thresholds(&registry.default_thresholds()).unwrap();
                }
            }
        }
    }
}
