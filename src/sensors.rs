// src/sensors.rs - Sensor ingress
//
// Readings arrive already decoded into named numeric fields. The engine only
// sees a flat `dotted.path -> f64` snapshot; nested JSON from the instrument
// feed is flattened on the way in.

use crate::error::{BosunError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Flat set of readings taken together
#[derive(Debug, Clone)]
pub struct SensorSnapshot {
    values: BTreeMap<String, f64>,
    /// Arrival of the oldest reading in the snapshot
    pub received_at: Instant,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            received_at: Instant::now(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, path: impl Into<String>, value: f64) -> Self {
        self.insert(path, value);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, value: f64) {
        self.values.insert(path.into(), value);
    }

    /// Reading at `path`, `None` when absent
    pub fn get(&self, path: &str) -> Option<f64> {
        self.values.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Flatten a nested JSON object
    ///
    /// Numbers keep their value and booleans become `1.0`/`0.0`. Strings,
    /// nulls and arrays are ignored.
    ///
    /// ```rust
    /// use bosun::sensors::SensorSnapshot;
    ///
    /// let json = serde_json::json!({"depth": 4.2, "engine": {"coolantTemp": 88.0}});
    /// let snapshot = SensorSnapshot::from_json(&json).unwrap();
    /// assert_eq!(snapshot.get("engine.coolantTemp"), Some(88.0));
    /// ```
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| BosunError::Validation("sensor snapshot must be a JSON object".into()))?;
        let mut snapshot = Self::new();
        for (key, value) in object {
            flatten(key, value, &mut snapshot.values);
        }
        Ok(snapshot)
    }

    /// Parse one line of the JSON feed
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: JsonValue = serde_json::from_str(text)?;
        Self::from_json(&json)
    }
}

fn flatten(prefix: &str, value: &JsonValue, out: &mut BTreeMap<String, f64>) {
    match value {
        JsonValue::Number(n) => {
            if let Some(v) = n.as_f64() {
                out.insert(prefix.to_string(), v);
            }
        }
        JsonValue::Bool(b) => {
            out.insert(prefix.to_string(), if *b { 1.0 } else { 0.0 });
        }
        JsonValue::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{}.{}", prefix, key), nested, out);
            }
        }
        JsonValue::Null | JsonValue::String(_) | JsonValue::Array(_) => {
            trace!("Ignoring non-numeric sensor field {}", prefix);
        }
    }
}

/// Latest value of one path
#[derive(Debug, Clone, Copy)]
pub struct Reading {
    pub value: f64,
    pub received_at: Instant,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe latest-value store shared by producers and the scan loop
///
/// ```rust
/// use bosun::sensors::SensorBus;
///
/// let bus = SensorBus::new();
/// bus.set("depth", 3.1);
/// assert_eq!(bus.get("depth"), Some(3.1));
/// assert_eq!(bus.snapshot().get("depth"), Some(3.1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SensorBus {
    readings: Arc<DashMap<String, Reading>>,
}

impl SensorBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one reading
    pub fn set(&self, path: impl AsRef<str>, value: f64) {
        let path = path.as_ref();
        trace!("Setting reading {} = {}", path, value);
        self.readings.insert(
            path.to_string(),
            Reading {
                value,
                received_at: Instant::now(),
                updated_at: Utc::now(),
            },
        );
    }

    /// Store every reading of a snapshot
    pub fn publish(&self, snapshot: &SensorSnapshot) {
        let updated_at = Utc::now();
        for (path, value) in snapshot.iter() {
            self.readings.insert(
                path.to_string(),
                Reading {
                    value,
                    received_at: snapshot.received_at,
                    updated_at,
                },
            );
        }
    }

    pub fn get(&self, path: &str) -> Option<f64> {
        self.readings.get(path).map(|entry| entry.value().value)
    }

    pub fn reading(&self, path: &str) -> Option<Reading> {
        self.readings.get(path).map(|entry| *entry.value())
    }

    pub fn remove(&self, path: &str) -> Option<Reading> {
        self.readings.remove(path).map(|(_, reading)| reading)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Copy of every latest value
    pub fn snapshot(&self) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::new();
        let mut oldest = snapshot.received_at;
        for entry in self.readings.iter() {
            snapshot.insert(entry.key().clone(), entry.value().value);
            oldest = oldest.min(entry.value().received_at);
        }
        snapshot.received_at = oldest;
        snapshot
    }
}
