// src/history.rs
//
// Bounded, append-only alarm ledger. Every committed transition becomes one
// immutable entry; later entries for the same occurrence supersede earlier
// ones. Statistics for compliance reporting are computed over the newest
// entry of each occurrence.

use crate::alarms::{AlarmType, EscalationLevel};
use crate::clock::Clock;
use crate::error::{BosunError, Result};
use crate::events::{AlarmEvent, AlarmSubscriber, TransitionKind};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Entries kept when no capacity is configured
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Rows in `most_frequent_alarms`
pub const MOST_FREQUENT_LIMIT: usize = 5;

/// Immutable snapshot of one occurrence transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmHistoryEntry {
    pub occurrence_id: Uuid,
    pub alarm_id: String,
    pub alarm_type: AlarmType,
    pub transition: TransitionKind,
    pub escalation_level: EscalationLevel,
    #[serde(default)]
    pub previous_level: Option<EscalationLevel>,
    pub peak_level: EscalationLevel,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snooze_count: u32,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    pub source: String,
    #[serde(default)]
    pub message: String,
    pub recorded_at: DateTime<Utc>,
    /// Audio collaborator failed during this transition
    #[serde(default)]
    pub audio_failed: bool,
    /// Operator marked the occurrence as a false positive
    #[serde(default)]
    pub false_positive: bool,
    #[serde(default)]
    pub response_latency_ms: Option<u64>,
}

impl AlarmHistoryEntry {
    /// Snapshot a transition event
    pub fn from_event(event: &AlarmEvent) -> Self {
        let occ = &event.occurrence;
        Self {
            occurrence_id: occ.occurrence_id,
            alarm_id: occ.alarm_id.clone(),
            alarm_type: occ.alarm_type.clone(),
            transition: event.kind,
            escalation_level: occ.escalation_level,
            previous_level: event.previous_level,
            peak_level: occ.peak_level,
            triggered_at: occ.triggered_at,
            acknowledged_at: occ.acknowledged_at,
            acknowledged_by: occ.acknowledged_by.clone(),
            snoozed_until: occ.snooze.as_ref().map(|s| s.until),
            snooze_count: occ.snooze_count,
            value: occ.value,
            threshold_value: occ.threshold_value,
            source: occ.source.clone(),
            message: occ.message.clone(),
            recorded_at: event.timestamp,
            audio_failed: event.audio.is_failure(),
            false_positive: false,
            response_latency_ms: event.response_latency_ms,
        }
    }

    /// Time from trigger to acknowledgement in milliseconds
    pub fn response_time_ms(&self) -> Option<i64> {
        self.acknowledged_at
            .map(|at| (at - self.triggered_at).num_milliseconds())
    }
}

/// Query over the ledger; every populated criterion must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub alarm_types: Option<Vec<AlarmType>>,
    #[serde(default)]
    pub escalation_levels: Option<Vec<EscalationLevel>>,
    #[serde(default)]
    pub acknowledged_only: bool,
    /// Inclusive lower bound on `recorded_at`
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `recorded_at`
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    /// Keep only the newest N matches
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn matches(&self, entry: &AlarmHistoryEntry) -> bool {
        if let Some(types) = &self.alarm_types {
            if !types.contains(&entry.alarm_type) {
                return false;
            }
        }
        if let Some(levels) = &self.escalation_levels {
            if !levels.contains(&entry.escalation_level) {
                return false;
            }
        }
        if self.acknowledged_only && entry.acknowledged_at.is_none() {
            return false;
        }
        if self.from.map_or(false, |from| entry.recorded_at < from) {
            return false;
        }
        if self.to.map_or(false, |to| entry.recorded_at > to) {
            return false;
        }
        true
    }
}

/// Occurrence count for one alarm type, across every alarm id of that type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmFrequency {
    pub alarm_type: AlarmType,
    pub count: usize,
    pub last_triggered: DateTime<Utc>,
}

/// Aggregate over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmStatistics {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Distinct occurrences triggered inside the window
    pub total_alarms: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Keyed by peak level
    pub by_level: BTreeMap<EscalationLevel, usize>,
    /// Mean acknowledgement delay over acknowledged occurrences
    pub average_response_time_ms: Option<f64>,
    pub false_positive_rate: f64,
    pub most_frequent_alarms: Vec<AlarmFrequency>,
    /// Occurrences whose audio response exceeded the budget
    pub budget_violations: usize,
    /// Occurrences with at least one audio failure
    pub audio_failures: usize,
}

#[derive(Debug, Default)]
struct LedgerInner {
    entries: VecDeque<AlarmHistoryEntry>,
    flagged: HashSet<Uuid>,
}

/// Bounded in-memory history of alarm transitions
#[derive(Debug)]
pub struct AlarmLedger {
    inner: RwLock<LedgerInner>,
    capacity: usize,
    response_budget_ms: u64,
    clock: Arc<dyn Clock>,
}

impl AlarmLedger {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
            capacity: capacity.max(1),
            response_budget_ms: 500,
            clock,
        }
    }

    /// Budget used when counting `budget_violations`
    pub fn with_response_budget_ms(mut self, budget_ms: u64) -> Self {
        self.response_budget_ms = budget_ms;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one entry, evicting the oldest beyond capacity
    pub fn append(&self, mut entry: AlarmHistoryEntry) {
        let mut inner = self.inner.write();
        if entry.false_positive {
            inner.flagged.insert(entry.occurrence_id);
        } else if inner.flagged.contains(&entry.occurrence_id) {
            // The flag survives later transitions of the same occurrence
            entry.false_positive = true;
        }
        inner.entries.push_back(entry);
        while inner.entries.len() > self.capacity {
            let Some(evicted) = inner.entries.pop_front() else {
                break;
            };
            debug!("History full, evicted entry for {}", evicted.alarm_id);
            if evicted.false_positive
                && !inner.entries.iter().any(|e| e.occurrence_id == evicted.occurrence_id)
            {
                inner.flagged.remove(&evicted.occurrence_id);
            }
        }
    }

    /// Matching entries, newest first
    pub fn query(&self, filter: &HistoryFilter) -> Vec<AlarmHistoryEntry> {
        let inner = self.inner.read();
        let matches = inner.entries.iter().rev().filter(|e| filter.matches(e)).cloned();
        match filter.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        }
    }

    /// Mark an occurrence as a false positive by appending a superseding entry
    pub fn flag_false_positive(&self, occurrence_id: Uuid) -> Result<AlarmHistoryEntry> {
        let latest = self
            .inner
            .read()
            .entries
            .iter()
            .rev()
            .find(|e| e.occurrence_id == occurrence_id)
            .cloned()
            .ok_or_else(|| BosunError::NotFound(format!("occurrence {}", occurrence_id)))?;

        let entry = AlarmHistoryEntry {
            transition: TransitionKind::FalsePositiveFlagged,
            previous_level: Some(latest.escalation_level),
            recorded_at: self.clock.now(),
            audio_failed: false,
            false_positive: true,
            response_latency_ms: None,
            ..latest
        };
        info!("Occurrence {} of {} flagged as false positive", occurrence_id, entry.alarm_id);
        self.append(entry.clone());
        Ok(entry)
    }

    /// Statistics over occurrences triggered within the trailing `window`
    pub fn statistics(&self, window: Duration) -> AlarmStatistics {
        let window_end = self.clock.now();
        let window_start = window_end - window;
        let inner = self.inner.read();

        // Newest entry per occurrence, plus per-occurrence flags that any
        // entry may carry
        let mut latest: HashMap<Uuid, &AlarmHistoryEntry> = HashMap::new();
        let mut over_budget: HashSet<Uuid> = HashSet::new();
        let mut audio_failed: HashSet<Uuid> = HashSet::new();
        for entry in inner
            .entries
            .iter()
            .filter(|e| e.triggered_at >= window_start && e.triggered_at <= window_end)
        {
            latest.insert(entry.occurrence_id, entry);
            if entry.response_latency_ms.map_or(false, |ms| ms > self.response_budget_ms) {
                over_budget.insert(entry.occurrence_id);
            }
            if entry.audio_failed {
                audio_failed.insert(entry.occurrence_id);
            }
        }

        let total_alarms = latest.len();
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_level: BTreeMap<EscalationLevel, usize> = BTreeMap::new();
        let mut frequency: HashMap<&AlarmType, AlarmFrequency> = HashMap::new();
        let mut response_times = Vec::new();
        let mut false_positives = 0usize;

        for entry in latest.values() {
            *by_type.entry(entry.alarm_type.to_string()).or_default() += 1;
            *by_level.entry(entry.peak_level).or_default() += 1;
            if let Some(ms) = entry.response_time_ms() {
                response_times.push(ms as f64);
            }
            if entry.false_positive {
                false_positives += 1;
            }

            let row = frequency.entry(&entry.alarm_type).or_insert_with(|| AlarmFrequency {
                alarm_type: entry.alarm_type.clone(),
                count: 0,
                last_triggered: entry.triggered_at,
            });
            row.count += 1;
            row.last_triggered = row.last_triggered.max(entry.triggered_at);
        }

        let average_response_time_ms = if response_times.is_empty() {
            None
        } else {
            Some(response_times.iter().sum::<f64>() / response_times.len() as f64)
        };

        let false_positive_rate = if total_alarms == 0 {
            0.0
        } else {
            false_positives as f64 / total_alarms as f64
        };

        let mut most_frequent_alarms: Vec<_> = frequency.into_values().collect();
        most_frequent_alarms.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(b.last_triggered.cmp(&a.last_triggered))
        });
        most_frequent_alarms.truncate(MOST_FREQUENT_LIMIT);

        AlarmStatistics {
            window_start,
            window_end,
            total_alarms,
            by_type,
            by_level,
            average_response_time_ms,
            false_positive_rate,
            most_frequent_alarms,
            budget_violations: over_budget.len(),
            audio_failures: audio_failed.len(),
        }
    }

    /// The newest `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<AlarmHistoryEntry> {
        let inner = self.inner.read();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.flagged.clear();
    }

    /// Replace contents with previously persisted entries
    pub fn restore(&self, entries: Vec<AlarmHistoryEntry>) {
        let mut inner = self.inner.write();
        let skip = entries.len().saturating_sub(self.capacity);
        inner.entries = entries.into_iter().skip(skip).collect();
        inner.flagged = inner
            .entries
            .iter()
            .filter(|e| e.false_positive)
            .map(|e| e.occurrence_id)
            .collect();
        info!("Restored {} history entries", inner.entries.len());
    }
}

impl AlarmSubscriber for AlarmLedger {
    fn on_alarm_event(&self, event: &AlarmEvent) {
        self.append(AlarmHistoryEntry::from_event(event));
    }
}
