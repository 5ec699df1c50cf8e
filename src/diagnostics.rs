// src/diagnostics.rs - Self test of the alarm chain
//
// Each critical alarm type gets an audio test and an end-to-end pipeline test
// on a scratch state machine, so the live alarm state and history are never
// touched. Every sub-test runs isolated; one failure never stops the rest.

use crate::alarm_manager::AlarmManager;
use crate::alarms::{AlarmType, EscalationLevel};
use crate::audio::AudioAlert;
use crate::clock::Clock;
use crate::error::Result;
use crate::events::EventDispatcher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Length of each audio test tone
pub const TEST_TONE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Audio,
    AlarmPipeline,
    Visual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    /// `None` for checks not tied to one alarm type
    pub alarm_type: Option<AlarmType>,
    pub test_type: TestType,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Audio stand-in for the scratch pipeline; never makes a sound
struct SilentAudio;

impl AudioAlert for SilentAudio {
    fn play_alarm_sound(&self, _: &AlarmType, _: EscalationLevel) -> Result<bool> {
        Ok(true)
    }

    fn stop_alarm_sound(&self, _: &AlarmType) {}

    fn test_alarm_sound(&self, _: &AlarmType, _: EscalationLevel, _: Duration) -> Result<bool> {
        Ok(true)
    }
}

pub struct Diagnostics {
    audio: Arc<dyn AudioAlert>,
    events: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
}

impl Diagnostics {
    pub fn new(audio: Arc<dyn AudioAlert>, events: Arc<EventDispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self { audio, events, clock }
    }

    /// Run every test and return one result per test
    pub fn run_all(&self) -> Vec<DiagnosticResult> {
        let mut results = Vec::with_capacity(AlarmType::CRITICAL.len() * 2 + 1);
        for alarm_type in AlarmType::CRITICAL.iter() {
            results.push(self.run(Some(alarm_type.clone()), TestType::Audio, || self.audio_test(alarm_type)));
            results.push(self.run(Some(alarm_type.clone()), TestType::AlarmPipeline, || {
                self.pipeline_test(alarm_type)
            }));
        }
        results.push(self.run(None, TestType::Visual, || self.visual_test()));

        let failed = results.iter().filter(|r| !r.success).count();
        if failed == 0 {
            info!("Alarm self test passed ({} checks)", results.len());
        } else {
            warn!("Alarm self test: {} of {} checks failed", failed, results.len());
        }
        results
    }

    fn run<F>(&self, alarm_type: Option<AlarmType>, test_type: TestType, test: F) -> DiagnosticResult
    where
        F: FnOnce() -> std::result::Result<(), String>,
    {
        let timestamp = self.clock.now();
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(test)).unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "test panicked".to_string());
            Err(message)
        });

        DiagnosticResult {
            alarm_type,
            test_type,
            success: outcome.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp,
            error: outcome.err(),
        }
    }

    fn audio_test(&self, alarm_type: &AlarmType) -> std::result::Result<(), String> {
        match self.audio.test_alarm_sound(alarm_type, EscalationLevel::Critical, TEST_TONE) {
            Ok(true) => Ok(()),
            Ok(false) => Err("test tone was not played".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn pipeline_test(&self, alarm_type: &AlarmType) -> std::result::Result<(), String> {
        let scratch = AlarmManager::new(self.clock.clone(), Arc::new(SilentAudio), Arc::new(EventDispatcher::new(16)));
        let occ = scratch.raise_synthetic(alarm_type.clone(), EscalationLevel::Critical, "diagnostics", "self test");

        if scratch.get(&occ.alarm_id).is_none() {
            return Err("raised alarm is not active".to_string());
        }
        if !scratch.is_audible(&occ.alarm_id) {
            return Err("critical alarm is not audible".to_string());
        }
        if scratch.snooze_alarm(&occ.alarm_id, chrono::Duration::minutes(1), "self test", false) {
            return Err("critical alarm accepted a snooze without override".to_string());
        }
        if !scratch.clear_alarm(&occ.alarm_id) || scratch.get(&occ.alarm_id).is_some() {
            return Err("alarm did not clear".to_string());
        }
        Ok(())
    }

    fn visual_test(&self) -> std::result::Result<(), String> {
        if self.events.receiver_count() > 0 {
            Ok(())
        } else {
            Err("no UI subscribers for alarm events".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioAlert;
    use crate::clock::SystemClock;
    use crate::error::BosunError;

    #[test]
    fn test_all_pass_with_working_audio_and_ui() {
        let mut audio = MockAudioAlert::new();
        audio.expect_test_alarm_sound().times(5).returning(|_, _, _| Ok(true));
        let events = Arc::new(EventDispatcher::default());
        let _ui = events.receiver();

        let results = Diagnostics::new(Arc::new(audio), events, Arc::new(SystemClock)).run_all();
        assert_eq!(results.len(), 11);
        assert!(results.iter().all(|r| r.success), "{:?}", results);
    }

    struct FlakyAudio;

    impl AudioAlert for FlakyAudio {
        fn play_alarm_sound(&self, _: &AlarmType, _: EscalationLevel) -> Result<bool> {
            Ok(true)
        }

        fn stop_alarm_sound(&self, _: &AlarmType) {}

        fn test_alarm_sound(&self, alarm_type: &AlarmType, _: EscalationLevel, _: Duration) -> Result<bool> {
            match alarm_type {
                AlarmType::ShallowWater => panic!("driver crashed"),
                AlarmType::LowBattery => Err(BosunError::Audio("muted by hardware".into())),
                _ => Ok(true),
            }
        }
    }

    #[test]
    fn test_failures_are_isolated() {
        let results = Diagnostics::new(Arc::new(FlakyAudio), Arc::new(EventDispatcher::default()), Arc::new(SystemClock)).run_all();
        assert_eq!(results.len(), 11);

        let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
        assert_eq!(failed.len(), 3);
        assert!(failed.iter().any(|r| r.error.as_deref() == Some("driver crashed")));
        assert!(failed.iter().any(|r| r.test_type == TestType::Visual));
        assert!(results
            .iter()
            .filter(|r| r.test_type == TestType::AlarmPipeline)
            .all(|r| r.success));
    }
}
