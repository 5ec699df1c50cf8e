// src/alarm_manager.rs - Critical alarm state machine
//
// Owns the lifecycle of every active occurrence:
//
//   none -> active(level) -> active(level') | acknowledged | snoozed -> cleared
//
// Each alarm id has its own slot guarded by a mutex. Evaluation, the audio
// side effect and event publication for one alarm all happen while that slot
// is locked, so transitions of a single alarm are totally ordered while
// different alarms proceed independently.
//
// The speaker is addressed per alarm type. Several alarms can share a type
// (battery voltage and state of charge are both low-battery), so the manager
// keeps a registry of which alarms are currently sounding and only stops a
// type once none of them remain. Lock order is slot, then registry.

use crate::alarms::{max_snooze, ActiveAlarmOccurrence, AlarmType, EscalationLevel, SnoozeRecord};
use crate::audio::{AudioAlert, AudioCommand, AudioOutcome};
use crate::clock::Clock;
use crate::error::{BosunError, Result};
use crate::evaluator::{evaluate_reading, Evaluation};
use crate::events::{AlarmEvent, EventDispatcher, TransitionKind};
use crate::profiles::ProfileSettings;
use crate::thresholds::Threshold;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default reading-to-audio budget for critical alarms
pub const DEFAULT_RESPONSE_BUDGET: Duration = Duration::from_millis(500);

/// Actor recorded for automatic acknowledgements
pub const SYSTEM_ACTOR: &str = "system";

type Slot = Option<ActiveAlarmOccurrence>;

/// Alarm id -> type and level of every alarm the speaker is playing for
type Sounding = HashMap<String, (AlarmType, EscalationLevel)>;

pub struct AlarmManager {
    clock: Arc<dyn Clock>,
    audio: Arc<dyn AudioAlert>,
    events: Arc<EventDispatcher>,
    settings: RwLock<ProfileSettings>,
    response_budget: Duration,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    sounding: Mutex<Sounding>,
}

impl AlarmManager {
    pub fn new(clock: Arc<dyn Clock>, audio: Arc<dyn AudioAlert>, events: Arc<EventDispatcher>) -> Self {
        Self {
            clock,
            audio,
            events,
            settings: RwLock::new(ProfileSettings::default()),
            response_budget: DEFAULT_RESPONSE_BUDGET,
            slots: DashMap::new(),
            sounding: Mutex::new(HashMap::new()),
        }
    }

    /// Override the response budget
    pub fn with_response_budget(mut self, budget: Duration) -> Self {
        self.response_budget = budget;
        self
    }

    /// Start with `settings` instead of the defaults
    pub fn with_settings(self, settings: ProfileSettings) -> Self {
        *self.settings.write() = settings;
        self
    }

    /// Replace notification settings; only future transitions are affected
    pub fn set_settings(&self, settings: ProfileSettings) {
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> ProfileSettings {
        self.settings.read().clone()
    }

    pub fn response_budget(&self) -> Duration {
        self.response_budget
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    // ==========================================
    // Triggers
    // ==========================================

    /// Evaluate one reading for `threshold` and apply the resulting transition
    ///
    /// `received_at` is when the reading arrived, used for response budget
    /// accounting on critical alarms.
    pub fn evaluate_threshold(&self, threshold: &Threshold, reading: Option<f64>, received_at: Instant) -> Evaluation {
        let slot = self.slot(&threshold.id);
        let mut slot = slot.lock();
        let now = self.clock.now();
        self.expire_snooze(&mut slot, now);

        let previous = slot.as_ref().map(|occ| occ.escalation_level);
        if !threshold.enabled {
            return Evaluation {
                level: previous,
                crossed: false,
            };
        }

        let evaluation = evaluate_reading(previous, reading, threshold);
        let Some(level) = evaluation.level else {
            if slot.is_some() {
                self.close(&mut slot, now);
            }
            return evaluation;
        };

        let value = reading.filter(|v| v.is_finite());
        if let Some(occ) = slot.as_mut() {
            if value.is_some() {
                occ.value = value;
            }
            if evaluation.crossed {
                occ.threshold_value = threshold.trip_point(level);
                occ.message = describe(threshold, level, occ.value);
                self.change_level(occ, level, Some(received_at), now);
            }
            return evaluation;
        }

        let mut occ = ActiveAlarmOccurrence::new(
            threshold.id.clone(),
            threshold.alarm_type.clone(),
            level,
            threshold.data_path.clone(),
            now,
        );
        occ.value = value;
        occ.threshold_value = threshold.trip_point(level);
        occ.message = describe(threshold, level, value);
        *slot = Some(self.open(occ, Some(received_at), now));
        evaluation
    }

    /// Raise or re-level an alarm with no numeric reading behind it
    ///
    /// Used by the condition monitors and diagnostics. The alarm id is the
    /// alarm type's string form.
    pub fn raise_synthetic(
        &self,
        alarm_type: AlarmType,
        level: EscalationLevel,
        source: &str,
        message: &str,
    ) -> ActiveAlarmOccurrence {
        let received_at = Instant::now();
        let alarm_id = alarm_type.as_str().to_string();
        let slot = self.slot(&alarm_id);
        let mut slot = slot.lock();
        let now = self.clock.now();
        self.expire_snooze(&mut slot, now);

        if let Some(occ) = slot.as_mut() {
            occ.message = message.to_string();
            if occ.escalation_level != level {
                self.change_level(occ, level, Some(received_at), now);
            }
            return occ.clone();
        }

        let mut occ = ActiveAlarmOccurrence::new(alarm_id, alarm_type, level, source, now);
        occ.message = message.to_string();
        let occ = self.open(occ, Some(received_at), now);
        *slot = Some(occ.clone());
        occ
    }

    /// Clear an active alarm; `false` when it was not active
    pub fn clear_alarm(&self, alarm_id: &str) -> bool {
        let Some(slot) = self.existing_slot(alarm_id) else {
            return false;
        };
        let mut slot = slot.lock();
        if slot.is_none() {
            return false;
        }
        let now = self.clock.now();
        self.close(&mut slot, now);
        true
    }

    /// Operator clear for alarms that are neither critical types nor at a
    /// critical level
    pub fn dismiss_alarm(&self, alarm_id: &str, by: &str) -> Result<()> {
        let slot = self
            .existing_slot(alarm_id)
            .ok_or_else(|| BosunError::NotFound(format!("active alarm '{}'", alarm_id)))?;
        let mut slot = slot.lock();
        let occ = slot
            .as_ref()
            .ok_or_else(|| BosunError::NotFound(format!("active alarm '{}'", alarm_id)))?;

        if occ.alarm_type.is_critical() || occ.escalation_level.is_critical_or_above() {
            return Err(BosunError::Validation(format!(
                "alarm '{}' is safety critical and clears only when its condition recovers",
                alarm_id
            )));
        }

        info!("Alarm {} dismissed by {}", alarm_id, by);
        let now = self.clock.now();
        self.close(&mut slot, now);
        Ok(())
    }

    // ==========================================
    // Operator actions
    // ==========================================

    /// Record an acknowledgement; the alarm stays active and audible
    pub fn acknowledge_alarm(&self, alarm_id: &str, by: &str) -> Result<ActiveAlarmOccurrence> {
        let slot = self
            .existing_slot(alarm_id)
            .ok_or_else(|| BosunError::NotFound(format!("active alarm '{}'", alarm_id)))?;
        let mut slot = slot.lock();
        let now = self.clock.now();
        self.expire_snooze(&mut slot, now);

        let occ = slot
            .as_mut()
            .ok_or_else(|| BosunError::NotFound(format!("active alarm '{}'", alarm_id)))?;

        if occ.is_acknowledged() {
            debug!("Alarm {} already acknowledged", alarm_id);
            return Ok(occ.clone());
        }

        occ.acknowledged_at = Some(now);
        occ.acknowledged_by = Some(by.to_string());
        info!("Alarm {} acknowledged by {}", alarm_id, by);
        self.publish(TransitionKind::Acknowledged, occ, Some(occ.escalation_level), AudioOutcome::Unchanged, None, now);
        Ok(occ.clone())
    }

    /// Suppress audio for `duration`
    ///
    /// Critical and emergency alarms need `allow_critical`. The duration must
    /// be positive and at most fifteen minutes.
    pub fn try_snooze(
        &self,
        alarm_id: &str,
        duration: chrono::Duration,
        reason: &str,
        allow_critical: bool,
    ) -> Result<SnoozeRecord> {
        if duration <= chrono::Duration::zero() {
            return Err(BosunError::SnoozeRejected("duration must be positive".into()));
        }
        if duration > max_snooze() {
            return Err(BosunError::SnoozeRejected(format!(
                "duration {} min exceeds the {} min limit",
                duration.num_minutes(),
                max_snooze().num_minutes()
            )));
        }

        let slot = self
            .existing_slot(alarm_id)
            .ok_or_else(|| BosunError::NotFound(format!("active alarm '{}'", alarm_id)))?;
        let mut slot = slot.lock();
        let now = self.clock.now();
        self.expire_snooze(&mut slot, now);

        let occ = slot
            .as_mut()
            .ok_or_else(|| BosunError::NotFound(format!("active alarm '{}'", alarm_id)))?;

        if occ.escalation_level.is_critical_or_above() && !allow_critical {
            return Err(BosunError::SnoozeRejected(format!(
                "alarm '{}' is {} and cannot be snoozed without override",
                alarm_id, occ.escalation_level
            )));
        }

        let record = SnoozeRecord {
            alarm_id: alarm_id.to_string(),
            until: now + duration,
            reason: reason.to_string(),
            level: occ.escalation_level,
            allow_critical,
        };
        occ.snooze = Some(record.clone());
        occ.snooze_count += 1;

        if allow_critical && occ.escalation_level.is_critical_or_above() {
            warn!("Critical alarm {} snoozed with override until {}: {}", alarm_id, record.until, reason);
        } else {
            info!("Alarm {} snoozed until {}: {}", alarm_id, record.until, reason);
        }

        let audio = self.drive_audio(alarm_id, &AudioCommand::Suppress(occ.alarm_type.clone()));
        self.publish(TransitionKind::Snoozed, occ, Some(occ.escalation_level), audio, None, now);
        Ok(record)
    }

    /// Boolean form of [`AlarmManager::try_snooze`]
    pub fn snooze_alarm(&self, alarm_id: &str, duration: chrono::Duration, reason: &str, allow_critical: bool) -> bool {
        match self.try_snooze(alarm_id, duration, reason, allow_critical) {
            Ok(_) => true,
            Err(e) => {
                warn!("Snooze of {} refused: {}", alarm_id, e);
                false
            }
        }
    }

    /// End a snooze early; `false` when nothing was snoozed
    pub fn cancel_snooze(&self, alarm_id: &str) -> bool {
        let Some(slot) = self.existing_slot(alarm_id) else {
            return false;
        };
        let mut slot = slot.lock();
        let now = self.clock.now();
        self.expire_snooze(&mut slot, now);

        let Some(occ) = slot.as_mut() else {
            return false;
        };
        if occ.snooze.take().is_none() {
            return false;
        }

        info!("Snooze on {} cancelled", alarm_id);
        let audio = self.drive_audio(alarm_id, &self.sound_command(occ, now));
        self.publish(TransitionKind::Unsnoozed, occ, Some(occ.escalation_level), audio, None, now);
        true
    }

    // ==========================================
    // Queries
    // ==========================================

    /// Active occurrences, most severe first
    pub fn active_alarms(&self) -> Vec<ActiveAlarmOccurrence> {
        let slots: Vec<_> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        let mut active: Vec<_> = slots.iter().filter_map(|slot| slot.lock().clone()).collect();
        active.sort_by(|a, b| {
            b.escalation_level
                .cmp(&a.escalation_level)
                .then(a.triggered_at.cmp(&b.triggered_at))
        });
        active
    }

    pub fn get(&self, alarm_id: &str) -> Option<ActiveAlarmOccurrence> {
        self.existing_slot(alarm_id).and_then(|slot| slot.lock().clone())
    }

    /// Sound should currently be playing for `alarm_id`
    pub fn is_audible(&self, alarm_id: &str) -> bool {
        let now = self.clock.now();
        self.get(alarm_id).map_or(false, |occ| {
            !occ.is_snoozed_at(now) && self.settings.read().plays(occ.escalation_level)
        })
    }

    pub fn active_count(&self) -> usize {
        self.active_alarms().len()
    }

    /// Occurrences whose snooze has not yet expired
    pub fn active_snooze_count(&self) -> usize {
        let now = self.clock.now();
        self.active_alarms().iter().filter(|occ| occ.is_snoozed_at(now)).count()
    }

    // ==========================================
    // Transitions (slot lock held)
    // ==========================================

    fn slot(&self, alarm_id: &str) -> Arc<Mutex<Slot>> {
        self.slots.entry(alarm_id.to_string()).or_default().clone()
    }

    fn existing_slot(&self, alarm_id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.slots.get(alarm_id).map(|entry| entry.value().clone())
    }

    fn open(&self, mut occ: ActiveAlarmOccurrence, received_at: Option<Instant>, now: DateTime<Utc>) -> ActiveAlarmOccurrence {
        let command = self.sound_command(&occ, now);
        let audio = self.drive_audio(&occ.alarm_id, &command);
        let latency = self.track_latency(&occ, &command, received_at);

        if occ.escalation_level.is_critical_or_above() {
            warn!("ALARM {} raised at {}: {}", occ.alarm_id, occ.escalation_level, occ.message);
        } else {
            info!("Alarm {} raised at {}: {}", occ.alarm_id, occ.escalation_level, occ.message);
        }
        self.publish(TransitionKind::Raised, &occ, None, audio, latency, now);

        if occ.escalation_level == EscalationLevel::Info && self.settings.read().auto_acknowledge_info {
            occ.acknowledged_at = Some(now);
            occ.acknowledged_by = Some(SYSTEM_ACTOR.to_string());
            self.publish(TransitionKind::Acknowledged, &occ, Some(occ.escalation_level), AudioOutcome::Unchanged, None, now);
        }
        occ
    }

    fn change_level(
        &self,
        occ: &mut ActiveAlarmOccurrence,
        level: EscalationLevel,
        received_at: Option<Instant>,
        now: DateTime<Utc>,
    ) {
        let previous = occ.escalation_level;
        occ.set_level(level);
        let kind = if level > previous {
            TransitionKind::Escalated
        } else {
            TransitionKind::DeEscalated
        };
        info!("Alarm {} {} -> {}", occ.alarm_id, previous, level);

        if let Some(snooze_level) = occ.snooze.as_ref().map(|s| s.level) {
            if level <= snooze_level {
                self.publish(kind, occ, Some(previous), AudioOutcome::Suppressed, None, now);
                return;
            }
            // Rising above the snoozed level always re-sounds
            occ.snooze = None;
            warn!("Snooze on {} overridden by escalation to {}", occ.alarm_id, level);
            self.publish(TransitionKind::Unsnoozed, occ, Some(previous), AudioOutcome::Unchanged, None, now);
        }

        let command = self.sound_command(occ, now);
        let audio = self.drive_audio(&occ.alarm_id, &command);
        let latency = self.track_latency(occ, &command, received_at);
        self.publish(kind, occ, Some(previous), audio, latency, now);
    }

    fn close(&self, slot: &mut Slot, now: DateTime<Utc>) {
        let Some(occ) = slot.take() else {
            return;
        };
        let audio = self.drive_audio(&occ.alarm_id, &AudioCommand::Stop(occ.alarm_type.clone()));
        info!("Alarm {} cleared (peak {})", occ.alarm_id, occ.peak_level);
        self.publish(TransitionKind::Cleared, &occ, Some(occ.escalation_level), audio, None, now);
    }

    fn expire_snooze(&self, slot: &mut Slot, now: DateTime<Utc>) {
        let Some(occ) = slot.as_mut() else {
            return;
        };
        let expired = occ.snooze.as_ref().map_or(false, |s| !s.is_active_at(now));
        if !expired {
            return;
        }
        occ.snooze = None;
        info!("Snooze on {} expired", occ.alarm_id);
        let command = self.sound_command(occ, now);
        let audio = self.drive_audio(&occ.alarm_id, &command);
        self.publish(TransitionKind::Unsnoozed, occ, Some(occ.escalation_level), audio, None, now);
    }

    fn sound_command(&self, occ: &ActiveAlarmOccurrence, now: DateTime<Utc>) -> AudioCommand {
        if occ.is_snoozed_at(now) || !self.settings.read().plays(occ.escalation_level) {
            AudioCommand::Suppress(occ.alarm_type.clone())
        } else {
            AudioCommand::Play(occ.alarm_type.clone(), occ.escalation_level)
        }
    }

    /// Apply `command` for `alarm_id` to the shared per-type speaker
    ///
    /// The speaker always plays the loudest level among the audible alarms of
    /// a type. Stopping or suppressing one alarm leaves its siblings sounding,
    /// dropping back to the loudest remaining level when needed.
    fn drive_audio(&self, alarm_id: &str, command: &AudioCommand) -> AudioOutcome {
        let mut sounding = self.sounding.lock();
        match command {
            AudioCommand::None => AudioOutcome::Unchanged,
            AudioCommand::Play(alarm_type, level) => {
                let before = loudest(&sounding, alarm_type);
                sounding.insert(alarm_id.to_string(), (alarm_type.clone(), *level));
                let top = loudest(&sounding, alarm_type).unwrap_or(*level);
                if top > *level && before == Some(top) {
                    // Already playing a sibling's louder level
                    return AudioOutcome::Played;
                }
                AudioCommand::Play(alarm_type.clone(), top).dispatch(self.audio.as_ref())
            }
            AudioCommand::Stop(alarm_type) | AudioCommand::Suppress(alarm_type) => {
                let removed = sounding.remove(alarm_id).map(|(_, level)| level);
                let Some(remaining) = loudest(&sounding, alarm_type) else {
                    return command.dispatch(self.audio.as_ref());
                };
                debug!("{} keeps sounding at {} for sibling alarms", alarm_type, remaining);
                if removed.map_or(false, |level| level > remaining) {
                    let outcome = AudioCommand::Play(alarm_type.clone(), remaining).dispatch(self.audio.as_ref());
                    if outcome.is_failure() {
                        return outcome;
                    }
                }
                match command {
                    AudioCommand::Stop(_) => AudioOutcome::Stopped,
                    _ => AudioOutcome::Suppressed,
                }
            }
        }
    }

    fn track_latency(&self, occ: &ActiveAlarmOccurrence, command: &AudioCommand, received_at: Option<Instant>) -> Option<u64> {
        if !occ.escalation_level.is_critical_or_above() || !matches!(command, AudioCommand::Play(..)) {
            return None;
        }
        let elapsed = received_at?.elapsed();
        if elapsed > self.response_budget {
            warn!(
                "Alarm {} response took {:?}, budget is {:?}",
                occ.alarm_id, elapsed, self.response_budget
            );
        }
        Some(elapsed.as_millis() as u64)
    }

    fn publish(
        &self,
        kind: TransitionKind,
        occ: &ActiveAlarmOccurrence,
        previous_level: Option<EscalationLevel>,
        audio: AudioOutcome,
        response_latency_ms: Option<u64>,
        now: DateTime<Utc>,
    ) {
        self.events.publish(AlarmEvent {
            kind,
            occurrence: occ.clone(),
            previous_level,
            timestamp: now,
            audio,
            response_latency_ms,
        });
    }
}

fn loudest(sounding: &Sounding, alarm_type: &AlarmType) -> Option<EscalationLevel> {
    sounding
        .values()
        .filter(|(t, _)| t == alarm_type)
        .map(|(_, level)| *level)
        .max()
}

fn describe(threshold: &Threshold, level: EscalationLevel, value: Option<f64>) -> String {
    let units = threshold.units.as_deref().unwrap_or("");
    let trip = threshold.trip_point(level).unwrap_or(threshold.value);
    match value {
        Some(v) => format!(
            "{}: {:.2}{} is {} the {} limit of {:.2}{}",
            threshold.name,
            v,
            units,
            match threshold.direction {
                crate::thresholds::Direction::Above => "above",
                crate::thresholds::Direction::Below => "below",
            },
            level,
            trip,
            units
        ),
        None => format!("{}: {} condition", threshold.name, level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MockAudioAlert;
    use crate::clock::ManualClock;
    use crate::events::AlarmSubscriber;
    use crate::thresholds::Direction;

    #[derive(Default)]
    struct FakeAudio {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl AudioAlert for FakeAudio {
        fn play_alarm_sound(&self, alarm_type: &AlarmType, level: EscalationLevel) -> Result<bool> {
            self.calls.lock().push(format!("play {} {}", alarm_type, level));
            if self.fail {
                Err(BosunError::Audio("speaker disconnected".into()))
            } else {
                Ok(true)
            }
        }

        fn stop_alarm_sound(&self, alarm_type: &AlarmType) {
            self.calls.lock().push(format!("stop {}", alarm_type));
        }

        fn test_alarm_sound(&self, _: &AlarmType, _: EscalationLevel, _: Duration) -> Result<bool> {
            Ok(!self.fail)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AlarmEvent>>);

    impl AlarmSubscriber for Recorder {
        fn on_alarm_event(&self, event: &AlarmEvent) {
            self.0.lock().push(event.clone());
        }
    }

    impl Recorder {
        fn kinds(&self) -> Vec<TransitionKind> {
            self.0.lock().iter().map(|e| e.kind).collect()
        }
    }

    struct Fixture {
        manager: AlarmManager,
        clock: Arc<ManualClock>,
        audio: Arc<FakeAudio>,
        recorder: Arc<Recorder>,
    }

    fn fixture_with(audio: FakeAudio) -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let audio = Arc::new(audio);
        let events = Arc::new(EventDispatcher::default());
        let recorder = Arc::new(Recorder::default());
        events.subscribe(recorder.clone());
        let manager = AlarmManager::new(clock.clone(), audio.clone(), events);
        Fixture {
            manager,
            clock,
            audio,
            recorder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeAudio::default())
    }

    fn depth() -> Threshold {
        Threshold::new("depth", AlarmType::ShallowWater, "depth", Direction::Below, 1.5)
            .with_warning(2.5)
            .with_hysteresis(0.1)
    }

    fn wind() -> Threshold {
        Threshold::new("wind", AlarmType::Custom("high-wind".into()), "wind.trueSpeed", Direction::Above, 35.0)
            .with_warning(25.0)
            .with_hysteresis(2.0)
    }

    fn feed(manager: &AlarmManager, threshold: &Threshold, value: f64) -> Evaluation {
        manager.evaluate_threshold(threshold, Some(value), Instant::now())
    }

    #[test]
    fn test_raise_plays_and_records() {
        let f = fixture();
        let t = depth();
        feed(&f.manager, &t, 1.4);

        let occ = f.manager.get("depth").unwrap();
        assert_eq!(occ.escalation_level, EscalationLevel::Critical);
        assert_eq!(occ.threshold_value, Some(1.5));
        assert_eq!(occ.value, Some(1.4));
        assert!(f.manager.is_audible("depth"));
        assert_eq!(f.audio.calls.lock().as_slice(), ["play shallow-water critical"]);

        let events = f.recorder.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TransitionKind::Raised);
        assert!(events[0].response_latency_ms.is_some());
    }

    #[test]
    fn test_acknowledge_keeps_alarm_audible() {
        let f = fixture();
        feed(&f.manager, &depth(), 1.4);

        let occ = f.manager.acknowledge_alarm("depth", "skipper").unwrap();
        assert_eq!(occ.acknowledged_by.as_deref(), Some("skipper"));
        assert!(f.manager.is_audible("depth"));
        assert_eq!(f.manager.active_count(), 1);

        assert!(matches!(
            f.manager.acknowledge_alarm("nope", "skipper"),
            Err(BosunError::NotFound(_))
        ));
    }

    #[test]
    fn test_critical_snooze_needs_override() {
        let f = fixture();
        feed(&f.manager, &depth(), 1.4);

        assert!(!f.manager.snooze_alarm("depth", chrono::Duration::minutes(5), "busy", false));
        assert!(f.manager.is_audible("depth"));
        assert_eq!(f.manager.get("depth").unwrap().snooze_count, 0);

        assert!(f.manager.snooze_alarm("depth", chrono::Duration::minutes(5), "grounding expected", true));
        assert!(!f.manager.is_audible("depth"));
        assert_eq!(f.manager.active_snooze_count(), 1);
    }

    #[test]
    fn test_snooze_duration_bounds() {
        let f = fixture();
        feed(&f.manager, &wind(), 30.0);

        assert!(!f.manager.snooze_alarm("wind", chrono::Duration::minutes(16), "", false));
        assert!(!f.manager.snooze_alarm("wind", chrono::Duration::zero(), "", false));
        assert!(matches!(
            f.manager.try_snooze("wind", chrono::Duration::seconds(-1), "", false),
            Err(BosunError::SnoozeRejected(_))
        ));
        assert!(f.manager.snooze_alarm("wind", chrono::Duration::minutes(15), "", false));
    }

    #[test]
    fn test_cancel_snooze_is_idempotent() {
        let f = fixture();
        assert!(!f.manager.cancel_snooze("wind"));

        feed(&f.manager, &wind(), 30.0);
        assert!(!f.manager.cancel_snooze("wind"));

        assert!(f.manager.snooze_alarm("wind", chrono::Duration::minutes(5), "", false));
        assert!(f.manager.cancel_snooze("wind"));
        assert!(!f.manager.cancel_snooze("wind"));
        assert!(f.manager.is_audible("wind"));
    }

    #[test]
    fn test_snooze_expires_on_next_touch() {
        let f = fixture();
        let t = wind();
        feed(&f.manager, &t, 30.0);
        assert!(f.manager.snooze_alarm("wind", chrono::Duration::minutes(5), "", false));

        f.clock.advance(chrono::Duration::minutes(6));
        assert!(f.manager.is_audible("wind"), "expired snooze no longer suppresses");

        feed(&f.manager, &t, 30.0);
        let occ = f.manager.get("wind").unwrap();
        assert!(occ.snooze.is_none());
        assert_eq!(occ.snooze_count, 1);
        assert_eq!(f.recorder.kinds().last(), Some(&TransitionKind::Unsnoozed));
    }

    #[test]
    fn test_escalation_overrides_snooze() {
        let f = fixture();
        let t = depth();
        feed(&f.manager, &t, 2.0);
        assert_eq!(f.manager.get("depth").unwrap().escalation_level, EscalationLevel::Warning);
        assert!(f.manager.snooze_alarm("depth", chrono::Duration::minutes(10), "anchoring", false));
        assert!(!f.manager.is_audible("depth"));

        feed(&f.manager, &t, 1.2);
        let occ = f.manager.get("depth").unwrap();
        assert_eq!(occ.escalation_level, EscalationLevel::Critical);
        assert!(occ.snooze.is_none());
        assert!(f.manager.is_audible("depth"));
        assert_eq!(
            f.audio.calls.lock().last().map(String::as_str),
            Some("play shallow-water critical")
        );
        let kinds = f.recorder.kinds();
        assert_eq!(&kinds[kinds.len() - 2..], &[TransitionKind::Unsnoozed, TransitionKind::Escalated]);
    }

    #[test]
    fn test_hysteresis_clear_stops_audio() {
        let f = fixture();
        let t = Threshold::new("depth", AlarmType::ShallowWater, "depth", Direction::Below, 1.5).with_hysteresis(0.1);
        feed(&f.manager, &t, 1.4);
        feed(&f.manager, &t, 1.55);
        assert!(f.manager.get("depth").is_some());

        feed(&f.manager, &t, 1.65);
        assert!(f.manager.get("depth").is_none());
        assert_eq!(f.audio.calls.lock().last().map(String::as_str), Some("stop shallow-water"));
        assert_eq!(f.recorder.kinds(), vec![TransitionKind::Raised, TransitionKind::Cleared]);
    }

    #[test]
    fn test_sensor_dropout_holds_alarm() {
        let f = fixture();
        let t = depth();
        feed(&f.manager, &t, 1.4);
        f.manager.evaluate_threshold(&t, None, Instant::now());
        feed(&f.manager, &t, f64::NAN);
        let occ = f.manager.get("depth").unwrap();
        assert_eq!(occ.escalation_level, EscalationLevel::Critical);
        assert_eq!(occ.value, Some(1.4));
    }

    #[test]
    fn test_audio_failure_does_not_abort_transition() {
        let f = fixture_with(FakeAudio {
            fail: true,
            ..Default::default()
        });
        feed(&f.manager, &depth(), 1.4);

        assert!(f.manager.get("depth").is_some());
        let events = f.recorder.0.lock();
        assert!(events[0].audio.is_failure());
    }

    #[test]
    fn test_muted_level_suppressed_but_critical_always_plays() {
        let f = fixture();
        let mut settings = ProfileSettings::default();
        settings.sound_enabled = false;
        f.manager.set_settings(settings);

        feed(&f.manager, &wind(), 30.0);
        assert!(!f.manager.is_audible("wind"));

        feed(&f.manager, &depth(), 1.4);
        assert!(f.manager.is_audible("depth"));
        assert!(f.audio.calls.lock().contains(&"play shallow-water critical".to_string()));
    }

    #[test]
    fn test_dismiss_only_non_critical() {
        let f = fixture();
        feed(&f.manager, &depth(), 2.0);
        assert!(matches!(
            f.manager.dismiss_alarm("depth", "crew"),
            Err(BosunError::Validation(_))
        ));

        feed(&f.manager, &wind(), 30.0);
        f.manager.dismiss_alarm("wind", "crew").unwrap();
        assert!(f.manager.get("wind").is_none());
    }

    #[test]
    fn test_info_synthetic_auto_acknowledged() {
        let f = fixture();
        let occ = f
            .manager
            .raise_synthetic(AlarmType::Custom("anchor-watch".into()), EscalationLevel::Info, "anchor", "Anchor watch armed");
        assert_eq!(occ.acknowledged_by.as_deref(), Some(SYSTEM_ACTOR));
        assert_eq!(f.recorder.kinds(), vec![TransitionKind::Raised, TransitionKind::Acknowledged]);
    }

    #[test]
    fn test_synthetic_raise_is_idempotent_and_clearable() {
        let f = fixture();
        f.manager.raise_synthetic(AlarmType::GpsLoss, EscalationLevel::Critical, "gps", "No fix");
        let again = f.manager.raise_synthetic(AlarmType::GpsLoss, EscalationLevel::Critical, "gps", "No fix");
        assert_eq!(again.snooze_count, 0);
        assert_eq!(f.recorder.kinds(), vec![TransitionKind::Raised]);

        assert!(f.manager.clear_alarm("gps-loss"));
        assert!(!f.manager.clear_alarm("gps-loss"));
    }

    #[test]
    fn test_level_ignores_ack_and_snooze_history() {
        let plain = fixture();
        let handled = fixture();
        let t = depth();
        let values = [2.0, 1.4, 1.55, 2.0, 2.7];

        for (i, v) in values.iter().enumerate() {
            let a = feed(&plain.manager, &t, *v);
            let b = feed(&handled.manager, &t, *v);
            assert_eq!(a.level, b.level);
            if i == 0 {
                handled.manager.acknowledge_alarm("depth", "crew").unwrap();
                handled.manager.snooze_alarm("depth", chrono::Duration::minutes(2), "", false);
            }
        }
    }

    fn battery_voltage() -> Threshold {
        Threshold::new("battery.voltage", AlarmType::LowBattery, "electrical.batteryVoltage", Direction::Below, 11.8)
            .with_warning(12.2)
            .with_hysteresis(0.1)
    }

    fn battery_charge() -> Threshold {
        Threshold::new("battery.stateOfCharge", AlarmType::LowBattery, "electrical.stateOfCharge", Direction::Below, 20.0)
            .with_warning(50.0)
            .with_hysteresis(2.0)
    }

    #[test]
    fn test_clearing_one_alarm_keeps_same_type_sibling_sounding() {
        let f = fixture();
        let (voltage, charge) = (battery_voltage(), battery_charge());
        feed(&f.manager, &charge, 40.0);
        feed(&f.manager, &voltage, 11.0);

        assert!(f.manager.snooze_alarm("battery.stateOfCharge", chrono::Duration::minutes(5), "charging", false));
        feed(&f.manager, &charge, 60.0);

        assert!(f.manager.get("battery.stateOfCharge").is_none());
        assert!(f.manager.is_audible("battery.voltage"));
        assert_eq!(
            f.audio.calls.lock().as_slice(),
            ["play low-battery warning", "play low-battery critical"]
        );

        feed(&f.manager, &voltage, 12.8);
        assert_eq!(f.audio.calls.lock().last().map(String::as_str), Some("stop low-battery"));
    }

    #[test]
    fn test_clearing_loudest_sibling_drops_to_remaining_level() {
        let f = fixture();
        let (voltage, charge) = (battery_voltage(), battery_charge());
        feed(&f.manager, &charge, 40.0);
        feed(&f.manager, &voltage, 11.0);
        feed(&f.manager, &voltage, 12.8);

        assert!(f.manager.is_audible("battery.stateOfCharge"));
        assert_eq!(
            f.audio.calls.lock().as_slice(),
            [
                "play low-battery warning",
                "play low-battery critical",
                "play low-battery warning"
            ]
        );
        let cleared = f.recorder.0.lock().last().cloned().unwrap();
        assert_eq!(cleared.kind, TransitionKind::Cleared);
        assert_eq!(cleared.audio, AudioOutcome::Stopped);
    }

    #[test]
    fn test_quieter_sibling_does_not_lower_the_speaker() {
        let f = fixture();
        feed(&f.manager, &battery_voltage(), 11.0);
        feed(&f.manager, &battery_charge(), 40.0);

        assert_eq!(f.audio.calls.lock().as_slice(), ["play low-battery critical"]);
        assert!(f.manager.is_audible("battery.stateOfCharge"));
    }

    #[test]
    fn test_concurrent_readings_for_one_alarm_raise_once() {
        let f = fixture();
        let t = depth();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        feed(&f.manager, &t, 1.2);
                    }
                });
            }
        });

        assert_eq!(f.manager.active_count(), 1);
        assert_eq!(f.recorder.kinds(), vec![TransitionKind::Raised]);
        assert_eq!(f.audio.calls.lock().as_slice(), ["play shallow-water critical"]);
    }

    #[test]
    fn test_with_mock_audio_expectations() {
        let mut audio = MockAudioAlert::new();
        audio
            .expect_play_alarm_sound()
            .withf(|t, l| *t == AlarmType::EngineOverheat && *l == EscalationLevel::Emergency)
            .times(1)
            .returning(|_, _| Ok(true));
        audio.expect_stop_alarm_sound().times(1).return_const(());

        let manager = AlarmManager::new(
            Arc::new(ManualClock::starting_now()),
            Arc::new(audio),
            Arc::new(EventDispatcher::default()),
        );
        let t = Threshold::new("ect", AlarmType::EngineOverheat, "engine.coolantTemp", Direction::Above, 95.0)
            .with_emergency(105.0)
            .with_hysteresis(2.0);
        feed(&manager, &t, 110.0);
        feed(&manager, &t, 80.0);
        assert_eq!(manager.active_count(), 0);
    }
}
