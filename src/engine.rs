// src/engine.rs
//
// Composition root. `AlarmEngine` wires the registry, profile store, alarm
// state machine, history ledger, monitors and persistence together. It is
// constructed explicitly; nothing in the crate is a global.

use crate::alarm_manager::AlarmManager;
use crate::alarms::{ActiveAlarmOccurrence, AlarmType, SnoozeRecord};
use crate::audio::AudioAlert;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::diagnostics::{DiagnosticResult, Diagnostics};
use crate::error::Result;
use crate::evaluator::Evaluation;
use crate::events::{AlarmEvent, AlarmSubscriber, EventDispatcher};
use crate::health::{HealthInputs, SystemHealth};
use crate::history::{AlarmHistoryEntry, AlarmLedger, AlarmStatistics, HistoryFilter};
use crate::monitors::MonitorSet;
use crate::profiles::{ConfigurationProfile, ProfileStore, ProfileUpdate};
use crate::sensors::{SensorBus, SensorSnapshot};
use crate::storage::{PersistedState, PersistenceBackend, RestoredState, SCHEMA_VERSION};
use crate::thresholds::ThresholdRegistry;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Snapshot field reporting a valid GPS fix (1.0) or none (0.0)
pub const GPS_FIX_PATH: &str = "gps.hasFix";

/// Snapshot field reporting autopilot engagement; engaged reports are heartbeats
pub const AUTOPILOT_ENGAGED_PATH: &str = "autopilot.engaged";

/// Flags unsaved state whenever an alarm transition lands in the ledger
struct MarkDirty(Arc<AtomicBool>);

impl AlarmSubscriber for MarkDirty {
    fn on_alarm_event(&self, _: &AlarmEvent) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub scan_count: u64,
    pub error_count: u64,
    pub uptime_secs: u64,
    pub active_alarms: usize,
    pub history_size: usize,
}

pub struct AlarmEngine {
    config: Config,
    clock: Arc<dyn Clock>,
    events: Arc<EventDispatcher>,
    manager: Arc<AlarmManager>,
    ledger: Arc<AlarmLedger>,
    profiles: ProfileStore,
    monitors: MonitorSet,
    diagnostics: Diagnostics,
    persistence: Option<Arc<dyn PersistenceBackend>>,
    running: Arc<AtomicBool>,
    dirty: Arc<AtomicBool>,
    scan_count: AtomicU64,
    error_count: AtomicU64,
    start_time: Instant,
}

impl AlarmEngine {
    pub fn new(config: Config, audio: Arc<dyn AudioAlert>) -> Result<Self> {
        Self::with_clock(config, audio, Arc::new(SystemClock))
    }

    /// Engine driven by an explicit clock
    pub fn with_clock(config: Config, audio: Arc<dyn AudioAlert>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let registry = ThresholdRegistry::new(config.installation);
        let profiles = ProfileStore::new(registry, clock.clone());

        let events = Arc::new(EventDispatcher::default());
        let ledger = Arc::new(
            AlarmLedger::new(config.history.capacity, clock.clone()).with_response_budget_ms(config.response_budget_ms),
        );
        events.subscribe(ledger.clone());
        let dirty = Arc::new(AtomicBool::new(false));
        events.subscribe(Arc::new(MarkDirty(dirty.clone())));

        let manager = Arc::new(
            AlarmManager::new(clock.clone(), audio.clone(), events.clone())
                .with_response_budget(config.response_budget())
                .with_settings(profiles.current().settings),
        );

        let monitors = MonitorSet::new(
            manager.clone(),
            clock.clone(),
            config.monitors.poll_interval(),
            config.monitors.gps_timeout(),
            config.monitors.autopilot_timeout(),
        );
        let diagnostics = Diagnostics::new(audio, events.clone(), clock.clone());

        info!(
            "Alarm engine ready: {} default thresholds, budget {} ms",
            profiles.current().thresholds.len(),
            config.response_budget_ms
        );

        Ok(Self {
            config,
            clock,
            events,
            manager,
            ledger,
            profiles,
            monitors,
            diagnostics,
            persistence: None,
            running: Arc::new(AtomicBool::new(false)),
            dirty,
            scan_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    /// Attach durable storage
    pub fn with_persistence(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.persistence = Some(backend);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn alarm_manager(&self) -> &Arc<AlarmManager> {
        &self.manager
    }

    pub fn ledger(&self) -> &Arc<AlarmLedger> {
        &self.ledger
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    // ==========================================
    // Readings
    // ==========================================

    /// Evaluate every enabled threshold of the current profile against a
    /// snapshot; returns the evaluations that crossed a level
    pub fn process_readings(&self, snapshot: &SensorSnapshot) -> Vec<(String, Evaluation)> {
        if let Some(fix) = snapshot.get(GPS_FIX_PATH) {
            self.monitors.update_gps_status(fix != 0.0);
        }
        if let Some(engaged) = snapshot.get(AUTOPILOT_ENGAGED_PATH) {
            self.monitors.update_autopilot_status(engaged != 0.0);
        }

        let profile = self.profiles.current();
        let mut crossed = Vec::new();
        for threshold in profile.enabled_thresholds() {
            let reading = snapshot.get(&threshold.data_path);
            let evaluation = self.manager.evaluate_threshold(threshold, reading, snapshot.received_at);
            if evaluation.crossed {
                debug!("{} crossed to {:?}", threshold.id, evaluation.level);
                crossed.push((threshold.id.clone(), evaluation));
            }
        }
        crossed
    }

    // ==========================================
    // Alarm operations
    // ==========================================

    pub fn active_alarms(&self) -> Vec<ActiveAlarmOccurrence> {
        self.manager.active_alarms()
    }

    pub fn acknowledge_alarm(&self, alarm_id: &str, by: &str) -> Result<ActiveAlarmOccurrence> {
        self.manager.acknowledge_alarm(alarm_id, by)
    }

    pub fn snooze_alarm(&self, alarm_id: &str, duration: chrono::Duration, reason: &str, allow_critical: bool) -> bool {
        self.manager.snooze_alarm(alarm_id, duration, reason, allow_critical)
    }

    pub fn try_snooze(
        &self,
        alarm_id: &str,
        duration: chrono::Duration,
        reason: &str,
        allow_critical: bool,
    ) -> Result<SnoozeRecord> {
        self.manager.try_snooze(alarm_id, duration, reason, allow_critical)
    }

    pub fn cancel_snooze(&self, alarm_id: &str) -> bool {
        self.manager.cancel_snooze(alarm_id)
    }

    pub fn dismiss_alarm(&self, alarm_id: &str, by: &str) -> Result<()> {
        self.manager.dismiss_alarm(alarm_id, by)
    }

    /// Async receiver of every transition (UI)
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmEvent> {
        self.events.receiver()
    }

    /// Register an additional synchronous subscriber
    pub fn add_subscriber(&self, subscriber: Arc<dyn AlarmSubscriber>) {
        self.events.subscribe(subscriber);
    }

    // ==========================================
    // History
    // ==========================================

    pub fn query_history(&self, filter: &HistoryFilter) -> Vec<AlarmHistoryEntry> {
        self.ledger.query(filter)
    }

    pub fn alarm_statistics(&self, window: chrono::Duration) -> AlarmStatistics {
        self.ledger.statistics(window)
    }

    pub fn flag_false_positive(&self, occurrence_id: Uuid) -> Result<AlarmHistoryEntry> {
        let entry = self.ledger.flag_false_positive(occurrence_id)?;
        self.mark_dirty();
        Ok(entry)
    }

    // ==========================================
    // Profiles
    // ==========================================

    pub fn current_profile(&self) -> ConfigurationProfile {
        self.profiles.current()
    }

    pub fn list_profiles(&self) -> Vec<ConfigurationProfile> {
        self.profiles.list()
    }

    pub fn create_profile(&self, name: &str, description: &str, base_id: Option<&str>) -> Result<ConfigurationProfile> {
        let profile = self.profiles.create_profile(name, description, base_id)?;
        self.mark_dirty();
        Ok(profile)
    }

    pub fn switch_profile(&self, id: &str) -> Result<ConfigurationProfile> {
        let profile = self.profiles.switch_profile(id)?;
        self.apply_current_profile();
        self.mark_dirty();
        Ok(profile)
    }

    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<ConfigurationProfile> {
        let profile = self.profiles.update_profile(id, update)?;
        if self.profiles.current_id() == profile.id {
            self.apply_current_profile();
        }
        self.mark_dirty();
        Ok(profile)
    }

    pub fn delete_profile(&self, id: &str) -> Result<()> {
        self.profiles.delete_profile(id)?;
        self.mark_dirty();
        Ok(())
    }

    pub fn export_profile(&self, id: &str) -> Result<String> {
        self.profiles.export_profile(id)
    }

    pub fn import_profile(&self, text: &str) -> Result<ConfigurationProfile> {
        let profile = self.profiles.import_profile(text)?;
        self.mark_dirty();
        Ok(profile)
    }

    /// Push the current profile's settings to the state machine and clear
    /// threshold alarms the profile no longer evaluates
    fn apply_current_profile(&self) {
        let profile = self.profiles.current();
        self.manager.set_settings(profile.settings.clone());

        let evaluated: HashSet<&str> = profile.enabled_thresholds().map(|t| t.id.as_str()).collect();
        for occ in self.manager.active_alarms() {
            let synthetic = matches!(occ.alarm_type, AlarmType::GpsLoss | AlarmType::AutopilotFailure)
                && occ.alarm_id == occ.alarm_type.as_str();
            if !synthetic && !evaluated.contains(occ.alarm_id.as_str()) {
                info!("Clearing {}: threshold no longer evaluated by profile '{}'", occ.alarm_id, profile.name);
                self.manager.clear_alarm(&occ.alarm_id);
            }
        }
    }

    // ==========================================
    // Monitors
    // ==========================================

    /// Spawn the GPS and autopilot polling tasks on the current runtime
    pub fn start_monitors(&self) {
        self.monitors.start();
    }

    pub fn stop_monitors(&self) {
        self.monitors.stop();
    }

    /// Poll both monitors once
    pub fn check_monitors(&self) {
        self.monitors.check_all();
    }

    pub fn update_gps_status(&self, has_fix: bool) {
        self.monitors.update_gps_status(has_fix);
    }

    pub fn update_autopilot_status(&self, engaged: bool) {
        self.monitors.update_autopilot_status(engaged);
    }

    // ==========================================
    // Health and diagnostics
    // ==========================================

    pub fn get_system_health(&self) -> SystemHealth {
        let profile = self.profiles.current();
        let active = self.manager.active_alarms();
        SystemHealth::assess(HealthInputs {
            timestamp: self.clock.now(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            profile_count: self.profiles.count(),
            current_profile: &profile,
            history_size: self.ledger.len(),
            active_alarms: &active,
            active_snoozes: self.manager.active_snooze_count(),
        })
    }

    pub fn test_all_alarm_systems(&self) -> Vec<DiagnosticResult> {
        self.diagnostics.run_all()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            running: self.running.load(Ordering::Relaxed),
            scan_count: self.scan_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_alarms: self.manager.active_count(),
            history_size: self.ledger.len(),
        }
    }

    // ==========================================
    // Persistence
    // ==========================================

    /// Current durable state document
    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            schema_version: SCHEMA_VERSION,
            saved_at: self.clock.now(),
            current_profile_id: self.profiles.current_id(),
            profiles: self.profiles.list(),
            alarm_history: self.ledger.tail(self.config.history.persist_limit),
        }
    }

    /// Write state to the attached backend; no-op without one
    pub async fn save_state(&self) -> Result<()> {
        let Some(backend) = &self.persistence else {
            return Ok(());
        };
        // Cleared before encoding so changes racing the write stay pending
        self.dirty.store(false, Ordering::Relaxed);
        let saved = match self.persisted_state().encode() {
            Ok(text) => backend.save(&text).await,
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            self.mark_dirty();
            return Err(e);
        }
        debug!("Engine state saved");
        Ok(())
    }

    /// Restore state from the attached backend
    ///
    /// Missing or unreadable state leaves the defaults in place. Only a
    /// backend I/O failure is returned as an error.
    pub async fn load_state(&self) -> Result<RestoredState> {
        let Some(backend) = &self.persistence else {
            return Ok(RestoredState::default());
        };
        let Some(text) = backend.load().await? else {
            info!("No persisted state, using defaults");
            return Ok(RestoredState::default());
        };

        let restored = PersistedState::decode(&text);
        if !restored.profiles.is_empty() {
            let current = restored.current_profile_id.as_deref().unwrap_or(crate::profiles::DEFAULT_PROFILE_ID);
            self.profiles.restore(restored.profiles.clone(), current);
            self.apply_current_profile();
        }
        self.ledger.restore(restored.alarm_history.clone());
        Ok(restored)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    // ==========================================
    // Scan loop
    // ==========================================

    /// Evaluate the bus every scan period until [`AlarmEngine::stop`]
    pub async fn run(&self, bus: SensorBus) -> Result<()> {
        if self.running.swap(true, Ordering::Relaxed) {
            return Err(crate::error::BosunError::Config("Engine is already running".into()));
        }
        info!("Starting alarm engine with scan time: {}ms", self.config.scan_time_ms);
        self.start_monitors();

        let mut ticker = interval(self.config.scan_time());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.running.load(Ordering::Relaxed) {
            ticker.tick().await;

            // Status fields are events, not levels: consume them once
            let gps = bus.remove(GPS_FIX_PATH);
            let autopilot = bus.remove(AUTOPILOT_ENGAGED_PATH);
            let mut snapshot = bus.snapshot();
            if let Some(reading) = gps {
                snapshot.insert(GPS_FIX_PATH, reading.value);
            }
            if let Some(reading) = autopilot {
                snapshot.insert(AUTOPILOT_ENGAGED_PATH, reading.value);
            }

            self.process_readings(&snapshot);
            self.scan_count.fetch_add(1, Ordering::Relaxed);

            if self.config.persistence.autosave && self.dirty.load(Ordering::Relaxed) {
                if let Err(e) = self.save_state().await {
                    let errors = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
                    error!("Autosave failed (#{}): {}", errors, e);
                }
            }
        }

        self.stop_monitors();
        info!("Alarm engine stopped");
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            warn!("Stop requested but engine is not running");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}
