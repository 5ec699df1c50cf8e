// src/monitors.rs - Continuous condition monitors
//
// Absence-of-data conditions (GPS fix staleness, autopilot heartbeat loss)
// are not value comparisons, so they bypass the evaluator and raise synthetic
// alarms directly on the alarm manager.

use crate::alarm_manager::AlarmManager;
use crate::alarms::{AlarmType, EscalationLevel};
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default polling interval of every monitor
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watched condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    /// GPS fix staleness, armed from start
    Gps,
    /// Autopilot heartbeat, armed only while engaged
    Autopilot,
}

impl MonitorKind {
    pub fn alarm_type(self) -> AlarmType {
        match self {
            MonitorKind::Gps => AlarmType::GpsLoss,
            MonitorKind::Autopilot => AlarmType::AutopilotFailure,
        }
    }

    /// Staleness timeout used when none is configured
    pub fn default_timeout(self) -> Duration {
        match self {
            MonitorKind::Gps => Duration::from_secs(60),
            MonitorKind::Autopilot => Duration::from_secs(10),
        }
    }

    fn armed_at_start(self) -> bool {
        matches!(self, MonitorKind::Gps)
    }

    fn describe(self, silent_for: chrono::Duration) -> String {
        match self {
            MonitorKind::Gps => format!("No GPS fix for {} s", silent_for.num_seconds()),
            MonitorKind::Autopilot => format!("No autopilot heartbeat for {} s", silent_for.num_seconds()),
        }
    }
}

#[derive(Debug)]
struct MonitorState {
    armed: bool,
    last_update: DateTime<Utc>,
    fired: bool,
    started: bool,
}

/// One polled watcher feeding the alarm manager
pub struct ConditionMonitor {
    kind: MonitorKind,
    manager: Arc<AlarmManager>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    timeout: Duration,
    state: Mutex<MonitorState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConditionMonitor {
    pub fn new(
        kind: MonitorKind,
        manager: Arc<AlarmManager>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Arc<Self> {
        let now = clock.now();
        Arc::new(Self {
            kind,
            manager,
            clock,
            poll_interval,
            timeout,
            state: Mutex::new(MonitorState {
                armed: kind.armed_at_start(),
                last_update: now,
                fired: false,
                started: false,
            }),
            task: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.state.lock().last_update
    }

    /// Polling task is alive
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().map_or(false, |h| !h.is_finished())
    }

    /// One synchronous poll; returns whether the alarm condition holds
    pub fn check(&self) -> bool {
        let mut state = self.state.lock();
        if !state.armed {
            return false;
        }
        if state.fired {
            return true;
        }

        let silent_for = self.clock.now() - state.last_update;
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::max_value());
        if silent_for <= timeout {
            return false;
        }

        warn!("{:?} monitor timed out after {} s", self.kind, silent_for.num_seconds());
        state.fired = true;
        self.manager.raise_synthetic(
            self.kind.alarm_type(),
            EscalationLevel::Critical,
            &format!("monitor.{}", self.kind.alarm_type()),
            &self.kind.describe(silent_for),
        );
        true
    }

    /// Fresh data arrived; clears a fired alarm and re-arms polling
    pub fn record_update(self: &Arc<Self>) {
        let was_fired = {
            let mut state = self.state.lock();
            state.last_update = self.clock.now();
            std::mem::replace(&mut state.fired, false)
        };
        if was_fired {
            info!("{:?} data restored", self.kind);
            self.manager.clear_alarm(self.kind.alarm_type().as_str());
        }
        self.ensure_running();
    }

    /// Arm or disarm; disarming clears any alarm this monitor raised
    pub fn set_armed(self: &Arc<Self>, armed: bool) {
        let was_fired = {
            let mut state = self.state.lock();
            if state.armed == armed {
                if armed {
                    state.last_update = self.clock.now();
                }
                false
            } else {
                state.armed = armed;
                state.last_update = self.clock.now();
                std::mem::replace(&mut state.fired, false)
            }
        };
        if was_fired {
            self.manager.clear_alarm(self.kind.alarm_type().as_str());
        }
        debug!("{:?} monitor armed: {}", self.kind, armed);
        if armed {
            self.ensure_running();
        }
    }

    /// Spawn the polling task on the current runtime
    pub fn start(self: &Arc<Self>) {
        self.state.lock().started = true;
        self.ensure_running();
    }

    /// Stop polling; state is kept so a later `start` resumes
    pub fn stop(&self) {
        self.state.lock().started = false;
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    fn ensure_running(self: &Arc<Self>) {
        if !self.state.lock().started {
            return;
        }
        let mut task = self.task.lock();
        if task.as_ref().map_or(false, |h| !h.is_finished()) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("{:?} monitor update outside a runtime, polling not respawned", self.kind);
            return;
        };

        // The task only borrows the monitor per tick; dropping the last
        // owner ends polling
        let weak: Weak<Self> = Arc::downgrade(self);
        let (kind, poll_interval) = (self.kind, self.poll_interval);
        *task = Some(runtime.spawn(async move {
            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else {
                    debug!("{:?} monitor dropped, polling ends", kind);
                    break;
                };
                if monitor.check() {
                    // Fired: next update respawns the task
                    debug!("{:?} monitor polling paused until fresh data", monitor.kind);
                    break;
                }
            }
        }));
    }
}

impl Drop for ConditionMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// The GPS and autopilot monitors of one engine
pub struct MonitorSet {
    pub gps: Arc<ConditionMonitor>,
    pub autopilot: Arc<ConditionMonitor>,
}

impl MonitorSet {
    pub fn new(
        manager: Arc<AlarmManager>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        gps_timeout: Duration,
        autopilot_timeout: Duration,
    ) -> Self {
        Self {
            gps: ConditionMonitor::new(MonitorKind::Gps, manager.clone(), clock.clone(), poll_interval, gps_timeout),
            autopilot: ConditionMonitor::new(MonitorKind::Autopilot, manager, clock, poll_interval, autopilot_timeout),
        }
    }

    pub fn start(&self) {
        self.gps.start();
        self.autopilot.start();
    }

    pub fn stop(&self) {
        self.gps.stop();
        self.autopilot.stop();
    }

    pub fn check_all(&self) {
        self.gps.check();
        self.autopilot.check();
    }

    /// GPS status report; only a valid fix counts as fresh data
    pub fn update_gps_status(&self, has_fix: bool) {
        if has_fix {
            self.gps.record_update();
        }
    }

    /// Autopilot status report; engaged reports double as heartbeats
    pub fn update_autopilot_status(&self, engaged: bool) {
        if engaged {
            if self.autopilot.is_armed() {
                self.autopilot.record_update();
            } else {
                self.autopilot.set_armed(true);
            }
        } else {
            self.autopilot.set_armed(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::LoggingAudio;
    use crate::clock::ManualClock;
    use crate::events::EventDispatcher;

    fn setup() -> (MonitorSet, Arc<AlarmManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let manager = Arc::new(AlarmManager::new(
            clock.clone(),
            Arc::new(LoggingAudio),
            Arc::new(EventDispatcher::default()),
        ));
        let monitors = MonitorSet::new(
            manager.clone(),
            clock.clone(),
            Duration::from_millis(10),
            MonitorKind::Gps.default_timeout(),
            MonitorKind::Autopilot.default_timeout(),
        );
        (monitors, manager, clock)
    }

    #[test]
    fn test_gps_loss_after_61_seconds_and_clear_on_update() {
        let (monitors, manager, clock) = setup();
        assert!(!monitors.gps.check());

        clock.advance(chrono::Duration::seconds(61));
        assert!(monitors.gps.check());
        let occ = manager.get("gps-loss").unwrap();
        assert_eq!(occ.escalation_level, EscalationLevel::Critical);
        assert_eq!(occ.alarm_type, AlarmType::GpsLoss);

        monitors.update_gps_status(true);
        assert!(manager.get("gps-loss").is_none());
        assert!(!monitors.gps.check());
    }

    #[test]
    fn test_gps_without_fix_does_not_refresh() {
        let (monitors, manager, clock) = setup();
        clock.advance(chrono::Duration::seconds(40));
        monitors.update_gps_status(false);
        clock.advance(chrono::Duration::seconds(21));
        monitors.check_all();
        assert!(manager.get("gps-loss").is_some());
    }

    #[test]
    fn test_autopilot_only_while_engaged() {
        let (monitors, manager, clock) = setup();
        clock.advance(chrono::Duration::seconds(30));
        assert!(!monitors.autopilot.check());

        monitors.update_autopilot_status(true);
        clock.advance(chrono::Duration::seconds(11));
        assert!(monitors.autopilot.check());
        assert!(manager.get("autopilot-failure").is_some());

        monitors.update_autopilot_status(false);
        assert!(manager.get("autopilot-failure").is_none());
        clock.advance(chrono::Duration::seconds(60));
        assert!(!monitors.autopilot.check());
    }

    #[test]
    fn test_heartbeat_keeps_autopilot_quiet() {
        let (monitors, manager, clock) = setup();
        monitors.update_autopilot_status(true);
        for _ in 0..5 {
            clock.advance(chrono::Duration::seconds(8));
            monitors.update_autopilot_status(true);
            monitors.check_all();
        }
        assert!(manager.get("autopilot-failure").is_none());
    }

    #[tokio::test]
    async fn test_polling_task_fires_and_respawns() {
        let (monitors, manager, clock) = setup();
        monitors.start();
        assert!(monitors.gps.is_running());

        clock.advance(chrono::Duration::seconds(61));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.get("gps-loss").is_some());
        assert!(!monitors.gps.is_running(), "task pauses after firing");

        monitors.update_gps_status(true);
        assert!(manager.get("gps-loss").is_none());
        assert!(monitors.gps.is_running());

        monitors.stop();
        assert!(!monitors.gps.is_running());
    }

    #[tokio::test]
    async fn test_dropped_monitor_releases_manager() {
        let (monitors, manager, _clock) = setup();
        monitors.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(monitors.gps.is_running());

        let gps = Arc::downgrade(&monitors.gps);
        drop(monitors);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(gps.upgrade().is_none(), "polling task must not keep the monitor alive");
        assert_eq!(Arc::strong_count(&manager), 1);
    }
}
