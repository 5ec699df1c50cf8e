// src/events.rs - Transition event dispatch
//
// The alarm manager emits one event per committed transition. Collaborators
// (history ledger, UI, persistence hooks) subscribe independently instead of
// being called directly from the state machine.

use crate::alarms::{ActiveAlarmOccurrence, EscalationLevel};
use crate::audio::AudioOutcome;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Closed set of occurrence transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Occurrence created on first crossing
    Raised,
    /// Level rose while active
    Escalated,
    /// Level fell while still active
    DeEscalated,
    /// Operator acknowledged
    Acknowledged,
    /// Audio suppressed for a bounded period
    Snoozed,
    /// Snooze cancelled, expired or overridden by a higher level
    Unsnoozed,
    /// Condition recrossed its recovery band or was dismissed
    Cleared,
    /// Operator marked the occurrence as a false positive
    FalsePositiveFlagged,
}

/// One committed transition
#[derive(Debug, Clone)]
pub struct AlarmEvent {
    /// What happened
    pub kind: TransitionKind,
    /// Occurrence state after the transition
    pub occurrence: ActiveAlarmOccurrence,
    /// Level before the transition
    pub previous_level: Option<EscalationLevel>,
    /// When the transition was committed
    pub timestamp: DateTime<Utc>,
    /// Audio side effect of the transition
    pub audio: AudioOutcome,
    /// Reading-arrival to audio latency, for budget tracking
    pub response_latency_ms: Option<u64>,
}

/// Receiver of transition events
///
/// Called while the alarm's transition lock is held, so implementations must
/// not call back into the alarm manager for the same alarm.
pub trait AlarmSubscriber: Send + Sync {
    /// Handle one event
    fn on_alarm_event(&self, event: &AlarmEvent);
}

/// Fan-out of transition events to subscribers and a broadcast channel
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn AlarmSubscriber>>>,
    tx: broadcast::Sender<AlarmEvent>,
}

impl EventDispatcher {
    /// Dispatcher whose broadcast channel buffers `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            subscribers: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Register a synchronous subscriber
    pub fn subscribe(&self, subscriber: Arc<dyn AlarmSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Open a broadcast receiver (UI and other async consumers)
    pub fn receiver(&self) -> broadcast::Receiver<AlarmEvent> {
        self.tx.subscribe()
    }

    /// Live broadcast receivers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver `event` to every subscriber, then broadcast it
    pub fn publish(&self, event: AlarmEvent) {
        for subscriber in self.subscribers.read().iter() {
            subscriber.on_alarm_event(&event);
        }
        if self.tx.send(event).is_err() {
            debug!("No broadcast receivers for alarm event");
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
