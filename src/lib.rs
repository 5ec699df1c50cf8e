//! Bosun - critical alarm engine for shipboard instruments
//!
//! Turns continuously arriving sensor readings into escalating, audible
//! alarms with hysteresis, a bounded snooze policy and an auditable history.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use bosun::{AlarmEngine, Config, LoggingAudio, SensorSnapshot};
//!
//! let engine = AlarmEngine::new(Config::default(), Arc::new(LoggingAudio))?;
//!
//! // Depth below the default critical floor
//! engine.process_readings(&SensorSnapshot::new().with("depth", 1.6));
//! assert_eq!(engine.active_alarms()[0].alarm_id, "depth");
//! # Ok::<(), bosun::BosunError>(())
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type and result alias
pub mod error;

/// Injectable wall clock
pub mod clock;

/// Alarm types, escalation levels and occurrences
pub mod alarms;

/// Threshold definitions and contextual defaults
pub mod thresholds;

/// Stateless threshold evaluation with hysteresis
pub mod evaluator;

/// Audio collaborator boundary
pub mod audio;

/// Transition events and subscribers
pub mod events;

/// Alarm state machine
pub mod alarm_manager;

/// Bounded alarm history and statistics
pub mod history;

/// Configuration profiles
pub mod profiles;

/// GPS and autopilot watchers
pub mod monitors;

/// Sensor snapshots and the latest-value bus
pub mod sensors;

// ============================================================================
// RUNTIME MODULES
// ============================================================================

/// YAML configuration
pub mod config;

/// Durable state boundary
pub mod storage;

/// Alarm chain self test
pub mod diagnostics;

/// Derived health view
pub mod health;

/// Composition root and scan loop
pub mod engine;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use alarm_manager::AlarmManager;
pub use alarms::{ActiveAlarmOccurrence, AlarmType, EscalationLevel, SnoozeRecord};
pub use audio::{AudioAlert, LoggingAudio};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::AlarmEngine;
pub use error::{BosunError, Result};
pub use evaluator::{evaluate, Evaluation};
pub use events::{AlarmEvent, AlarmSubscriber, TransitionKind};
pub use history::{AlarmHistoryEntry, AlarmLedger, AlarmStatistics, HistoryFilter};
pub use profiles::{ConfigurationProfile, ProfileSettings, ProfileUpdate};
pub use sensors::{SensorBus, SensorSnapshot};
pub use thresholds::{Direction, Threshold, ThresholdRegistry};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Bosun version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub mod build_info {
    /// Git commit hash (if available)
    pub const GIT_HASH: Option<&str> = option_env!("GIT_HASH");

    /// Build timestamp
    pub const BUILD_TIMESTAMP: &str = env!("BOSUN_BUILD_TIMESTAMP");

    /// Rust version used for compilation
    pub const RUSTC_VERSION: &str = env!("BOSUN_RUST_VERSION");

    /// Build profile (debug/release)
    pub const PROFILE: &str = env!("BOSUN_PROFILE");

    /// One-line summary for logs and `--version`
    pub fn summary() -> String {
        format!(
            "bosun {} ({}, {} build, {})",
            super::VERSION,
            GIT_HASH.unwrap_or("unknown commit"),
            PROFILE,
            BUILD_TIMESTAMP
        )
    }
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize logging for embedding applications
///
/// Honors `RUST_LOG` and defaults to `bosun=info`. Calling it more than once
/// is harmless.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bosun=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_ok() {
        tracing::info!("{} initialized", build_info::summary());
    }
}
