// src/audio.rs - Audio alert collaborator boundary
//
// Platform sound playback lives outside the engine. The engine only needs a
// play/stop/test contract; a `false` or `Err` result is a non-fatal failure
// that gets logged and flagged on the history entry.

use crate::alarms::{AlarmType, EscalationLevel};
use crate::error::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Sound output used by the alarm manager
#[cfg_attr(test, mockall::automock)]
pub trait AudioAlert: Send + Sync {
    /// Start (or switch) the sound for `alarm_type` at `level`
    fn play_alarm_sound(&self, alarm_type: &AlarmType, level: EscalationLevel) -> Result<bool>;

    /// Stop any sound for `alarm_type`
    fn stop_alarm_sound(&self, alarm_type: &AlarmType);

    /// Play a short test tone
    fn test_alarm_sound(&self, alarm_type: &AlarmType, level: EscalationLevel, duration: Duration) -> Result<bool>;
}

/// Result of asking the collaborator to act
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioOutcome {
    /// No audio action was needed
    Unchanged,
    /// Sound started
    Played,
    /// Sound stopped
    Stopped,
    /// Sound intentionally not played (muted level or active snooze)
    Suppressed,
    /// Collaborator returned `false` or an error
    Failed(String),
}

impl AudioOutcome {
    /// Collaborator failure
    pub fn is_failure(&self) -> bool {
        matches!(self, AudioOutcome::Failed(_))
    }
}

/// Audio command derived from a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCommand {
    None,
    Play(AlarmType, EscalationLevel),
    Stop(AlarmType),
    Suppress(AlarmType),
}

impl AudioCommand {
    /// Execute against `audio`, never propagating collaborator failure
    pub fn dispatch(&self, audio: &dyn AudioAlert) -> AudioOutcome {
        match self {
            AudioCommand::None => AudioOutcome::Unchanged,
            AudioCommand::Play(alarm_type, level) => match audio.play_alarm_sound(alarm_type, *level) {
                Ok(true) => AudioOutcome::Played,
                Ok(false) => {
                    warn!("Audio collaborator refused to play {} at {}", alarm_type, level);
                    AudioOutcome::Failed("playback returned false".to_string())
                }
                Err(e) => {
                    warn!("Audio playback for {} at {} failed: {}", alarm_type, level, e);
                    AudioOutcome::Failed(e.to_string())
                }
            },
            AudioCommand::Stop(alarm_type) => {
                audio.stop_alarm_sound(alarm_type);
                AudioOutcome::Stopped
            }
            AudioCommand::Suppress(alarm_type) => {
                audio.stop_alarm_sound(alarm_type);
                AudioOutcome::Suppressed
            }
        }
    }
}

/// Audio stand-in that only logs
///
/// Used by the binary and in headless installations where another process
/// owns the speaker.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAudio;

impl AudioAlert for LoggingAudio {
    fn play_alarm_sound(&self, alarm_type: &AlarmType, level: EscalationLevel) -> Result<bool> {
        info!("[audio] play {} at {}", alarm_type, level);
        Ok(true)
    }

    fn stop_alarm_sound(&self, alarm_type: &AlarmType) {
        info!("[audio] stop {}", alarm_type);
    }

    fn test_alarm_sound(&self, alarm_type: &AlarmType, level: EscalationLevel, duration: Duration) -> Result<bool> {
        info!("[audio] test {} at {} for {:?}", alarm_type, level, duration);
        Ok(true)
    }
}
