// src/profiles.rs - Configuration profile store
//
// A profile is a named bundle of thresholds plus notification settings.
// Exactly one profile is current. Every write is validated on a copy and
// committed only when the whole result is valid.

use crate::alarms::EscalationLevel;
use crate::clock::Clock;
use crate::error::{BosunError, Result};
use crate::thresholds::{validate_thresholds, Threshold, ThresholdRegistry};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Id of the undeletable built-in profile
pub const DEFAULT_PROFILE_ID: &str = "default";

fn default_true() -> bool {
    true
}

// ==========================================
// SECTION 1: SETTINGS
// ==========================================

/// Per-level audio muting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelMuting {
    pub info: bool,
    pub warning: bool,
    pub caution: bool,
    pub critical: bool,
    pub emergency: bool,
}

impl LevelMuting {
    pub fn is_muted(&self, level: EscalationLevel) -> bool {
        match level {
            EscalationLevel::Info => self.info,
            EscalationLevel::Warning => self.warning,
            EscalationLevel::Caution => self.caution,
            EscalationLevel::Critical => self.critical,
            EscalationLevel::Emergency => self.emergency,
        }
    }

    pub fn set(&mut self, level: EscalationLevel, muted: bool) {
        match level {
            EscalationLevel::Info => self.info = muted,
            EscalationLevel::Warning => self.warning = muted,
            EscalationLevel::Caution => self.caution = muted,
            EscalationLevel::Critical => self.critical = muted,
            EscalationLevel::Emergency => self.emergency = muted,
        }
    }
}

/// Notification settings of a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    #[serde(default = "default_true")]
    pub sound_enabled: bool,

    #[serde(default = "default_true")]
    pub vibration_enabled: bool,

    #[serde(default)]
    pub level_muting: LevelMuting,

    /// Info-level occurrences are acknowledged by `system` on raise
    #[serde(default = "default_true")]
    pub auto_acknowledge_info: bool,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            vibration_enabled: true,
            level_muting: LevelMuting::default(),
            auto_acknowledge_info: true,
        }
    }
}

impl ProfileSettings {
    /// Whether audio plays at `level`
    ///
    /// Critical and emergency always play, regardless of `sound_enabled`.
    pub fn plays(&self, level: EscalationLevel) -> bool {
        level.is_critical_or_above() || (self.sound_enabled && !self.level_muting.is_muted(level))
    }

    /// Neither sound nor vibration is enabled
    pub fn all_alerts_disabled(&self) -> bool {
        !self.sound_enabled && !self.vibration_enabled
    }

    pub fn validate(&self) -> Result<()> {
        for level in [EscalationLevel::Critical, EscalationLevel::Emergency] {
            if self.level_muting.is_muted(level) {
                return Err(BosunError::Validation(format!("{} alarms cannot be muted", level)));
            }
        }
        Ok(())
    }
}

/// Partial settings change; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub sound_enabled: Option<bool>,
    #[serde(default)]
    pub vibration_enabled: Option<bool>,
    #[serde(default)]
    pub level_muting: Option<LevelMuting>,
    #[serde(default)]
    pub auto_acknowledge_info: Option<bool>,
}

impl SettingsUpdate {
    fn apply(&self, settings: &mut ProfileSettings) {
        if let Some(v) = self.sound_enabled {
            settings.sound_enabled = v;
        }
        if let Some(v) = self.vibration_enabled {
            settings.vibration_enabled = v;
        }
        if let Some(v) = self.level_muting {
            settings.level_muting = v;
        }
        if let Some(v) = self.auto_acknowledge_info {
            settings.auto_acknowledge_info = v;
        }
    }
}

// ==========================================
// SECTION 2: PROFILES
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Evaluated in order
    pub thresholds: Vec<Threshold>,
    #[serde(default)]
    pub settings: ProfileSettings,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigurationProfile {
    /// Built-in profile from registry defaults
    pub fn system_default(registry: &ThresholdRegistry, now: DateTime<Utc>) -> Self {
        Self {
            id: DEFAULT_PROFILE_ID.to_string(),
            name: "Default".to_string(),
            description: "Factory thresholds for this installation".to_string(),
            thresholds: registry.default_thresholds(),
            settings: ProfileSettings::default(),
            is_default: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn threshold(&self, id: &str) -> Option<&Threshold> {
        self.thresholds.iter().find(|t| t.id == id)
    }

    pub fn enabled_thresholds(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter().filter(|t| t.enabled)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BosunError::Validation("profile name must not be empty".into()));
        }
        validate_thresholds(&self.thresholds)?;
        self.settings.validate()
    }

    /// Replace thresholds with matching ids, append the rest
    fn merge_thresholds(&mut self, incoming: &[Threshold]) {
        for threshold in incoming {
            match self.thresholds.iter_mut().find(|t| t.id == threshold.id) {
                Some(existing) => *existing = threshold.clone(),
                None => self.thresholds.push(threshold.clone()),
            }
        }
    }
}

/// Partial profile change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Merged by threshold id
    #[serde(default)]
    pub thresholds: Option<Vec<Threshold>>,
    #[serde(default)]
    pub settings: Option<SettingsUpdate>,
}

// ==========================================
// SECTION 3: STORE
// ==========================================

#[derive(Debug)]
struct StoreInner {
    profiles: Vec<ConfigurationProfile>,
    current: String,
}

impl StoreInner {
    fn find(&self, id: &str) -> Option<&ConfigurationProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }
}

/// Named profiles with one current selection
#[derive(Debug)]
pub struct ProfileStore {
    inner: RwLock<StoreInner>,
    registry: ThresholdRegistry,
    clock: Arc<dyn Clock>,
}

impl ProfileStore {
    /// Store holding only the built-in default profile
    pub fn new(registry: ThresholdRegistry, clock: Arc<dyn Clock>) -> Self {
        let default = ConfigurationProfile::system_default(&registry, clock.now());
        Self {
            inner: RwLock::new(StoreInner {
                profiles: vec![default],
                current: DEFAULT_PROFILE_ID.to_string(),
            }),
            registry,
            clock,
        }
    }

    pub fn registry(&self) -> &ThresholdRegistry {
        &self.registry
    }

    pub fn current(&self) -> ConfigurationProfile {
        let inner = self.inner.read();
        inner
            .find(&inner.current)
            .cloned()
            .unwrap_or_else(|| ConfigurationProfile::system_default(&self.registry, self.clock.now()))
    }

    pub fn current_id(&self) -> String {
        self.inner.read().current.clone()
    }

    pub fn get(&self, id: &str) -> Option<ConfigurationProfile> {
        self.inner.read().find(id).cloned()
    }

    pub fn list(&self) -> Vec<ConfigurationProfile> {
        self.inner.read().profiles.clone()
    }

    pub fn count(&self) -> usize {
        self.inner.read().profiles.len()
    }

    /// New profile cloned from `base_id` (or the system defaults); not activated
    pub fn create_profile(&self, name: &str, description: &str, base_id: Option<&str>) -> Result<ConfigurationProfile> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        let (thresholds, settings) = match base_id {
            Some(base_id) => {
                let base = inner
                    .find(base_id)
                    .ok_or_else(|| BosunError::NotFound(format!("profile '{}'", base_id)))?;
                (base.thresholds.clone(), base.settings.clone())
            }
            None => (self.registry.default_thresholds(), ProfileSettings::default()),
        };

        let profile = ConfigurationProfile {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            thresholds,
            settings,
            is_default: false,
            created_at: now,
            updated_at: now,
        };
        profile.validate()?;

        info!("Created profile '{}' ({})", profile.name, profile.id);
        inner.profiles.push(profile.clone());
        Ok(profile)
    }

    /// Make `id` current; affects only future evaluations
    pub fn switch_profile(&self, id: &str) -> Result<ConfigurationProfile> {
        let mut inner = self.inner.write();
        let profile = inner
            .find(id)
            .cloned()
            .ok_or_else(|| BosunError::NotFound(format!("profile '{}'", id)))?;
        inner.current = id.to_string();
        info!("Switched to profile '{}'", profile.name);
        Ok(profile)
    }

    /// Apply a partial update, all-or-nothing
    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> Result<ConfigurationProfile> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        let index = inner
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| BosunError::NotFound(format!("profile '{}'", id)))?;

        let mut candidate = inner.profiles[index].clone();
        if let Some(name) = update.name {
            candidate.name = name;
        }
        if let Some(description) = update.description {
            candidate.description = description;
        }
        if let Some(thresholds) = &update.thresholds {
            candidate.merge_thresholds(thresholds);
        }
        if let Some(settings) = &update.settings {
            settings.apply(&mut candidate.settings);
        }
        candidate.validate()?;
        candidate.updated_at = now;

        inner.profiles[index] = candidate.clone();
        info!("Updated profile '{}'", candidate.name);
        Ok(candidate)
    }

    /// Remove a profile; the default and the current profile are protected
    pub fn delete_profile(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if id == DEFAULT_PROFILE_ID {
            return Err(BosunError::Validation("the default profile cannot be deleted".into()));
        }
        if !inner.contains(id) {
            return Err(BosunError::NotFound(format!("profile '{}'", id)));
        }
        if inner.current == id {
            return Err(BosunError::Validation("the current profile cannot be deleted; switch first".into()));
        }
        inner.profiles.retain(|p| p.id != id);
        info!("Deleted profile {}", id);
        Ok(())
    }

    /// Pretty JSON text of a profile
    pub fn export_profile(&self, id: &str) -> Result<String> {
        let profile = self
            .get(id)
            .ok_or_else(|| BosunError::NotFound(format!("profile '{}'", id)))?;
        Ok(serde_json::to_string_pretty(&profile)?)
    }

    /// Add a profile from exported text; not activated
    ///
    /// `name` and `thresholds` are required. A missing or already used id is
    /// replaced by a fresh one.
    pub fn import_profile(&self, text: &str) -> Result<ConfigurationProfile> {
        let doc: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| BosunError::InvalidProfile(format!("not valid JSON: {}", e)))?;
        let object = doc
            .as_object()
            .ok_or_else(|| BosunError::InvalidProfile("expected a JSON object".into()))?;

        let name = object
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BosunError::InvalidProfile("missing 'name'".into()))?;
        let thresholds = object
            .get("thresholds")
            .filter(|v| v.is_array())
            .ok_or_else(|| BosunError::InvalidProfile("missing 'thresholds'".into()))?;
        let thresholds: Vec<Threshold> = serde_json::from_value(thresholds.clone())
            .map_err(|e| BosunError::InvalidProfile(format!("bad thresholds: {}", e)))?;
        let settings: ProfileSettings = match object.get("settings") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| BosunError::InvalidProfile(format!("bad settings: {}", e)))?,
            None => ProfileSettings::default(),
        };
        let description = object
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let now = self.clock.now();
        let mut inner = self.inner.write();
        let id = match object.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() && !inner.contains(id) => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let profile = ConfigurationProfile {
            id,
            name: name.to_string(),
            description,
            thresholds,
            settings,
            is_default: false,
            created_at: now,
            updated_at: now,
        };
        profile.validate()?;

        info!("Imported profile '{}' ({})", profile.name, profile.id);
        inner.profiles.push(profile.clone());
        Ok(profile)
    }

    /// Replace all profiles with persisted ones
    ///
    /// The default profile is recreated if missing, and an unknown current id
    /// falls back to it. Invalid profiles are skipped.
    pub fn restore(&self, profiles: Vec<ConfigurationProfile>, current_id: &str) {
        let mut kept: Vec<ConfigurationProfile> = Vec::with_capacity(profiles.len() + 1);
        for profile in profiles {
            match profile.validate() {
                Ok(()) if !kept.iter().any(|p| p.id == profile.id) => kept.push(profile),
                Ok(()) => tracing::warn!("Skipping duplicate persisted profile {}", profile.id),
                Err(e) => tracing::warn!("Skipping invalid persisted profile {}: {}", profile.id, e),
            }
        }
        if !kept.iter().any(|p| p.id == DEFAULT_PROFILE_ID) {
            kept.insert(0, ConfigurationProfile::system_default(&self.registry, self.clock.now()));
        }

        let current = if kept.iter().any(|p| p.id == current_id) {
            current_id.to_string()
        } else {
            DEFAULT_PROFILE_ID.to_string()
        };

        let mut inner = self.inner.write();
        inner.profiles = kept;
        inner.current = current;
    }
}
