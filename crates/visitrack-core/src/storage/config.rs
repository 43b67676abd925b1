//! TOML-based application configuration.
//!
//! Stores:
//! - Tracking cadence and persistence schedule
//! - Proximity radius and cooldown
//! - Meeting automation switches
//!
//! Configuration is stored at `~/.config/visitrack/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;
use crate::location::{LocationRequest, Priority};
use crate::proximity::ProximitySettings;
use crate::tracking::{PersistSchedule, TrackingOptions};

/// Sampling and persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub priority: Priority,
    /// Overrides the cadence implied by `priority`.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityConfig {
    #[serde(default = "default_radius_m")]
    pub radius_m: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingConfig {
    /// Open a meeting automatically on a proximity entry.
    #[serde(default)]
    pub auto_start_on_proximity: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/visitrack/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub meeting: MeetingConfig,
}

fn default_user_id() -> String {
    "local".into()
}
fn default_save_interval_secs() -> u64 {
    5 * 60
}
fn default_check_interval_secs() -> u64 {
    60
}
fn default_radius_m() -> f64 {
    crate::proximity::DEFAULT_RADIUS_M
}
fn default_cooldown_secs() -> u64 {
    crate::proximity::DEFAULT_COOLDOWN.as_secs()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            priority: Priority::default(),
            interval_ms: None,
            save_interval_secs: default_save_interval_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            radius_m: default_radius_m(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Write `value` at `key`, parsed according to the field's type in
    /// `schema` (the serialized defaults). Optional fields are `null` there
    /// whatever their current value.
    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        schema: &serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            if !obj.contains_key(part) {
                return Err(unknown());
            }
            let kind = Self::get_json_value_by_path(schema, key).ok_or_else(unknown)?;
            let new_value = match kind {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => parse_number(value).ok_or_else(|| {
                    invalid(format!("cannot parse '{value}' as number"))
                })?,
                // Optional: a number, or "none" to clear.
                serde_json::Value::Null => match value {
                    "" | "none" => serde_json::Value::Null,
                    _ => parse_number(value).ok_or_else(|| {
                        invalid(format!("cannot parse '{value}' as number"))
                    })?,
                },
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                serde_json::Value::String(_) => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the
    /// field, e.g. a negative radius.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let schema = serde_json::to_value(Config::default()).map_err(|e| {
            ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }
        })?;
        Self::set_json_value_by_path(&mut json, &schema, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Every leaf key with its current value, in dot-path form.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out.sort();
        out
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if !(self.proximity.radius_m.is_finite() && self.proximity.radius_m > 0.0) {
            return invalid("proximity.radius_m", "must be a positive number of meters");
        }
        if self.tracking.interval_ms == Some(0) {
            return invalid("tracking.interval_ms", "must be greater than zero");
        }
        if self.tracking.save_interval_secs == 0 {
            return invalid("tracking.save_interval_secs", "must be greater than zero");
        }
        if self.tracking.check_interval_secs == 0 {
            return invalid("tracking.check_interval_secs", "must be greater than zero");
        }
        Ok(())
    }

    /// Session options derived from the `[tracking]` and `[proximity]` tables.
    pub fn tracking_options(&self) -> TrackingOptions {
        let t = &self.tracking;
        let interval = t
            .interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| t.priority.default_interval());
        TrackingOptions {
            user_id: t.user_id.clone(),
            request: LocationRequest::new(interval, t.priority),
            schedule: PersistSchedule {
                save_interval: Duration::from_secs(t.save_interval_secs),
                check_interval: Duration::from_secs(t.check_interval_secs),
            },
            proximity: self.proximity_settings(),
        }
    }

    pub fn proximity_settings(&self) -> ProximitySettings {
        ProximitySettings {
            radius_m: self.proximity.radius_m,
            cooldown: Duration::from_secs(self.proximity.cooldown_secs),
        }
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

fn parse_number(value: &str) -> Option<serde_json::Value> {
    if let Ok(n) = value.parse::<u64>() {
        return Some(serde_json::Value::Number(n.into()));
    }
    value
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
}
