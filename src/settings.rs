// src/settings.rs
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::drivers::TriggeringError;

pub const BOX_ID: &str = "box_id";
pub const CALIBRATION_CONSTANT: &str = "acquisition_calibration_constant";
pub const FRAMES_PER_MEASUREMENT: &str = "frames_per_measurement";
pub const DEVICE_PATH: &str = "device_path";
pub const STORAGE_WINDOWS: &str = "windows_in_storage_buffer";
pub const QUEUE_DEPTH: &str = "queue_depth";
pub const SIMULATION: &str = "simulation";
pub const LOG_PATH: &str = "log_path";
pub const RUN_FOR_SECS: &str = "run_for_secs";
/// Results folded into one min/max/average summary; unset publishes every result.
pub const MEASUREMENTS_PER_SUMMARY: &str = "measurements_per_summary";
/// Written by the analysis stage after every measurement.
pub const LATEST_RMS: &str = "latest.rms";
pub const LATEST_FREQUENCY: &str = "latest.frequency";

pub const DEFAULT_CALIBRATION_CONSTANT: f32 = 1.0;
pub const DEFAULT_FRAMES_PER_MEASUREMENT: usize = 10;
pub const DEFAULT_DEVICE_PATH: &str = "/dev/opq0";
/// Ten minutes of ten-cycle measurements.
pub const DEFAULT_STORAGE_WINDOWS: usize = 3600;
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// A single configuration value as it appears in the settings file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Int(value)
    }
}

impl From<f32> for SettingValue {
    fn from(value: f32) -> Self {
        SettingValue::Float(f64::from(value))
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SettingValue) + Send + Sync>;

/// Thread-safe key/value configuration shared by every stage.
///
/// Keys are trimmed. Subscribers run after each `set` of their key, outside
/// the store lock, so a callback may read the store again.
#[derive(Default)]
pub struct Settings {
    values: Mutex<BTreeMap<String, SettingValue>>,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, Callback)>>>,
    next_subscription: AtomicU64,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a flat JSON object of settings.
    pub fn from_json_str(json: &str) -> Result<Self, TriggeringError> {
        let parsed: BTreeMap<String, SettingValue> = serde_json::from_str(json)?;
        let values = parsed
            .into_iter()
            .map(|(k, v)| (k.trim().to_owned(), v))
            .collect();
        Ok(Self {
            values: Mutex::new(values),
            ..Self::default()
        })
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, TriggeringError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| TriggeringError::SettingsIo {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_json_str(&json)?;
        info!("Loaded {} settings from {}", settings.values.lock().len(), path.display());
        Ok(settings)
    }

    /// Writes every setting as a JSON object, replacing the file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), TriggeringError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&*self.values.lock())?;
        fs::write(path, json).map_err(|source| TriggeringError::SettingsIo {
            path: path.display().to_string(),
            source,
        })?;
        info!("Exported settings to {}", path.display());
        Ok(())
    }

    pub fn set(&self, key: &str, value: impl Into<SettingValue>) {
        let key = key.trim();
        let value = value.into();
        self.values.lock().insert(key.to_owned(), value.clone());
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .get(key)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(&value);
        }
    }

    pub fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.lock().get(key.trim()).cloned()
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.values.lock().contains_key(key.trim())
    }

    pub fn erase(&self, key: &str) -> Option<SettingValue> {
        self.values.lock().remove(key.trim())
    }

    pub fn clear(&self) {
        self.values.lock().clear();
    }

    pub fn get_int(&self, key: &str) -> Result<i64, TriggeringError> {
        match self.require(key)? {
            SettingValue::Int(v) => Ok(v),
            _ => Err(wrong_type(key, "integer")),
        }
    }

    /// Integers are accepted where a float is expected.
    pub fn get_float(&self, key: &str) -> Result<f32, TriggeringError> {
        match self.require(key)? {
            SettingValue::Float(v) => Ok(v as f32),
            SettingValue::Int(v) => Ok(v as f32),
            _ => Err(wrong_type(key, "float")),
        }
    }

    pub fn get_string(&self, key: &str) -> Result<String, TriggeringError> {
        match self.require(key)? {
            SettingValue::Text(v) => Ok(v),
            _ => Err(wrong_type(key, "string")),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, TriggeringError> {
        match self.require(key)? {
            SettingValue::Bool(v) => Ok(v),
            _ => Err(wrong_type(key, "bool")),
        }
    }

    /// Registers `callback` for every future `set` of `key`.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&SettingValue) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .entry(key.trim().to_owned())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(subs) = subscribers.get_mut(key.trim()) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(sub, _)| *sub != id);
        before != subs.len()
    }

    fn require(&self, key: &str) -> Result<SettingValue, TriggeringError> {
        self.get(key)
            .ok_or_else(|| TriggeringError::MissingSetting(key.trim().to_owned()))
    }

    fn int_or(&self, key: &str, default: i64) -> Result<i64, TriggeringError> {
        if self.is_set(key) {
            self.get_int(key)
        } else {
            Ok(default)
        }
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, TriggeringError> {
        let value = self.int_or(key, default as i64)?;
        if value < 1 {
            return Err(invalid(key, format!("{value} is not a positive count")));
        }
        Ok(value as usize)
    }

    pub fn box_id(&self) -> Result<u32, TriggeringError> {
        let id = self.int_or(BOX_ID, 0)?;
        u32::try_from(id).map_err(|_| invalid(BOX_ID, format!("{id} is out of range")))
    }

    /// Scale from ADC counts to volts.
    pub fn calibration_constant(&self) -> Result<f32, TriggeringError> {
        if !self.is_set(CALIBRATION_CONSTANT) {
            return Ok(DEFAULT_CALIBRATION_CONSTANT);
        }
        let value = self.get_float(CALIBRATION_CONSTANT)?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid(CALIBRATION_CONSTANT, format!("{value} must be positive")));
        }
        Ok(value)
    }

    pub fn frames_per_measurement(&self) -> Result<usize, TriggeringError> {
        self.positive(FRAMES_PER_MEASUREMENT, DEFAULT_FRAMES_PER_MEASUREMENT)
    }

    pub fn storage_windows(&self) -> Result<usize, TriggeringError> {
        self.positive(STORAGE_WINDOWS, DEFAULT_STORAGE_WINDOWS)
    }

    pub fn queue_depth(&self) -> Result<usize, TriggeringError> {
        self.positive(QUEUE_DEPTH, DEFAULT_QUEUE_DEPTH)
    }

    pub fn measurements_per_summary(&self) -> Result<Option<usize>, TriggeringError> {
        if !self.is_set(MEASUREMENTS_PER_SUMMARY) {
            return Ok(None);
        }
        self.positive(MEASUREMENTS_PER_SUMMARY, 1).map(Some)
    }

    pub fn device_path(&self) -> Result<String, TriggeringError> {
        if self.is_set(DEVICE_PATH) {
            self.get_string(DEVICE_PATH)
        } else {
            Ok(DEFAULT_DEVICE_PATH.to_owned())
        }
    }

    pub fn simulation(&self) -> bool {
        match self.get_bool(SIMULATION) {
            Ok(enabled) => enabled,
            Err(TriggeringError::MissingSetting(_)) => false,
            Err(err) => {
                warn!("{err}; running against the device");
                false
            }
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> TriggeringError {
    TriggeringError::WrongSettingType {
        key: key.trim().to_owned(),
        expected,
    }
}

fn invalid(key: &str, reason: String) -> TriggeringError {
    TriggeringError::InvalidSetting {
        key: key.to_owned(),
        reason,
    }
}

/// Interprets a setting value as a positive count, if it is one.
pub fn as_count(value: &SettingValue) -> Option<usize> {
    match value {
        SettingValue::Int(v) if *v >= 1 => usize::try_from(*v).ok(),
        _ => None,
    }
}
