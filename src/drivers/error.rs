use std::time::SystemTime;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriggeringError {
    #[error("failed to read a cycle from the device: {0}")]
    DeviceRead(#[source] std::io::Error),
    #[error("device link closed")]
    DeviceClosed,
    #[error("could not open device {path}: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path}: {source}")]
    SettingsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse settings: {0}")]
    SettingsParse(#[from] serde_json::Error),
    #[error("setting {0} is not set")]
    MissingSetting(String),
    #[error("setting {key} is not of type {expected}")]
    WrongSettingType { key: String, expected: &'static str },
    #[error("setting {key} has an invalid value: {reason}")]
    InvalidSetting { key: String, reason: String },
    #[error("time series insert out of order: {inserted:?} is older than {latest:?}")]
    OutOfOrder {
        latest: SystemTime,
        inserted: SystemTime,
    },
    #[error("time series capacity must be greater than zero")]
    InvalidCapacity,
    #[error("failed to publish trigger: {0}")]
    Publish(String),
    #[error("failed to spawn {name} worker: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
