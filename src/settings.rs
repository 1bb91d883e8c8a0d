use std::sync::{Arc, RwLock};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ActigramError, Result},
    store::{ConfigStore, SETTINGS_KEY},
};

pub const DEFAULT_EPOCH_DURATION_MINUTES: u32 = 15;
pub const DEFAULT_IDLE_THRESHOLD_SECONDS: u32 = 60;
pub const RETAIN_FOREVER: i32 = -1;

/// Keys older releases stored settings under, with their current names.
/// Earlier entries win when several legacy keys map to the same field.
const LEGACY_KEYS: [(&str, &str); 3] = [
    ("chunkDuration", "epochDurationMinutes"),
    ("epochDuration", "epochDurationMinutes"),
    ("idleThreshold", "idleThresholdSeconds"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub epoch_duration_minutes: u32,
    pub idle_threshold_seconds: u32,
    /// `<= 0` keeps epochs forever.
    pub retention_days: i32,
    /// IANA zone name written into exports.
    pub time_zone: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            epoch_duration_minutes: DEFAULT_EPOCH_DURATION_MINUTES,
            idle_threshold_seconds: DEFAULT_IDLE_THRESHOLD_SECONDS,
            retention_days: RETAIN_FOREVER,
            time_zone: host_time_zone(),
        }
    }
}

/// IANA name of the host's zone, `UTC` when it cannot be determined.
pub fn host_time_zone() -> String {
    zone_or_utc(iana_time_zone::get_timezone())
}

fn zone_or_utc<E: std::fmt::Display>(detected: std::result::Result<String, E>) -> String {
    match detected {
        Ok(zone) if !zone.trim().is_empty() => zone,
        Ok(_) => "UTC".into(),
        Err(err) => {
            warn!("Could not detect the host time zone ({err}); exporting as UTC");
            "UTC".into()
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.epoch_duration_minutes == 0 {
            return Err(ActigramError::invalid("epochDurationMinutes must be positive"));
        }
        if self.idle_threshold_seconds == 0 {
            return Err(ActigramError::invalid("idleThresholdSeconds must be positive"));
        }
        if self.time_zone.trim().is_empty() {
            return Err(ActigramError::invalid("timeZone must not be empty"));
        }
        Ok(())
    }
}

/// Settings backed by the configuration store, with the last good value cached
/// so a store outage never leaves the engine without settings.
#[derive(Clone)]
pub struct SettingsStore {
    config: Arc<dyn ConfigStore>,
    cached: Arc<RwLock<Settings>>,
}

impl SettingsStore {
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self {
            config,
            cached: Arc::new(RwLock::new(Settings::default())),
        }
    }

    /// Loads settings, writing defaults on first run and migrating legacy keys.
    pub async fn load(&self) -> Result<Settings> {
        let settings = match self.config.get(SETTINGS_KEY).await? {
            None => {
                let defaults = Settings::default();
                self.config
                    .set(SETTINGS_KEY, serde_json::to_value(&defaults)?)
                    .await?;
                info!("Wrote default settings");
                defaults
            }
            Some(raw) => {
                let (settings, migrated) = decode(raw)?;
                if migrated {
                    self.config
                        .set(SETTINGS_KEY, serde_json::to_value(&settings)?)
                        .await?;
                    info!("Migrated legacy setting keys");
                }
                settings
            }
        };
        self.remember(settings.clone());
        Ok(settings)
    }

    /// Fresh settings, or the last good value if the store cannot be read.
    pub async fn refresh(&self) -> Settings {
        match self.load().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("Falling back to cached settings: {err}");
                self.current()
            }
        }
    }

    pub fn current(&self) -> Settings {
        match self.cached.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn update(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        self.config
            .set(SETTINGS_KEY, serde_json::to_value(&settings)?)
            .await?;
        self.remember(settings);
        Ok(())
    }

    fn remember(&self, settings: Settings) {
        match self.cached.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

fn decode(mut raw: Value) -> Result<(Settings, bool)> {
    let mut migrated = false;
    if let Some(object) = raw.as_object_mut() {
        for (legacy, current) in LEGACY_KEYS {
            if let Some(value) = object.remove(legacy) {
                object.entry(current).or_insert(value);
                migrated = true;
            }
        }
    }
    let settings: Settings = serde_json::from_value(raw)?;
    if let Err(err) = settings.validate() {
        warn!("Stored settings invalid ({err}); using defaults");
        return Ok((Settings::default(), true));
    }
    Ok((settings, migrated))
}
