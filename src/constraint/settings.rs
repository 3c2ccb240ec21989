//! Configuration values readable from expressions
//!
//! `getConfig("key")` only accepts whitelisted keys. Values are read through
//! the external `ConfigSource` and kept in one cache shared by every
//! constraint of an engine: entries expire after a fixed lifetime and the
//! whole cache is dropped when the source announces a change.

use crate::subject::ConfigSource;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Value type of a whitelisted key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Float,
}

/// A configuration key expressions may read
#[derive(Debug, Clone, Copy)]
pub struct Setting {
    /// Key as written in expressions, lower case
    pub key: &'static str,
    pub kind: SettingKind,
    /// Name of the backing parameter in the configuration source
    pub parameter: &'static str,
}

pub const SETTINGS: &[Setting] = &[Setting {
    key: "queue.seeding.ignore.share.ratio",
    kind: SettingKind::Float,
    parameter: "Stop Ratio",
}];

/// Find a whitelisted key, ignoring ASCII case
#[must_use]
pub fn lookup(key: &str) -> Option<&'static Setting> {
    SETTINGS.iter().find(|s| s.key.eq_ignore_ascii_case(key))
}

/// Time-limited cache in front of the configuration source
pub struct SettingsCache {
    source: Option<Arc<dyn ConfigSource>>,
    values: Cache<String, f64>,
}

impl SettingsCache {
    #[must_use]
    pub fn new(source: Option<Arc<dyn ConfigSource>>, ttl: Duration) -> Self {
        let values = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(SETTINGS.len().max(1) as u64 * 4)
            .build();
        Self { source, values }
    }

    /// Read a whitelisted value.
    ///
    /// # Errors
    ///
    /// Returns the diagnostic text when the key is unknown or the source has
    /// no value for it.
    pub fn get(&self, key: &str) -> Result<f64, String> {
        if let Some(value) = self.values.get(key) {
            return Ok(value);
        }

        let setting = lookup(key).ok_or_else(|| format!("Unsupported configuration parameter: {key}"))?;

        let value = match setting.kind {
            SettingKind::Float => self.source.as_ref().and_then(|s| s.float(setting.parameter)),
        };

        match value {
            Some(v) => {
                self.values.insert(key.to_string(), v);
                Ok(v)
            }
            None => Err(format!("Error getting config value for '{key}'")),
        }
    }

    /// Forget every cached value
    pub fn invalidate(&self) {
        self.values.invalidate_all();
    }
}
