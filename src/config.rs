//! Configuration for autotag
//!
//! Two files are read with the `config` crate, both TOML:
//!
//! - **Engine settings** (`EngineConfig`): timings of the scheduler and the
//!   registry. Every key is optional and falls back to its default.
//! - **Rules** (`RuleSet`): the tags to create and the constraint each carries,
//!   used by the command-line front end.
//!
//! ```toml
//! [[tag]]
//! name = "Large"
//! constraint = "sizegb >= 4"
//!
//! [[tag]]
//! name = "Stalled"
//! constraint = "isComplete() == false && downidle > h2s(12)"
//! options = "am=1;"
//! ```

use crate::registry::RegistryConfig;
use config::{Config, ConfigError, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Engine timings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the full re-scan, which also clears the add cooldown history
    pub reapply_interval_secs: u64,

    /// Minimum spacing between two drains of staged state changes
    pub state_change_spacing_ms: u64,

    /// Minimum time between two automatic adds of a subject to one tag
    pub add_cooldown_ms: u64,

    /// Lifetime of values read through `getConfig`
    pub config_cache_ttl_secs: u64,

    /// Window of the per-constraint activity average
    pub activity_window_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reapply_interval_secs: 30,
            state_change_spacing_ms: 5_000,
            add_cooldown_ms: 1_000,
            config_cache_ttl_secs: 60,
            activity_window_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Load settings from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?;

        settings.try_deserialize()
    }

    /// Save settings as TOML
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the settings cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml()?)
            .map_err(|e| ConfigError::Message(format!("Failed to write config file: {e}")))
    }

    /// Render settings as TOML
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Message(format!("Failed to serialize config: {e}")))
    }

    #[must_use]
    pub const fn reapply_interval(&self) -> Duration {
        Duration::from_secs(self.reapply_interval_secs)
    }

    #[must_use]
    pub const fn state_change_spacing(&self) -> Duration {
        Duration::from_millis(self.state_change_spacing_ms)
    }

    #[must_use]
    pub const fn config_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config_cache_ttl_secs)
    }

    #[must_use]
    pub const fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            add_cooldown: Duration::from_millis(self.add_cooldown_ms),
            activity_window: Duration::from_secs(self.activity_window_secs),
        }
    }
}

/// A tag declared in a rules file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TagRule {
    pub name: String,

    #[serde(default)]
    pub group: Option<String>,

    /// Whether assigning the tag runs actions
    #[serde(default)]
    pub actions: bool,

    /// Membership limit, `0` for none
    #[serde(default)]
    pub max_members: usize,

    /// Constraint expression; tags without one are plain tags
    #[serde(default)]
    pub constraint: Option<String>,

    #[serde(default)]
    pub options: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

/// Contents of a rules file
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    #[serde(default, rename = "tag")]
    pub tags: Vec<TagRule>,
}

impl RuleSet {
    /// Load rules from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if two
    /// tags share a name.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?;

        let rules: Self = settings.try_deserialize()?;
        rules.validate()?;
        Ok(rules)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (i, rule) in self.tags.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(ConfigError::Message(format!("Tag #{} has no name", i + 1)));
            }
            if self.tags[..i].iter().any(|r| r.name == rule.name) {
                return Err(ConfigError::Message(format!(
                    "Tag '{}' is declared more than once",
                    rule.name
                )));
            }
        }
        Ok(())
    }
}
