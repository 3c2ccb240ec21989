//! Test fixtures
//!
//! In-memory collaborators wired together the way an engine uses them.
//!
//! Only available when compiled with `cfg(test)`.

use crate::constraint::{Services, SettingsCache};
use crate::subject::{
    ConfigSource, MemoryConfig, MemoryTagStore, ScriptHook, Subject, SubjectId, TagId, TagInfo,
    TagStore,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Tag store, configuration and evaluation services
pub struct Fixture {
    pub store: Arc<MemoryTagStore>,
    pub config: Arc<MemoryConfig>,
    pub services: Arc<Services>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    #[must_use]
    pub fn new() -> Self {
        let store = Arc::new(MemoryTagStore::new());
        let config = Arc::new(MemoryConfig::new());
        let services = services(&store, &config, None);
        Self {
            store,
            config,
            services,
        }
    }

    /// Fixture with one tag per name, numbered from 1
    #[must_use]
    pub fn with_tags(names: &[&str]) -> Self {
        let fixture = Self::new();
        for (i, name) in names.iter().enumerate() {
            fixture.store.insert_tag(TagInfo::new(TagId(i as u32 + 1), *name));
        }
        fixture
    }

    #[must_use]
    pub fn with_script(mut self, hook: impl ScriptHook + 'static) -> Self {
        self.services = services(&self.store, &self.config, Some(Arc::new(hook)));
        self
    }

    /// Id of a tag by name
    ///
    /// # Panics
    ///
    /// Panics if no such tag exists.
    #[must_use]
    pub fn id(&self, name: &str) -> TagId {
        self.store.id_of(name).expect("tag exists")
    }

    /// Put a subject into a tag
    pub fn tag(&self, subject: u64, name: &str) {
        self.store.add(self.id(name), SubjectId(subject));
    }

    /// Names of the tags a subject carries
    #[must_use]
    pub fn tags_of(&self, subject: u64) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .tags_of(SubjectId(subject))
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        names
    }
}

fn services(
    store: &Arc<MemoryTagStore>,
    config: &Arc<MemoryConfig>,
    script: Option<Arc<dyn ScriptHook>>,
) -> Arc<Services> {
    let settings = SettingsCache::new(
        Some(Arc::clone(config) as Arc<dyn ConfigSource>),
        Duration::from_secs(60),
    );
    Arc::new(Services::new(
        Arc::clone(store) as Arc<dyn TagStore>,
        script,
        Arc::new(settings),
    ))
}

/// A point in time `hours` hours ago
#[must_use]
pub fn at_hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::hours(hours)
}

/// Script hook that interprets the script text as a JSON literal
///
/// `throw` raises an error instead.
#[derive(Debug, Default)]
pub struct ScriptedHook;

impl ScriptHook for ScriptedHook {
    fn eval(
        &self,
        _owner: TagId,
        source: &str,
        _subject: &dyn Subject,
        _call_site: &str,
    ) -> Result<serde_json::Value, String> {
        let body = source
            .strip_prefix("javascript( ")
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(source)
            .trim();
        if body == "throw" {
            return Err("ReferenceError: throw is not defined".to_string());
        }
        Ok(serde_json::from_str(body).unwrap_or(serde_json::Value::Null))
    }
}

/// Script hook that always answers `true` and counts its calls
#[derive(Debug, Clone, Default)]
pub struct CountingHook {
    calls: Arc<AtomicUsize>,
}

impl CountingHook {
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ScriptHook for CountingHook {
    fn eval(
        &self,
        _owner: TagId,
        _source: &str,
        _subject: &dyn Subject,
        _call_site: &str,
    ) -> Result<serde_json::Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::Value::Bool(true))
    }
}
