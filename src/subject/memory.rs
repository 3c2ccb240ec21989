//! In-memory collaborators
//!
//! Used by the command-line front end to run rules over a JSON snapshot, and
//! by the test suites. All state lives behind `RwLock`s so handles can be
//! shared with the engine's worker thread.

use super::types::{
    SubjectFlag, SubjectId, SubjectState, SwarmStats, TagId, TagInfo, Timeline, TransferStats,
};
use super::{ConfigSource, Subject, SubjectRef, SubjectSource, TagStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Serializable description of a subject
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectRecord {
    pub id: u64,
    pub name: String,
    pub state: SubjectState,
    pub paused: bool,
    pub force_start: bool,
    pub complete: bool,
    pub private: bool,
    pub rechecking: bool,
    pub can_archive: bool,
    pub magnet: bool,
    pub low_noise: bool,
    pub networks: Vec<String>,
    pub size: u64,
    pub files: Vec<String>,
    pub stats: TransferStats,
    pub timeline: Timeline,
    pub swarm: SwarmStats,
    /// Tags the subject starts out with
    pub tags: Vec<String>,
}

impl SubjectRecord {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            networks: vec!["Public".to_string()],
            ..Self::default()
        }
    }
}

/// A subject backed by a mutable record
pub struct MemorySubject {
    record: RwLock<SubjectRecord>,
    destroyed: AtomicBool,
}

impl MemorySubject {
    #[must_use]
    pub fn new(record: SubjectRecord) -> Arc<Self> {
        Arc::new(Self {
            record: RwLock::new(record),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Mutate the underlying record
    pub fn update(&self, f: impl FnOnce(&mut SubjectRecord)) {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut record);
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn read<T>(&self, f: impl FnOnce(&SubjectRecord) -> T) -> T {
        let record = self.record.read().unwrap_or_else(PoisonError::into_inner);
        f(&record)
    }
}

impl Subject for MemorySubject {
    fn id(&self) -> SubjectId {
        self.read(|r| SubjectId(r.id))
    }

    fn display_name(&self) -> String {
        self.read(|r| r.name.clone())
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn state(&self) -> SubjectState {
        self.read(|r| r.state)
    }

    fn is_paused(&self) -> bool {
        self.read(|r| r.paused)
    }

    fn is_force_start(&self) -> bool {
        self.read(|r| r.force_start)
    }

    fn is_complete(&self) -> bool {
        self.read(|r| r.complete)
    }

    fn is_private(&self) -> bool {
        self.read(|r| r.private)
    }

    fn is_rechecking(&self) -> bool {
        self.read(|r| r.rechecking)
    }

    fn can_archive(&self) -> bool {
        self.read(|r| r.can_archive)
    }

    fn has_flag(&self, flag: SubjectFlag) -> bool {
        self.read(|r| match flag {
            SubjectFlag::Magnet => r.magnet,
            SubjectFlag::LowNoise => r.low_noise,
        })
    }

    fn networks(&self) -> Vec<String> {
        self.read(|r| r.networks.clone())
    }

    fn size(&self) -> u64 {
        self.read(|r| r.size)
    }

    fn file_count(&self) -> usize {
        self.read(|r| r.files.len())
    }

    fn file_names(&self) -> Vec<String> {
        self.read(|r| {
            r.files
                .iter()
                .map(|f| {
                    std::path::Path::new(f)
                        .file_name()
                        .map_or_else(|| f.clone(), |n| n.to_string_lossy().into_owned())
                })
                .collect()
        })
    }

    fn stats(&self) -> TransferStats {
        self.read(|r| r.stats.clone())
    }

    fn timeline(&self) -> Timeline {
        self.read(|r| r.timeline.clone())
    }

    fn swarm(&self) -> SwarmStats {
        self.read(|r| r.swarm.clone())
    }
}

/// Subject population held in memory
#[derive(Default)]
pub struct MemorySubjects {
    subjects: RwLock<Vec<Arc<MemorySubject>>>,
}

impl MemorySubjects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subject: Arc<MemorySubject>) {
        self.subjects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subject);
    }
}

impl SubjectSource for MemorySubjects {
    fn subjects(&self) -> Vec<SubjectRef> {
        self.subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| Arc::clone(s) as SubjectRef)
            .collect()
    }
}

/// A membership change observed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Added(TagId, SubjectId),
    Removed(TagId, SubjectId),
}

#[derive(Default)]
struct StoreState {
    tags: BTreeMap<TagId, TagInfo>,
    members: HashMap<TagId, HashMap<SubjectId, DateTime<Utc>>>,
    errors: HashMap<TagId, String>,
    log: Vec<Mutation>,
}

/// Tag store held in memory, recording every mutation
#[derive(Default)]
pub struct MemoryTagStore {
    state: RwLock<StoreState>,
}

impl MemoryTagStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag, replacing any previous descriptor with the same id
    pub fn insert_tag(&self, info: TagInfo) {
        let mut state = self.write();
        state.members.entry(info.id).or_default();
        state.tags.insert(info.id, info);
    }

    pub fn remove_tag(&self, id: TagId) {
        let mut state = self.write();
        state.tags.remove(&id);
        state.members.remove(&id);
        state.errors.remove(&id);
    }

    /// Update the descriptor of an existing tag
    pub fn update_tag(&self, id: TagId, f: impl FnOnce(&mut TagInfo)) {
        if let Some(info) = self.write().tags.get_mut(&id) {
            f(info);
        }
    }

    /// Look up a tag id by display name
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<TagId> {
        self.read()
            .tags
            .values()
            .find(|t| t.name == name)
            .map(|t| t.id)
    }

    #[must_use]
    pub fn all_tags(&self) -> Vec<TagInfo> {
        self.read().tags.values().cloned().collect()
    }

    #[must_use]
    pub fn members(&self, tag: TagId) -> Vec<SubjectId> {
        let mut members: Vec<SubjectId> = self
            .read()
            .members
            .get(&tag)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    #[must_use]
    pub fn constraint_error(&self, tag: TagId) -> Option<String> {
        self.read().errors.get(&tag).cloned()
    }

    /// Every membership change so far, in order
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.read().log.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TagStore for MemoryTagStore {
    fn tag(&self, id: TagId) -> Option<TagInfo> {
        self.read().tags.get(&id).cloned()
    }

    fn tags_by_name(&self, name: &str) -> Vec<TagInfo> {
        self.read()
            .tags
            .values()
            .filter(|t| t.name == name)
            .cloned()
            .collect()
    }

    fn tags_of(&self, subject: SubjectId) -> Vec<TagInfo> {
        let state = self.read();
        state
            .tags
            .values()
            .filter(|t| {
                state
                    .members
                    .get(&t.id)
                    .is_some_and(|m| m.contains_key(&subject))
            })
            .cloned()
            .collect()
    }

    fn is_tagged(&self, tag: TagId, subject: SubjectId) -> bool {
        self.read()
            .members
            .get(&tag)
            .is_some_and(|m| m.contains_key(&subject))
    }

    fn member_count(&self, tag: TagId) -> usize {
        self.read().members.get(&tag).map_or(0, HashMap::len)
    }

    fn added_time(&self, tag: TagId, subject: SubjectId) -> Option<DateTime<Utc>> {
        self.read()
            .members
            .get(&tag)
            .and_then(|m| m.get(&subject).copied())
    }

    fn add(&self, tag: TagId, subject: SubjectId) {
        let mut state = self.write();
        if !state.tags.contains_key(&tag) {
            return;
        }
        let members = state.members.entry(tag).or_default();
        if members.contains_key(&subject) {
            return;
        }
        members.insert(subject, Utc::now());
        state.log.push(Mutation::Added(tag, subject));
    }

    fn remove(&self, tag: TagId, subject: SubjectId) {
        let mut state = self.write();
        let removed = state
            .members
            .get_mut(&tag)
            .is_some_and(|m| m.remove(&subject).is_some());
        if removed {
            state.log.push(Mutation::Removed(tag, subject));
        }
    }

    fn set_constraint_error(&self, tag: TagId, error: Option<String>) {
        let mut state = self.write();
        match error {
            Some(e) => {
                state.errors.insert(tag, e);
            }
            None => {
                state.errors.remove(&tag);
            }
        }
    }
}

/// Key/value configuration held in memory
#[derive(Default)]
pub struct MemoryConfig {
    values: RwLock<HashMap<String, f64>>,
}

impl MemoryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_float(&self, key: impl Into<String>, value: f64) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }
}

impl ConfigSource for MemoryConfig {
    fn float(&self, key: &str) -> Option<f64> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}
