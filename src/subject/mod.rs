//! Collaborator contracts consumed by the constraint engine
//!
//! The engine never owns subjects or tags. It reads subject attributes,
//! queries and mutates tag membership, and reaches a configuration store and
//! a scripting hook, all through the traits defined here.
//!
//! - **`Subject`**: read-only attribute accessors of one classified item
//! - **`SubjectSource`**: listing of every live subject
//! - **`TagStore`**: tag lookup and membership mutation
//! - **`ConfigSource`**: read-only configuration values
//! - **`ScriptHook`**: escape hatch for `javascript(...)`
//!
//! `memory` provides in-process implementations of all of them.

use std::sync::Arc;

pub mod memory;
pub mod types;

pub use memory::{
    MemoryConfig, MemorySubject, MemorySubjects, MemoryTagStore, Mutation, SubjectRecord,
};
pub use types::{
    ScrapeCounts, SubjectFlag, SubjectId, SubjectState, SwarmStats, TagId, TagInfo, Timeline,
    TransferStats,
};

/// Shared handle to a subject
pub type SubjectRef = Arc<dyn Subject>;

/// An item that tags are assigned to
///
/// Every accessor must be a cheap, non-blocking read.
pub trait Subject: Send + Sync {
    fn id(&self) -> SubjectId;

    fn display_name(&self) -> String;

    fn is_destroyed(&self) -> bool;

    fn state(&self) -> SubjectState;

    fn is_paused(&self) -> bool;

    fn is_force_start(&self) -> bool;

    fn is_complete(&self) -> bool;

    fn is_private(&self) -> bool;

    /// A full data recheck is in progress while seeding
    fn is_rechecking(&self) -> bool;

    fn can_archive(&self) -> bool;

    fn has_flag(&self, flag: SubjectFlag) -> bool;

    /// Networks the subject is allowed to use, by canonical name
    fn networks(&self) -> Vec<String>;

    /// Total size in bytes
    fn size(&self) -> u64;

    fn file_count(&self) -> usize;

    /// Base names of the subject's files
    fn file_names(&self) -> Vec<String>;

    fn stats(&self) -> TransferStats;

    fn timeline(&self) -> Timeline;

    fn swarm(&self) -> SwarmStats;
}

/// Lists the live subject population
pub trait SubjectSource: Send + Sync {
    fn subjects(&self) -> Vec<SubjectRef>;
}

/// Tag lookup and membership
pub trait TagStore: Send + Sync {
    fn tag(&self, id: TagId) -> Option<TagInfo>;

    /// Tags whose display name equals `name`
    fn tags_by_name(&self, name: &str) -> Vec<TagInfo>;

    /// Tags currently carried by a subject
    fn tags_of(&self, subject: SubjectId) -> Vec<TagInfo>;

    fn is_tagged(&self, tag: TagId, subject: SubjectId) -> bool;

    fn member_count(&self, tag: TagId) -> usize;

    /// When the subject joined the tag
    fn added_time(&self, tag: TagId, subject: SubjectId) -> Option<chrono::DateTime<chrono::Utc>>;

    fn add(&self, tag: TagId, subject: SubjectId);

    fn remove(&self, tag: TagId, subject: SubjectId);

    /// Attach (or clear with `None`) the transient constraint diagnostic of a tag
    fn set_constraint_error(&self, tag: TagId, error: Option<String>);
}

/// Read-only configuration lookup
pub trait ConfigSource: Send + Sync {
    fn float(&self, key: &str) -> Option<f64>;
}

/// External script evaluation used by `javascript(...)`
pub trait ScriptHook: Send + Sync {
    /// Evaluate `source` for `subject` on behalf of the `owner` tag.
    ///
    /// # Errors
    ///
    /// Returns the script's error message when evaluation throws.
    fn eval(
        &self,
        owner: TagId,
        source: &str,
        subject: &dyn Subject,
        call_site: &str,
    ) -> Result<serde_json::Value, String>;
}
