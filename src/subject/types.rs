//! Value types exchanged with the subject and tag collaborators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(pub u64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identity of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagId(pub u32);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

/// Lifecycle state of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectState {
    #[default]
    Waiting,
    Queued,
    Downloading,
    Seeding,
    Checking,
    Stopped,
    Error,
}

/// Boolean flags persisted with a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectFlag {
    /// Subject is still fetching its own metadata
    Magnet,
    /// Subject is excluded from notifications and statistics
    LowNoise,
}

/// Transfer counters of a subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferStats {
    /// Share ratio; `None` when nothing was downloaded yet, which reads as unbounded
    pub share_ratio: Option<f64>,
    /// Completion percentage in `0.0..=100.0`, excluding skipped files
    pub percent_done: f64,
    pub seconds_downloading: u64,
    pub seconds_seeding: u64,
    /// Seconds since data was last sent; `None` if never
    pub upload_idle_secs: Option<u64>,
    /// Seconds since data was last received; `None` if never
    pub download_idle_secs: Option<u64>,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
    pub swarm_merged_bytes: u64,
}

/// Wall-clock milestones of a subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeline {
    pub added: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    /// Last time the subject joined an "active" tag
    pub last_active: Option<DateTime<Utc>>,
    /// Scheduled automatic resume
    pub resume_at: Option<DateTime<Utc>>,
}

/// Seed/peer counts reported by a tracker scrape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeCounts {
    pub seeds: i64,
    pub peers: i64,
}

/// Swarm information, only partly available while the subject is running
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmStats {
    pub connected_seeds: i64,
    pub connected_peers: i64,
    /// Last valid tracker scrape, if any
    pub scrape: Option<ScrapeCounts>,
    /// Completion percentages; `None` while no peer manager exists
    pub peer_max_completion: Option<f64>,
    pub leecher_max_completion: Option<f64>,
    pub peer_average_completion: Option<f64>,
    pub availability: Option<f64>,
}

impl SwarmStats {
    /// Seed count, preferring the scrape when it reports more
    #[must_use]
    pub fn seeds(&self) -> i64 {
        let scraped = self.scrape.map_or(i64::MIN, |s| s.seeds);
        self.connected_seeds.max(scraped).max(0)
    }

    /// Peer count, preferring the scrape when it reports more
    #[must_use]
    pub fn peers(&self) -> i64 {
        let scraped = self.scrape.map_or(i64::MIN, |s| s.peers);
        self.connected_peers.max(scraped).max(0)
    }
}

/// Descriptor of a tag as exposed by the tag store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub id: TagId,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    /// Whether the tag can carry a constraint of its own
    #[serde(default = "default_true")]
    pub constrainable: bool,
    /// Whether assigning runs side-effecting actions
    #[serde(default)]
    pub has_actions: bool,
    /// Membership limit, `0` for none
    #[serde(default)]
    pub max_members: usize,
}

const fn default_true() -> bool {
    true
}

impl TagInfo {
    #[must_use]
    pub fn new(id: TagId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            group: None,
            constrainable: true,
            has_actions: false,
            max_members: 0,
        }
    }

    /// Tags whose assignment has consequences beyond membership
    #[must_use]
    pub const fn has_side_effects(&self) -> bool {
        self.has_actions || self.max_members > 0
    }
}
