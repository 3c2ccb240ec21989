//! Keyword table
//!
//! Bare words inside parameter lists name subject attributes. Each keyword
//! carries the dependency level it imposes on a constraint: how often the
//! attribute can change without any lifecycle event announcing it.

use std::fmt;

/// How volatile the inputs of a constraint are
///
/// Ordered: a constraint's level is the maximum over its keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DependencyLevel {
    /// Only changes with the subject's static description
    #[default]
    Static,
    /// Changes while the subject is running
    RunningState,
    /// Changes with the passage of time alone
    Time,
}

impl fmt::Display for DependencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Static => "static",
            Self::RunningState => "running-state",
            Self::Time => "time",
        };
        f.write_str(name)
    }
}

/// A subject attribute addressable from an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    ShareRatio,
    Age,
    Percent,
    DownloadingFor,
    SeedingFor,
    SwarmMergeBytes,
    LastActive,
    SeedCount,
    PeerCount,
    SeedPeerRatio,
    ResumeIn,
    MinOfHour,
    HourOfDay,
    DayOfWeek,
    TagAge,
    CompletedAge,
    PeerMaxCompletion,
    LeecherMaxCompletion,
    PeerAverageCompletion,
    Size,
    SizeMb,
    SizeGb,
    FileCount,
    Availability,
    UpIdle,
    DownIdle,
    Downloaded,
    Uploaded,
    Name,
    FileNames,
}

/// Spellings accepted for each keyword, canonical spelling first
const TABLE: &[(Keyword, &[&str])] = &[
    (Keyword::ShareRatio, &["shareratio", "share_ratio"]),
    (Keyword::Age, &["age"]),
    (Keyword::Percent, &["percent"]),
    (Keyword::DownloadingFor, &["downloadingfor", "downloading_for"]),
    (Keyword::SeedingFor, &["seedingfor", "seeding_for"]),
    (Keyword::SwarmMergeBytes, &["swarmmergebytes", "swarm_merge_bytes"]),
    (Keyword::LastActive, &["lastactive", "last_active"]),
    (Keyword::SeedCount, &["seedcount", "seed_count"]),
    (Keyword::PeerCount, &["peercount", "peer_count"]),
    (Keyword::SeedPeerRatio, &["seedpeerratio", "seed_peer_ratio"]),
    (Keyword::ResumeIn, &["resumein", "resume_in"]),
    (Keyword::MinOfHour, &["minofhour", "min_of_hour"]),
    (Keyword::HourOfDay, &["hourofday", "hour_of_day"]),
    (Keyword::DayOfWeek, &["dayofweek", "day_of_week"]),
    (Keyword::TagAge, &["tagage", "tag_age"]),
    (Keyword::CompletedAge, &["completedage", "completed_age"]),
    (Keyword::PeerMaxCompletion, &["peermaxcompletion", "peer_max_completion"]),
    (
        Keyword::LeecherMaxCompletion,
        &[
            "leechermaxcompletion",
            "leecher_max_completion",
            "leechmaxcompletion",
            "leech_max_completion",
        ],
    ),
    (Keyword::PeerAverageCompletion, &["peeraveragecompletion", "peer_average_completion"]),
    (Keyword::Size, &["size"]),
    (Keyword::SizeMb, &["sizemb", "size_mb"]),
    (Keyword::SizeGb, &["sizegb", "size_gb"]),
    (Keyword::FileCount, &["filecount", "file_count"]),
    (Keyword::Availability, &["availability"]),
    (Keyword::UpIdle, &["upidle", "up_idle"]),
    (Keyword::DownIdle, &["downidle", "down_idle"]),
    (Keyword::Downloaded, &["downloaded"]),
    (Keyword::Uploaded, &["uploaded"]),
    (Keyword::Name, &["name"]),
    (Keyword::FileNames, &["file_names", "filenames"]),
];

impl Keyword {
    /// Resolve a bare word, ignoring ASCII case
    #[must_use]
    pub fn lookup(word: &str) -> Option<Self> {
        let word = word.to_ascii_lowercase();
        TABLE
            .iter()
            .find(|(_, names)| names.contains(&word.as_str()))
            .map(|(kw, _)| *kw)
    }

    /// Canonical spelling
    #[must_use]
    pub fn name(self) -> &'static str {
        TABLE
            .iter()
            .find(|(kw, _)| *kw == self)
            .and_then(|(_, names)| names.first().copied())
            .unwrap_or("?")
    }

    /// Every keyword with its accepted spellings
    pub fn all() -> impl Iterator<Item = (Self, &'static [&'static str])> {
        TABLE.iter().map(|(kw, names)| (*kw, *names))
    }

    #[must_use]
    pub const fn dependency(self) -> DependencyLevel {
        match self {
            Self::ShareRatio
            | Self::Percent
            | Self::DownloadingFor
            | Self::SeedingFor
            | Self::SwarmMergeBytes
            | Self::LastActive
            | Self::PeerMaxCompletion
            | Self::LeecherMaxCompletion
            | Self::PeerAverageCompletion
            | Self::Availability
            | Self::UpIdle
            | Self::DownIdle
            | Self::Downloaded
            | Self::Uploaded => DependencyLevel::RunningState,
            Self::Age
            | Self::SeedCount
            | Self::PeerCount
            | Self::SeedPeerRatio
            | Self::ResumeIn
            | Self::MinOfHour
            | Self::HourOfDay
            | Self::DayOfWeek
            | Self::TagAge
            | Self::CompletedAge => DependencyLevel::Time,
            Self::Size
            | Self::SizeMb
            | Self::SizeGb
            | Self::FileCount
            | Self::Name
            | Self::FileNames => DependencyLevel::Static,
        }
    }

    /// Keywords that resolve to text rather than numbers
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Name | Self::FileNames)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
