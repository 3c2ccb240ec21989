//! Builtin function table
//!
//! Function names are resolved exactly once, at compile time, into a
//! `Function` op code. The op code fixes the accepted argument shape, the
//! kind of value the call produces, and whether the call reads state that
//! changes without attribute polling.

use std::fmt;

/// Kind of value an expression produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Number,
}

/// Accepted argument shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// No arguments
    Nullary,
    /// A single quoted string literal
    Literal,
    /// Two numeric operands
    Numbers,
    /// Two textual operands
    Texts,
    /// A textual operand and a quoted pattern literal
    Pattern,
    /// A single numeric literal or keyword
    Quantity,
}

/// Builtin operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    HasTag,
    HasTagGroup,
    CountTag,
    HasNet,
    IsPrivate,
    IsComplete,
    IsForceStart,
    IsChecking,
    IsStopped,
    IsPaused,
    IsError,
    IsMagnet,
    IsLowNoise,
    CanArchive,
    IsGe,
    IsGt,
    IsLe,
    IsLt,
    IsEq,
    IsNeq,
    Contains,
    Matches,
    Javascript,
    HoursToSeconds,
    DaysToSeconds,
    WeeksToSeconds,
    GetConfig,
}

/// Names accepted for each function, canonical name first
const NAMES: &[(Function, &[&str])] = &[
    (Function::HasTag, &["hasTag"]),
    (Function::HasTagGroup, &["hasTagGroup"]),
    (Function::CountTag, &["countTag"]),
    (Function::HasNet, &["hasNet"]),
    (Function::IsPrivate, &["isPrivate"]),
    (Function::IsComplete, &["isComplete"]),
    (Function::IsForceStart, &["isForceStart"]),
    (Function::IsChecking, &["isChecking"]),
    (Function::IsStopped, &["isStopped"]),
    (Function::IsPaused, &["isPaused"]),
    (Function::IsError, &["isError"]),
    (Function::IsMagnet, &["isMagnet"]),
    (Function::IsLowNoise, &["isLowNoise"]),
    (Function::CanArchive, &["canArchive"]),
    (Function::IsGe, &["isGE"]),
    (Function::IsGt, &["isGT"]),
    (Function::IsLe, &["isLE"]),
    (Function::IsLt, &["isLT"]),
    (Function::IsEq, &["isEQ"]),
    (Function::IsNeq, &["isNEQ"]),
    (Function::Contains, &["contains"]),
    (Function::Matches, &["matches"]),
    (Function::Javascript, &["javascript"]),
    (Function::HoursToSeconds, &["hoursToSeconds", "htos", "h2s"]),
    (Function::DaysToSeconds, &["daysToSeconds", "dtos", "d2s"]),
    (Function::WeeksToSeconds, &["weeksToSeconds", "wtos", "w2s"]),
    (Function::GetConfig, &["getConfig"]),
];

/// Infix comparison operators in matching priority
pub const COMPARISONS: &[(&str, Function)] = &[
    ("==", Function::IsEq),
    ("!=", Function::IsNeq),
    (">=", Function::IsGe),
    (">", Function::IsGt),
    ("<=", Function::IsLe),
    ("<", Function::IsLt),
];

/// Network names understood by `hasNet`
pub const NETWORKS: &[&str] = &["Public", "I2P", "Tor"];

impl Function {
    /// Resolve a function name, including short aliases
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(_, names)| names.contains(&name))
            .map(|(f, _)| *f)
    }

    /// Canonical name
    #[must_use]
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(f, _)| *f == self)
            .and_then(|(_, names)| names.first().copied())
            .unwrap_or("?")
    }

    /// Every function with its accepted names
    pub fn all() -> impl Iterator<Item = (Self, &'static [&'static str])> {
        NAMES.iter().map(|(f, names)| (*f, *names))
    }

    #[must_use]
    pub const fn signature(self) -> Signature {
        match self {
            Self::IsPrivate
            | Self::IsComplete
            | Self::IsForceStart
            | Self::IsChecking
            | Self::IsStopped
            | Self::IsPaused
            | Self::IsError
            | Self::IsMagnet
            | Self::IsLowNoise
            | Self::CanArchive => Signature::Nullary,
            Self::HasTag
            | Self::HasTagGroup
            | Self::CountTag
            | Self::HasNet
            | Self::Javascript
            | Self::GetConfig => Signature::Literal,
            Self::IsGe | Self::IsGt | Self::IsLe | Self::IsLt | Self::IsEq | Self::IsNeq => {
                Signature::Numbers
            }
            Self::Contains => Signature::Texts,
            Self::Matches => Signature::Pattern,
            Self::HoursToSeconds | Self::DaysToSeconds | Self::WeeksToSeconds => {
                Signature::Quantity
            }
        }
    }

    #[must_use]
    pub const fn result(self) -> ValueKind {
        match self {
            Self::CountTag
            | Self::HoursToSeconds
            | Self::DaysToSeconds
            | Self::WeeksToSeconds
            | Self::GetConfig => ValueKind::Number,
            _ => ValueKind::Bool,
        }
    }

    /// Calls whose truth follows the subject's run state
    #[must_use]
    pub const fn depends_on_state(self) -> bool {
        matches!(
            self,
            Self::IsForceStart
                | Self::IsChecking
                | Self::IsComplete
                | Self::IsStopped
                | Self::IsError
                | Self::IsPaused
                | Self::Javascript
        )
    }

    /// Seconds per unit for the time conversion helpers
    #[must_use]
    pub const fn seconds_per_unit(self) -> Option<f64> {
        match self {
            Self::HoursToSeconds => Some(3_600.0),
            Self::DaysToSeconds => Some(86_400.0),
            Self::WeeksToSeconds => Some(604_800.0),
            _ => None,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical spelling of a network name, ignoring case
#[must_use]
pub fn canonical_network(name: &str) -> Option<&'static str> {
    NETWORKS
        .iter()
        .find(|n| n.eq_ignore_ascii_case(name))
        .copied()
}
