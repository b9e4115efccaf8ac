use phf::{Map, phf_map};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

static STATUS_DESCRIPTIONS: Map<&'static str, &'static str> = phf_map! {
    "ACC" => "The path has been accepted",
    "MCR" => "Momenta change rejection",
    "KOB" => "Kicked outside of boundaries",
    "BTL" => "Backward trajectory too long (detailed balance condition)",
    "BTX" => "Backward trajectory too long (max-path exceeded)",
    "BWI" => "Backward trajectory ends at wrong interface",
    "FTL" => "Forward trajectory too long (detailed balance condition)",
    "FTX" => "Forward trajectory too long (max-path exceeded)",
    "NCR" => "No crossing with middle interface",
    "MAXLENGTH" => "Propagation reached the maximum path length",
    "REJ" => "Rejected after an engine failure",
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown path status code: '{0}'")]
pub struct UnknownStatus(pub String);

/// Reasons a trial path can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    MomentaChange,
    KickedOutside,
    BackwardTooLong,
    BackwardExceedsMax,
    BackwardWrongInterface,
    ForwardTooLong,
    ForwardExceedsMax,
    NoCrossing,
    MaxLength,
    EngineFailure,
}

impl Rejection {
    pub fn code(self) -> &'static str {
        match self {
            Rejection::MomentaChange => "MCR",
            Rejection::KickedOutside => "KOB",
            Rejection::BackwardTooLong => "BTL",
            Rejection::BackwardExceedsMax => "BTX",
            Rejection::BackwardWrongInterface => "BWI",
            Rejection::ForwardTooLong => "FTL",
            Rejection::ForwardExceedsMax => "FTX",
            Rejection::NoCrossing => "NCR",
            Rejection::MaxLength => "MAXLENGTH",
            Rejection::EngineFailure => "REJ",
        }
    }
}

/// Outcome attached to a finished path. Setting it freezes the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathStatus {
    Accepted,
    Rejected(Rejection),
}

impl PathStatus {
    pub fn code(self) -> &'static str {
        match self {
            PathStatus::Accepted => "ACC",
            PathStatus::Rejected(r) => r.code(),
        }
    }

    pub fn description(self) -> &'static str {
        STATUS_DESCRIPTIONS
            .get(self.code())
            .copied()
            .unwrap_or("Unknown status")
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, PathStatus::Accepted)
    }
}

impl From<Rejection> for PathStatus {
    fn from(r: Rejection) -> Self {
        PathStatus::Rejected(r)
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PathStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "ACC" => PathStatus::Accepted,
            "MCR" => Rejection::MomentaChange.into(),
            "KOB" => Rejection::KickedOutside.into(),
            "BTL" => Rejection::BackwardTooLong.into(),
            "BTX" => Rejection::BackwardExceedsMax.into(),
            "BWI" => Rejection::BackwardWrongInterface.into(),
            "FTL" => Rejection::ForwardTooLong.into(),
            "FTX" => Rejection::ForwardExceedsMax.into(),
            "NCR" => Rejection::NoCrossing.into(),
            "MAXLENGTH" => Rejection::MaxLength.into(),
            "REJ" => Rejection::EngineFailure.into(),
            other => return Err(UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Which move created a path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Generated {
    Kick,
    Shooting {
        order: f64,
        index: usize,
        backward_len: usize,
    },
    TimeReversal,
}

impl Generated {
    pub fn code(&self) -> &'static str {
        match self {
            Generated::Kick => "ki",
            Generated::Shooting { .. } => "sh",
            Generated::TimeReversal => "tr",
        }
    }

    pub fn shooting_index(&self) -> Option<usize> {
        match self {
            Generated::Shooting { index, .. } => Some(*index),
            _ => None,
        }
    }
}
