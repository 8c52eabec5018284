//! Revision label model shared by documents and attachments.
//!
//! # Responsibility
//! - Parse and print RCS-style `<major>.<minor>` labels.
//! - Provide the increments used by the save pipeline.
//!
//! # Invariants
//! - Labels are totally ordered by `(major, minor)`.
//! - The first revision of any document or attachment is `1.1`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)$").expect("valid version regex"));

/// Error returned when a revision label is not `<major>.<minor>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionParseError(pub String);

impl Display for VersionParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid revision label `{}`", self.0)
    }
}

impl Error for VersionParseError {}

/// Revision label of a document or attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    /// Label assigned to the first saved revision.
    pub const FIRST: Version = Version { major: 1, minor: 1 };

    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// `1.3 -> 1.4`; `None` when the minor number is exhausted.
    pub fn next_minor(&self) -> Option<Self> {
        Some(Self::new(self.major, self.minor.checked_add(1)?))
    }

    /// `1.3 -> 2.1`; `None` when the major number is exhausted.
    pub fn next_major(&self) -> Option<Self> {
        Some(Self::new(self.major.checked_add(1)?, 1))
    }

    pub fn is_first(&self) -> bool {
        *self == Self::FIRST
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let captures = VERSION_RE
            .captures(trimmed)
            .ok_or_else(|| VersionParseError(value.to_string()))?;
        let major = captures[1]
            .parse::<u32>()
            .map_err(|_| VersionParseError(value.to_string()))?;
        let minor = captures[2]
            .parse::<u32>()
            .map_err(|_| VersionParseError(value.to_string()))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
