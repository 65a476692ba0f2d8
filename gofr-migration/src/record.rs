//! Migration records and the value types they are keyed by

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{MigrationError, MigrationResult};

/// Numeric migration version, conventionally a `YYYYMMDDhhmmss` timestamp.
///
/// Versions compare numerically, so `"999"` sorts before `"1000"` regardless
/// of the width of the key the migration was registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Version reported when nothing has run for an app
    pub const NONE: Version = Version(0);

    pub const fn new(value: i64) -> Self {
        Version(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Version::NONE
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MigrationError::InvalidVersion(s.to_string()));
        }
        trimmed
            .parse::<i64>()
            .map(Version)
            .map_err(|_| MigrationError::InvalidVersion(s.to_string()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Version(value)
    }
}

/// Direction of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Up => "UP",
            Method::Down => "DOWN",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UP" => Ok(Method::Up),
            "DOWN" => Ok(Method::Down),
            _ => Err(MigrationError::InvalidMethod(s.to_string())),
        }
    }
}

/// One execution attempt of one migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub app: String,
    pub version: Version,
    pub method: Method,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    /// Start a new attempt at the current time
    pub fn start(app: impl Into<String>, version: Version, method: Method) -> Self {
        Self {
            app: app.into(),
            version,
            method,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Record successful completion
    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Whether this record identifies the given attempt
    pub fn matches(&self, app: &str, version: Version, method: Method) -> bool {
        self.app == app && self.version == version && self.method == method
    }
}

/// Versions recorded for an app, split by direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedMigrations {
    pub up: BTreeSet<Version>,
    pub down: BTreeSet<Version>,
}

impl AppliedMigrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, version: Version, method: Method) {
        match method {
            Method::Up => self.up.insert(version),
            Method::Down => self.down.insert(version),
        };
    }

    /// A version can be reverted only when its UP is recorded and its DOWN is not
    pub fn can_revert(&self, version: Version) -> bool {
        self.up.contains(&version) && !self.down.contains(&version)
    }

    /// Collect from finished records; unfinished attempts are not history
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a MigrationRecord>) -> Self {
        let mut applied = Self::new();
        for record in records.into_iter().filter(|r| r.is_finished()) {
            applied.record(record.version, record.method);
        }
        applied
    }
}

/// Parse a version key, used by backends reading rows back
pub(crate) fn version_from_row(value: i64) -> MigrationResult<Version> {
    if value < 0 {
        return Err(MigrationError::InvalidVersion(value.to_string()));
    }
    Ok(Version(value))
}
