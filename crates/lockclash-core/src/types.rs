//! Domain types shared across the harness.

use std::{fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Error, Result};

/// Identifier of a single lockable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(i64);

impl TargetId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TargetId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").ok())
        .as_ref()
}

/// Table name that is safe to splice into SQL text.
///
/// Only plain identifiers are accepted: a letter or underscore followed by
/// up to 63 letters, digits or underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    /// Validate and wrap a table name.
    pub fn parse(name: &str) -> Result<Self> {
        let pattern = identifier_pattern()
            .ok_or_else(|| Error::InvalidConfig("identifier pattern failed to compile".into()))?;
        if pattern.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(Error::InvalidConfig(format!(
                "table name '{name}' is not a plain SQL identifier"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TableName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One acquisition attempt. Lives only for the duration of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest<'a> {
    pub target: TargetId,
    pub session: &'a str,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Ready,
    Running,
    Committed,
    Aborted,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal step.
    ///
    /// A session may abort from any non-terminal state; otherwise states
    /// only move forward one step at a time.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Ready)
                | (Self::Ready, Self::Running)
                | (Self::Running, Self::Committed)
                | (Self::Initializing | Self::Ready | Self::Running, Self::Aborted)
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// Transaction isolation requested when opening a handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    #[strum(to_string = "REPEATABLE READ", serialize = "repeatable_read")]
    RepeatableRead,
    #[strum(to_string = "SERIALIZABLE", serialize = "serializable")]
    Serializable,
}
