//! Classification of lock failures.
//!
//! Engines report the same condition in different ways depending on
//! version and configuration: sometimes only a SQLSTATE, sometimes only a
//! message. The state code is checked first and the message is the
//! fallback.

use serde::Serialize;
use strum::Display;

use crate::error::LockFailure;

/// SQLSTATE for serialization failure, reported for deadlock victims.
pub const SQLSTATE_DEADLOCK: &str = "40001";

/// SQLSTATE for a lock request that gave up waiting.
pub const SQLSTATE_LOCK_WAIT_TIMEOUT: &str = "55P03";

/// Category of a failed lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Deadlock,
    Timeout,
    Error,
}

/// Classify a failure. Pure: the same failure always yields the same class.
pub fn classify(failure: &LockFailure) -> FailureClass {
    match failure {
        LockFailure::Engine { message, code } => classify_signal(code.as_deref(), message),
        LockFailure::NotFound { .. } => FailureClass::Error,
    }
}

/// Classify a raw `(code, message)` pair.
pub fn classify_signal(code: Option<&str>, message: &str) -> FailureClass {
    match code {
        Some(SQLSTATE_DEADLOCK) => return FailureClass::Deadlock,
        Some(SQLSTATE_LOCK_WAIT_TIMEOUT) => return FailureClass::Timeout,
        _ => {}
    }

    let message = message.to_lowercase();
    if message.contains("deadlock") {
        FailureClass::Deadlock
    } else if message.contains("lock wait timeout") {
        FailureClass::Timeout
    } else {
        FailureClass::Error
    }
}
