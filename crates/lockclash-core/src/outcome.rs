//! Session outcomes and the collection they are reported into.

use std::sync::Arc;

use serde::Serialize;
use strum::{Display, EnumIter};
use tokio::sync::Mutex;

use crate::{
    classify::FailureClass,
    error::{CleanupError, CleanupStage},
};

/// Final category of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Committed,
    Deadlock,
    Timeout,
    Error,
    Interrupted,
}

impl From<FailureClass> for OutcomeCategory {
    fn from(class: FailureClass) -> Self {
        match class {
            FailureClass::Deadlock => Self::Deadlock,
            FailureClass::Timeout => Self::Timeout,
            FailureClass::Error => Self::Error,
        }
    }
}

/// Result of one session. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    session: String,
    category: OutcomeCategory,
    detail: String,
    rolled_back: bool,
    cleanup: Vec<CleanupError>,
}

impl Outcome {
    pub fn new(
        session: impl Into<String>,
        category: OutcomeCategory,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            session: session.into(),
            category,
            detail: detail.into(),
            rolled_back: false,
            cleanup: Vec::new(),
        }
    }

    /// Record that a rollback was executed successfully.
    pub fn rolled_back(mut self) -> Self {
        self.rolled_back = true;
        self
    }

    /// Attach a cleanup failure. The category is left untouched.
    pub fn with_cleanup_error(mut self, error: CleanupError) -> Self {
        self.cleanup.push(error);
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub const fn category(&self) -> OutcomeCategory {
        self.category
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub const fn was_rolled_back(&self) -> bool {
        self.rolled_back
    }

    pub fn cleanup_errors(&self) -> &[CleanupError] {
        &self.cleanup
    }

    /// True if a rollback was attempted but failed.
    pub fn rollback_failed(&self) -> bool {
        self.cleanup
            .iter()
            .any(|err| err.stage == CleanupStage::Rollback)
    }

    /// Human readable one-line description, without the session name.
    pub fn describe(&self) -> String {
        let mut text = if self.detail.is_empty() {
            self.category.to_string()
        } else {
            format!("{} - {}", self.category, self.detail)
        };
        if self.rolled_back {
            text.push_str(" (rollback executed)");
        }
        for err in &self.cleanup {
            text.push_str(&format!(" [cleanup: {err}]"));
        }
        text
    }
}

/// Append-only, insertion-ordered collection of outcomes shared by all
/// sessions of a run.
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog {
    outcomes: Arc<Mutex<Vec<Outcome>>>,
}

impl OutcomeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, outcome: Outcome) {
        tracing::debug!(
            session = outcome.session(),
            category = %outcome.category(),
            "outcome recorded"
        );
        self.outcomes.lock().await.push(outcome);
    }

    pub async fn len(&self) -> usize {
        self.outcomes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.outcomes.lock().await.is_empty()
    }

    /// Whether an outcome for `session` has been appended.
    pub async fn contains(&self, session: &str) -> bool {
        self.outcomes
            .lock()
            .await
            .iter()
            .any(|outcome| outcome.session() == session)
    }

    /// Take every outcome collected so far, in append order.
    pub async fn drain(&self) -> Vec<Outcome> {
        let mut outcomes = self.outcomes.lock().await;
        let drained = std::mem::take(&mut *outcomes);
        drop(outcomes); // Release lock early
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_display() {
        assert_eq!(OutcomeCategory::Committed.to_string(), "COMMITTED");
        assert_eq!(OutcomeCategory::Interrupted.to_string(), "INTERRUPTED");
    }

    #[test]
    fn test_failure_class_maps_to_category() {
        assert_eq!(
            OutcomeCategory::from(FailureClass::Deadlock),
            OutcomeCategory::Deadlock
        );
        assert_eq!(
            OutcomeCategory::from(FailureClass::Timeout),
            OutcomeCategory::Timeout
        );
        assert_eq!(OutcomeCategory::from(FailureClass::Error), OutcomeCategory::Error);
    }

    #[test]
    fn test_describe_includes_rollback_and_cleanup() {
        let outcome = Outcome::new("session-2", OutcomeCategory::Deadlock, "victim")
            .rolled_back()
            .with_cleanup_error(CleanupError::new(CleanupStage::Close, "socket closed"));
        assert_eq!(
            outcome.describe(),
            "DEADLOCK - victim (rollback executed) [cleanup: close failed: socket closed]"
        );
        assert_eq!(outcome.category(), OutcomeCategory::Deadlock);
        assert!(!outcome.rollback_failed());
    }

    #[test]
    fn test_rollback_failure_keeps_category() {
        let outcome = Outcome::new("s", OutcomeCategory::Timeout, "waited")
            .with_cleanup_error(CleanupError::new(CleanupStage::Rollback, "gone"));
        assert_eq!(outcome.category(), OutcomeCategory::Timeout);
        assert!(outcome.rollback_failed());
        assert!(!outcome.was_rolled_back());
    }

    #[tokio::test]
    async fn test_drain_preserves_append_order() {
        let log = OutcomeLog::new();
        for name in ["b", "a", "c"] {
            log.append(Outcome::new(name, OutcomeCategory::Committed, ""))
                .await;
        }
        let names: Vec<String> = log
            .drain()
            .await
            .iter()
            .map(|o| o.session().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert!(log.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_all_kept() {
        let log = OutcomeLog::new();
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..64 {
            let log = log.clone();
            tasks.spawn(async move {
                log.append(Outcome::new(
                    format!("session-{i}"),
                    OutcomeCategory::Committed,
                    "",
                ))
                .await;
            });
        }
        while tasks.join_next().await.is_some() {}
        assert_eq!(log.len().await, 64);
        assert!(log.contains("session-63").await);
    }
}
