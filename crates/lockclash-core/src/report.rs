//! Final summary of a run.

use std::fmt::Write;

use itertools::Itertools;
use serde::Serialize;
use strum::IntoEnumIterator;

use crate::{
    cancel::CancelReason,
    outcome::{Outcome, OutcomeCategory},
    Result,
};

/// Everything the harness learned from one run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Outcomes in the order they were recorded.
    pub outcomes: Vec<Outcome>,
    /// Sessions that never recorded an outcome.
    pub unresolved: Vec<String>,
    /// Whether the await bound elapsed before every session finished.
    pub timed_out: bool,
    /// Why the run was cancelled, if it was.
    pub cancelled_by: Option<CancelReason>,
    pub elapsed_ms: u64,
}

impl Report {
    /// Number of outcomes in `category`.
    pub fn count(&self, category: OutcomeCategory) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.category() == category)
            .count()
    }

    pub fn outcome_for(&self, session: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.session() == session)
    }

    /// `committed=1 deadlock=1 timeout=0 error=0 interrupted=0`
    pub fn counts_line(&self) -> String {
        let counts = self.outcomes.iter().map(Outcome::category).counts();
        OutcomeCategory::iter()
            .map(|category| {
                format!(
                    "{}={}",
                    category.to_string().to_lowercase(),
                    counts.get(&category).copied().unwrap_or(0)
                )
            })
            .join(" ")
    }

    /// Plain-text summary block.
    pub fn render_text(&self) -> String {
        let mut text = String::from("===== SUMMARY =====\n");
        for outcome in &self.outcomes {
            let _ = writeln!(text, "{}: {}", outcome.session(), outcome.describe());
        }
        for session in &self.unresolved {
            let _ = writeln!(text, "{session}: did not finish in time");
        }
        let _ = writeln!(text, "{}", self.counts_line());
        if self.timed_out {
            let _ = writeln!(
                text,
                "note: await bound elapsed after {} ms; unfinished sessions were cancelled",
                self.elapsed_ms
            );
        } else if let Some(reason) = self.cancelled_by {
            let _ = writeln!(text, "note: run cancelled by {reason}");
        }
        text
    }

    /// Pretty-printed JSON report.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
