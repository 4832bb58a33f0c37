//! Run coordinator.
//!
//! Spawns one task per session, waits for all of them to be ready, opens
//! the start gate once and collects outcomes until every session has
//! finished or the await bound elapses. On expiry sessions are cancelled,
//! given a grace period to record an outcome, and then abandoned.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinSet, time::Instant};
use tracing::Instrument;

use crate::{
    cancel::{deadline_after, CancelReason, CancelSource},
    config::HarnessConfig,
    engine::ResourceManager,
    lock_client::LockClient,
    outcome::{Outcome, OutcomeCategory, OutcomeLog},
    rendezvous::Rendezvous,
    report::Report,
    session::{plan_sessions, run_session, Session, SessionContext},
    timeline::Timeline,
    types::IsolationLevel,
    Result,
};

/// One configured run.
pub struct Harness {
    engine: Arc<dyn ResourceManager>,
    client: LockClient,
    sessions: Vec<Session>,
    isolation: IsolationLevel,
    hold: Duration,
    await_bound: Duration,
    cancel_grace: Duration,
    timeline: Timeline,
    cancel: CancelSource,
}

impl Harness {
    /// Prepare a run from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: &HarnessConfig, engine: Arc<dyn ResourceManager>) -> Result<Self> {
        config.validate()?;
        let (a, b) = config.targets();
        Ok(Self {
            engine,
            client: LockClient::new(config.table_name()?),
            sessions: plan_sessions(config.sessions, a, b),
            isolation: config.isolation,
            hold: config.hold(),
            await_bound: config.await_bound(),
            cancel_grace: config.cancel_grace(),
            timeline: Timeline::stdout(),
            cancel: CancelSource::new(),
        })
    }

    #[must_use]
    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = timeline;
        self
    }

    /// Use an externally owned cancel source, e.g. one fed by signals.
    #[must_use]
    pub fn with_cancel_source(mut self, cancel: CancelSource) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the await bound with sub-second precision.
    #[must_use]
    pub fn with_await_bound(mut self, await_bound: Duration) -> Self {
        self.await_bound = await_bound;
        self
    }

    #[must_use]
    pub fn with_cancel_grace(mut self, cancel_grace: Duration) -> Self {
        self.cancel_grace = cancel_grace;
        self
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Execute the run and report every session.
    pub async fn run(self) -> Report {
        let started = Instant::now();
        let deadline = deadline_after(self.await_bound);
        let rendezvous = Rendezvous::new(self.sessions.len());
        let outcomes = OutcomeLog::new();

        let ctx = SessionContext {
            engine: Arc::clone(&self.engine),
            client: self.client.clone(),
            isolation: self.isolation,
            hold: self.hold,
            rendezvous: Arc::clone(&rendezvous),
            outcomes: outcomes.clone(),
            timeline: self.timeline.clone(),
        };

        tracing::info!(
            engine = self.engine.name(),
            sessions = self.sessions.len(),
            table = %self.client.table(),
            hold_ms = self.hold.as_millis(),
            "starting run"
        );

        let mut tasks = JoinSet::new();
        for session in &self.sessions {
            let span = tracing::info_span!("session", name = session.name());
            tasks.spawn(
                run_session(session.clone(), ctx.clone(), self.cancel.token()).instrument(span),
            );
        }

        match tokio::time::timeout_at(deadline, rendezvous.release_when_ready()).await {
            Ok(true) => tracing::info!("all sessions ready, start gate released"),
            Ok(false) => tracing::debug!("start gate was already released"),
            Err(_) => tracing::warn!(
                remaining = rendezvous.ready_remaining(),
                "await bound elapsed before all sessions were ready"
            ),
        }

        let timed_out = loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => tracing::error!(error = %e, "session task failed"),
                Ok(None) => break false,
                Err(_) => break true,
            }
        };

        if timed_out {
            tracing::warn!(
                await_ms = self.await_bound.as_millis(),
                "await bound elapsed, cancelling sessions"
            );
            self.cancel.cancel(CancelReason::Deadline);

            let grace = deadline_after(self.cancel_grace);
            while let Ok(Some(joined)) = tokio::time::timeout_at(grace, tasks.join_next()).await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "session task failed");
                }
            }
            if !tasks.is_empty() {
                tracing::warn!(
                    remaining = tasks.len(),
                    "abandoning sessions that ignored cancellation"
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }

        let mut unresolved = Vec::new();
        for session in &self.sessions {
            if outcomes.contains(session.name()).await {
                continue;
            }
            if timed_out {
                self.timeline.event(session.name(), "did not finish in time");
                unresolved.push(session.name().to_string());
            } else {
                outcomes
                    .append(Outcome::new(
                        session.name(),
                        OutcomeCategory::Error,
                        "session ended without recording an outcome",
                    ))
                    .await;
            }
        }

        let report = Report {
            outcomes: outcomes.drain().await,
            unresolved,
            timed_out,
            cancelled_by: self.cancel.reason(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            elapsed_ms = report.elapsed_ms,
            timed_out,
            counts = %report.counts_line(),
            "run finished"
        );
        report
    }
}
