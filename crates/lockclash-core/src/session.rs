//! One session's lifecycle.
//!
//! open handle -> ready -> start gate -> lock first -> hold -> lock second
//! -> commit, with rollback on any failure or interruption and an
//! unconditional close. A session cancelled inside a lock wait discards its
//! connection instead, since the abandoned statement still owns it. Exactly
//! one [`Outcome`] is appended per session.

use std::{sync::Arc, time::Duration};

use crate::{
    cancel::{CancelReason, CancelToken},
    classify::classify,
    engine::{ResourceHandle, ResourceManager},
    error::{CleanupError, CleanupStage, LockFailure},
    lock_client::LockClient,
    outcome::{Outcome, OutcomeCategory, OutcomeLog},
    rendezvous::Rendezvous,
    timeline::Timeline,
    types::{IsolationLevel, LockRequest, SessionState, TargetId},
};

/// A named session and the order in which it takes its two locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    name: String,
    first: TargetId,
    second: TargetId,
    state: SessionState,
}

impl Session {
    pub fn new(name: impl Into<String>, first: TargetId, second: TargetId) -> Self {
        Self {
            name: name.into(),
            first,
            second,
            state: SessionState::Initializing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn first(&self) -> TargetId {
        self.first
    }

    pub const fn second(&self) -> TargetId {
        self.second
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            tracing::trace!(session = %self.name, from = %self.state, to = %next, "state change");
            self.state = next;
        } else {
            tracing::warn!(
                session = %self.name,
                from = %self.state,
                to = %next,
                "ignoring illegal state transition"
            );
        }
    }
}

/// Build `count` sessions alternating lock order: odd-numbered sessions
/// lock `a` then `b`, even-numbered ones `b` then `a`.
pub fn plan_sessions(count: usize, a: TargetId, b: TargetId) -> Vec<Session> {
    (0..count)
        .map(|index| {
            let (first, second) = if index % 2 == 0 { (a, b) } else { (b, a) };
            Session::new(format!("session-{}", index + 1), first, second)
        })
        .collect()
}

/// Shared collaborators handed to every session of a run.
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<dyn ResourceManager>,
    pub client: LockClient,
    pub isolation: IsolationLevel,
    pub hold: Duration,
    pub rendezvous: Arc<Rendezvous>,
    pub outcomes: OutcomeLog,
    pub timeline: Timeline,
}

/// How the locked section ended.
enum Disposition {
    Committed,
    Failed(LockFailure),
    Interrupted {
        reason: CancelReason,
        during: String,
        /// A statement was in flight when the cancel arrived.
        mid_statement: bool,
    },
}

/// Drive one session to completion and append its outcome.
///
/// Never returns an error: every failure becomes part of the outcome.
pub async fn run_session(mut session: Session, ctx: SessionContext, mut cancel: CancelToken) {
    let mut ready = ctx.rendezvous.ready_signal();
    let name = session.name().to_string();
    ctx.timeline.event(&name, format!("connecting ({})", ctx.engine.name()));

    let opened = tokio::select! {
        opened = ctx.engine.open(ctx.isolation) => opened,
        reason = cancel.cancelled() => {
            ready.fire();
            session.transition(SessionState::Aborted);
            ctx.timeline.event(&name, format!("cancelled ({reason}) while connecting"));
            ctx.outcomes
                .append(Outcome::new(
                    &name,
                    OutcomeCategory::Interrupted,
                    format!("cancelled by {reason} while connecting"),
                ))
                .await;
            return;
        }
    };

    let mut handle = match opened {
        Ok(handle) => handle,
        Err(e) => {
            ready.fire();
            session.transition(SessionState::Aborted);
            ctx.timeline.event(&name, format!("could not open handle: {e}"));
            ctx.outcomes
                .append(Outcome::new(&name, OutcomeCategory::Error, e.to_string()))
                .await;
            return;
        }
    };

    ready.fire();
    session.transition(SessionState::Ready);
    ctx.timeline.event(&name, "ready, waiting for start");

    let interrupted_at_gate = tokio::select! {
        () = ctx.rendezvous.wait_start() => None,
        reason = cancel.cancelled() => Some(Disposition::Interrupted {
            reason,
            during: "waiting for start".to_string(),
            mid_statement: false,
        }),
    };
    let disposition = match interrupted_at_gate {
        Some(disposition) => disposition,
        None => {
            session.transition(SessionState::Running);
            lock_sequence(&session, &ctx, handle.as_mut(), &mut cancel).await
        }
    };

    let mut discard = false;
    let outcome = match disposition {
        Disposition::Committed => {
            session.transition(SessionState::Committed);
            ctx.timeline.event(&name, "committed");
            let detail = if session.first() == session.second() {
                format!("locked id={}", session.first())
            } else {
                format!("locked id={} then id={}", session.first(), session.second())
            };
            Outcome::new(&name, OutcomeCategory::Committed, detail)
        }
        Disposition::Failed(failure) => {
            session.transition(SessionState::Aborted);
            let category = OutcomeCategory::from(classify(&failure));
            ctx.timeline.event(&name, format!("{category}: {}", failure.message()));
            let outcome = Outcome::new(&name, category, describe_failure(&failure));
            roll_back(&name, &ctx, handle.as_mut(), outcome).await
        }
        Disposition::Interrupted {
            reason,
            during,
            mid_statement,
        } => {
            session.transition(SessionState::Aborted);
            ctx.timeline.event(&name, format!("cancelled ({reason}) while {during}"));
            if mid_statement {
                discard = true;
                Outcome::new(
                    &name,
                    OutcomeCategory::Interrupted,
                    format!("cancelled by {reason} while {during}; connection discarded"),
                )
            } else {
                let outcome = Outcome::new(
                    &name,
                    OutcomeCategory::Interrupted,
                    format!("cancelled by {reason} while {during}"),
                );
                roll_back(&name, &ctx, handle.as_mut(), outcome).await
            }
        }
    };

    let outcome = if discard {
        ctx.timeline.event(&name, "connection discarded");
        handle.discard();
        outcome
    } else {
        match handle.close().await {
            Ok(()) => outcome,
            Err(e) => {
                tracing::warn!(session = %name, error = %e, "failed to close handle");
                outcome.with_cleanup_error(CleanupError::new(CleanupStage::Close, e.to_string()))
            }
        }
    };

    ctx.outcomes.append(outcome).await;
}

async fn lock_sequence(
    session: &Session,
    ctx: &SessionContext,
    handle: &mut dyn ResourceHandle,
    cancel: &mut CancelToken,
) -> Disposition {
    let name = session.name();

    for (step, target) in [session.first(), session.second()].into_iter().enumerate() {
        ctx.timeline.event(name, format!("requesting lock on id={target}"));
        let request = LockRequest {
            target,
            session: name,
        };
        let acquired = tokio::select! {
            acquired = ctx.client.acquire(&mut *handle, request) => acquired,
            reason = cancel.cancelled() => {
                return Disposition::Interrupted {
                    reason,
                    during: format!("waiting for lock on id={target}"),
                    mid_statement: true,
                };
            }
        };
        if let Err(failure) = acquired {
            return Disposition::Failed(failure);
        }

        if step == 0 {
            ctx.timeline.event(
                name,
                format!("locked id={target}, holding for {} ms", ctx.hold.as_millis()),
            );
            tokio::select! {
                () = tokio::time::sleep(ctx.hold) => {}
                reason = cancel.cancelled() => {
                    return Disposition::Interrupted {
                        reason,
                        during: format!("holding id={target}"),
                        mid_statement: false,
                    };
                }
            }
        } else {
            ctx.timeline.event(name, format!("locked id={target}"));
        }
    }

    match handle.commit().await {
        Ok(()) => Disposition::Committed,
        Err(failure) => Disposition::Failed(failure),
    }
}

async fn roll_back(
    name: &str,
    ctx: &SessionContext,
    handle: &mut dyn ResourceHandle,
    outcome: Outcome,
) -> Outcome {
    match handle.rollback().await {
        Ok(()) => {
            ctx.timeline.event(name, "rolled back");
            outcome.rolled_back()
        }
        Err(e) => {
            tracing::warn!(session = name, error = %e, "rollback failed");
            ctx.timeline.event(name, format!("rollback failed: {e}"));
            outcome.with_cleanup_error(CleanupError::new(CleanupStage::Rollback, e.to_string()))
        }
    }
}

fn describe_failure(failure: &LockFailure) -> String {
    match failure.code() {
        Some(code) => format!("{} [SQLSTATE {code}]", failure.message()),
        None => failure.message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cancel::CancelSource,
        engine::{MemoryEngine, MemoryEngineOptions},
        types::TableName,
        Result,
    };

    fn context(
        options: MemoryEngineOptions,
        rows: &[i64],
        parties: usize,
    ) -> Result<(SessionContext, MemoryEngine)> {
        let table = TableName::parse("producto")?;
        let engine = MemoryEngine::new(table.clone(), rows.iter().copied(), options);
        let ctx = SessionContext {
            engine: Arc::new(engine.clone()),
            client: LockClient::new(table),
            isolation: IsolationLevel::RepeatableRead,
            hold: Duration::from_millis(10),
            rendezvous: Rendezvous::new(parties),
            outcomes: OutcomeLog::new(),
            timeline: Timeline::silent(),
        };
        Ok((ctx, engine))
    }

    #[test]
    fn test_plan_alternates_order() {
        let a = TargetId::new(1);
        let b = TargetId::new(2);
        let plans = plan_sessions(3, a, b);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].name(), "session-1");
        assert_eq!((plans[0].first(), plans[0].second()), (a, b));
        assert_eq!((plans[1].first(), plans[1].second()), (b, a));
        assert_eq!((plans[2].first(), plans[2].second()), (a, b));
        assert!(plans
            .iter()
            .all(|plan| plan.state() == SessionState::Initializing));
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut session = Session::new("s", TargetId::new(1), TargetId::new(2));
        session.transition(SessionState::Committed);
        assert_eq!(session.state(), SessionState::Initializing);
        session.transition(SessionState::Ready);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_single_session_commits() -> Result<()> {
        let (ctx, engine) = context(MemoryEngineOptions::default(), &[1, 2], 1)?;
        let source = CancelSource::new();
        let session = Session::new("session-1", TargetId::new(1), TargetId::new(2));

        let task = tokio::spawn(run_session(session, ctx.clone(), source.token()));
        assert!(ctx.rendezvous.release_when_ready().await);
        task.await.map_err(|e| crate::Error::Engine(e.to_string()))?;

        let outcomes = ctx.outcomes.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].category(), OutcomeCategory::Committed);
        assert!(!outcomes[0].was_rolled_back());
        assert_eq!(engine.held_locks(), 0);
        assert_eq!(engine.open_handles(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_row_rolls_back_as_error() -> Result<()> {
        let (ctx, engine) = context(MemoryEngineOptions::default(), &[1], 1)?;
        let source = CancelSource::new();
        let session = Session::new("session-1", TargetId::new(1), TargetId::new(999));

        let task = tokio::spawn(run_session(session, ctx.clone(), source.token()));
        ctx.rendezvous.release_when_ready().await;
        task.await.map_err(|e| crate::Error::Engine(e.to_string()))?;

        let outcomes = ctx.outcomes.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].category(), OutcomeCategory::Error);
        assert!(outcomes[0].was_rolled_back());
        assert!(outcomes[0].detail().contains("999"));
        assert_eq!(engine.held_locks(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_failure_still_signals_ready() -> Result<()> {
        let options = MemoryEngineOptions {
            failing_opens: 1,
            ..MemoryEngineOptions::default()
        };
        let (ctx, _engine) = context(options, &[1, 2], 2)?;
        let source = CancelSource::new();
        let session = Session::new("session-1", TargetId::new(1), TargetId::new(2));

        run_session(session, ctx.clone(), source.token()).await;

        // Exactly one of the two parties, no double signal.
        assert_eq!(ctx.rendezvous.ready_remaining(), 1);
        let outcomes = ctx.outcomes.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].category(), OutcomeCategory::Error);
        assert!(!outcomes[0].was_rolled_back());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_interrupted() -> Result<()> {
        let (ctx, engine) = context(MemoryEngineOptions::default(), &[1, 2], 1)?;
        let source = CancelSource::new();
        let session = Session::new("session-1", TargetId::new(1), TargetId::new(2));

        let task = tokio::spawn(run_session(session, ctx.clone(), source.token()));
        ctx.rendezvous.wait_all_ready().await;
        source.cancel(CancelReason::Signal);
        task.await.map_err(|e| crate::Error::Engine(e.to_string()))?;

        let outcomes = ctx.outcomes.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].category(), OutcomeCategory::Interrupted);
        assert!(outcomes[0].was_rolled_back());
        assert!(outcomes[0].detail().contains("waiting for start"));
        assert!(!ctx.rendezvous.is_released());
        assert_eq!(engine.open_handles(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cleanup_failures_are_attached() -> Result<()> {
        let options = MemoryEngineOptions {
            fail_rollback: true,
            fail_close: true,
            ..MemoryEngineOptions::default()
        };
        let (ctx, engine) = context(options, &[1], 1)?;
        let source = CancelSource::new();
        let session = Session::new("session-1", TargetId::new(1), TargetId::new(2));

        let task = tokio::spawn(run_session(session, ctx.clone(), source.token()));
        ctx.rendezvous.release_when_ready().await;
        task.await.map_err(|e| crate::Error::Engine(e.to_string()))?;

        let outcomes = ctx.outcomes.drain().await;
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.category(), OutcomeCategory::Error);
        assert!(outcome.rollback_failed());
        assert_eq!(outcome.cleanup_errors().len(), 2);
        assert_eq!(engine.held_locks(), 0);
        Ok(())
    }

    #[test]
    fn test_session_future_is_send() -> Result<()> {
        fn assert_send<T: Send>(_: &T) {}

        let (ctx, _engine) = context(MemoryEngineOptions::default(), &[1, 2], 1)?;
        let source = CancelSource::new();
        let session = Session::new("session-1", TargetId::new(1), TargetId::new(2));
        let future = run_session(session, ctx, source.token());
        assert_send(&future);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_during_lock_wait_discards_connection() -> Result<()> {
        let (ctx, engine) = context(MemoryEngineOptions::default(), &[1, 2], 1)?;
        let mut blocker = engine.open(IsolationLevel::RepeatableRead).await?;
        let table = TableName::parse("producto")?;
        assert!(blocker.select_for_update(&table, TargetId::new(1)).await.is_ok());

        let source = CancelSource::new();
        let session = Session::new("session-1", TargetId::new(1), TargetId::new(2));
        let task = tokio::spawn(run_session(session, ctx.clone(), source.token()));
        ctx.rendezvous.release_when_ready().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        source.cancel(CancelReason::Deadline);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .map_err(|e| crate::Error::Engine(e.to_string()))?
            .map_err(|e| crate::Error::Engine(e.to_string()))?;

        let outcomes = ctx.outcomes.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].category(), OutcomeCategory::Interrupted);
        assert!(outcomes[0].detail().contains("waiting for lock on id=1"));
        assert!(outcomes[0].detail().contains("connection discarded"));
        assert!(outcomes[0].cleanup_errors().is_empty());
        // Only the blocker remains.
        assert_eq!(engine.open_handles(), 1);
        assert_eq!(engine.held_locks(), 1);
        blocker.close().await?;
        assert_eq!(engine.held_locks(), 0);
        Ok(())
    }
}
