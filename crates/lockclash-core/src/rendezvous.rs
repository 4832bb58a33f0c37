//! Two-phase start barrier for the sessions of one run.
//!
//! Phase one: every session fires its [`ReadySignal`] and the coordinator
//! waits until the ready count reaches zero. Phase two: the coordinator
//! opens the start gate once and every waiting session observes the same
//! transition. A `Rendezvous` is single-shot.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared barrier state.
#[derive(Debug)]
pub struct Rendezvous {
    parties: usize,
    ready_remaining: watch::Sender<usize>,
    start_gate: watch::Sender<bool>,
}

impl Rendezvous {
    /// Create a barrier for `parties` sessions.
    #[must_use]
    pub fn new(parties: usize) -> Arc<Self> {
        let (ready_remaining, _) = watch::channel(parties);
        let (start_gate, _) = watch::channel(false);
        Arc::new(Self {
            parties,
            ready_remaining,
            start_gate,
        })
    }

    pub const fn parties(&self) -> usize {
        self.parties
    }

    /// Hand out a readiness guard. Firing it (or dropping it) counts the
    /// session as ready exactly once.
    pub fn ready_signal(self: &Arc<Self>) -> ReadySignal {
        ReadySignal {
            rendezvous: Arc::clone(self),
            fired: false,
        }
    }

    /// Sessions that have not signalled ready yet.
    pub fn ready_remaining(&self) -> usize {
        *self.ready_remaining.borrow()
    }

    pub fn is_released(&self) -> bool {
        *self.start_gate.borrow()
    }

    fn mark_ready(&self) {
        self.ready_remaining.send_modify(|remaining| {
            if *remaining == 0 {
                tracing::warn!("ready signalled with no sessions outstanding");
            } else {
                *remaining -= 1;
            }
        });
    }

    /// Phase one: wait until every session has signalled ready.
    pub async fn wait_all_ready(&self) {
        let mut rx = self.ready_remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|remaining| *remaining == 0).await;
    }

    /// Phase two: open the start gate.
    ///
    /// Returns `true` only for the call that actually released. Refuses to
    /// release while sessions are still outstanding.
    pub fn release(&self) -> bool {
        if self.ready_remaining() > 0 {
            tracing::warn!(
                remaining = self.ready_remaining(),
                "refusing to release start gate before all sessions are ready"
            );
            return false;
        }
        self.start_gate.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        })
    }

    /// Wait for every session, then release. Returns whether this call
    /// released the gate.
    pub async fn release_when_ready(&self) -> bool {
        self.wait_all_ready().await;
        self.release()
    }

    /// Block until the start gate opens.
    pub async fn wait_start(&self) {
        let mut rx = self.start_gate.subscribe();
        let _ = rx.wait_for(|released| *released).await;
    }
}

/// Single-fire readiness token held by one session.
///
/// Calling [`ReadySignal::fire`] more than once has no further effect, and
/// a token that is dropped without firing fires on drop. Every exit path of
/// a session therefore counts exactly once.
#[derive(Debug)]
pub struct ReadySignal {
    rendezvous: Arc<Rendezvous>,
    fired: bool,
}

impl ReadySignal {
    /// Count this session as ready. Returns `true` on the first call only.
    pub fn fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        self.rendezvous.mark_ready();
        true
    }

    pub const fn has_fired(&self) -> bool {
        self.fired
    }
}

impl Drop for ReadySignal {
    fn drop(&mut self) {
        self.fire();
    }
}
