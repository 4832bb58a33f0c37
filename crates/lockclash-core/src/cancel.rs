//! Cooperative cancellation for running sessions.
//!
//! The coordinator owns a [`CancelSource`]; every session gets a
//! [`CancelToken`] and listens on it at each suspension point (start gate,
//! hold delay, lock wait). Requests come from the run deadline or from
//! SIGINT/SIGTERM.

use std::time::Duration;

use tokio::{sync::watch, time::Instant};

use crate::Result;

/// Why a run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The global await bound elapsed
    Deadline,
    /// SIGINT/SIGTERM received
    Signal,
}

/// Sending half, held by the coordinator.
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: watch::Sender<Option<CancelReason>>,
}

impl CancelSource {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Get a token for one session.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Request cancellation. The first reason wins; returns whether this
    /// call was the one that cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                tracing::info!(%reason, "cancellation requested");
                *current = Some(reason);
                true
            }
        })
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half, held by a session.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<Option<CancelReason>>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolve once cancellation is requested.
    ///
    /// If the source is dropped without cancelling this never resolves.
    pub async fn cancelled(&mut self) -> CancelReason {
        // Copy out of the watch guard before any further await.
        let reason = self.rx.wait_for(Option::is_some).await.ok().map(|r| *r);
        match reason {
            Some(reason) => reason.unwrap_or(CancelReason::Signal),
            None => std::future::pending().await,
        }
    }
}

/// Instant `after` from now, saturating far into the future instead of
/// overflowing.
pub(crate) fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Forward SIGINT/SIGTERM (Ctrl-C off unix) into `source`.
///
/// The forwarding task lives until the first signal arrives.
pub fn forward_signals(source: CancelSource) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| crate::Error::IoError(format!("Failed to setup SIGINT: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| crate::Error::IoError(format!("Failed to setup SIGTERM: {e}")))?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            }
            source.cancel(CancelReason::Signal);
        });

        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl-C");
                source.cancel(CancelReason::Signal);
            }
        });

        Ok(())
    }
}
