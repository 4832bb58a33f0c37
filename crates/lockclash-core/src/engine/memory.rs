//! In-process row-lock engine.
//!
//! Behaves like a small InnoDB for the one query the harness issues:
//! exclusive row locks held until commit or rollback, waits-for-graph
//! deadlock detection where the requester that closes a cycle becomes the
//! victim and loses its whole transaction, and a bounded lock wait. Used by
//! tests and for running the harness without a database server.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{ResourceHandle, ResourceManager};
use crate::{
    cancel::deadline_after,
    classify::{SQLSTATE_DEADLOCK, SQLSTATE_LOCK_WAIT_TIMEOUT},
    error::LockFailure,
    types::{IsolationLevel, TableName, TargetId},
    Error, Result,
};

const DEADLOCK_MESSAGE: &str = "Deadlock found when trying to get lock; try restarting transaction";
const TIMEOUT_MESSAGE: &str = "Lock wait timeout exceeded; try restarting transaction";

type TxId = u64;

/// Behaviour switches for [`MemoryEngine`].
#[derive(Debug, Clone)]
pub struct MemoryEngineOptions {
    /// Detect waits-for cycles and abort the requester that closes one.
    pub deadlock_detection: bool,
    /// How long a lock request may wait before failing.
    pub lock_wait_timeout: Duration,
    /// Number of initial `open` calls that fail.
    pub failing_opens: usize,
    /// Make every rollback fail (locks stay held until close).
    pub fail_rollback: bool,
    /// Make every close report an error (locks are still released).
    pub fail_close: bool,
}

impl Default for MemoryEngineOptions {
    fn default() -> Self {
        Self {
            deadlock_detection: true,
            lock_wait_timeout: Duration::from_secs(50),
            failing_opens: 0,
            fail_rollback: false,
            fail_close: false,
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    holders: HashMap<i64, TxId>,
    waits_for: HashMap<TxId, TxId>,
}

impl LockTable {
    /// Whether `tx` waiting on its current holder closes a cycle.
    fn closes_cycle(&self, tx: TxId) -> bool {
        let mut current = self.waits_for.get(&tx).copied();
        let mut steps = 0;
        while let Some(next) = current {
            if next == tx {
                return true;
            }
            steps += 1;
            if steps > self.waits_for.len() {
                return false;
            }
            current = self.waits_for.get(&next).copied();
        }
        false
    }

    fn release_all(&mut self, tx: TxId) -> usize {
        let before = self.holders.len();
        self.holders.retain(|_, holder| *holder != tx);
        self.waits_for.remove(&tx);
        before - self.holders.len()
    }
}

#[derive(Debug)]
struct Shared {
    table: TableName,
    rows: HashSet<i64>,
    options: MemoryEngineOptions,
    locks: Mutex<LockTable>,
    released: Notify,
    next_tx: AtomicU64,
    opens: AtomicUsize,
    open_handles: AtomicUsize,
}

impl Shared {
    fn locks(&self) -> MutexGuard<'_, LockTable> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_all(&self, tx: TxId) {
        let released = self.locks().release_all(tx);
        if released > 0 {
            tracing::trace!(tx, released, "memory engine released locks");
        }
        self.released.notify_waiters();
    }
}

/// In-process engine holding one table of lockable rows.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    pub fn new(
        table: TableName,
        rows: impl IntoIterator<Item = i64>,
        options: MemoryEngineOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                table,
                rows: rows.into_iter().collect(),
                options,
                locks: Mutex::new(LockTable::default()),
                released: Notify::new(),
                next_tx: AtomicU64::new(1),
                opens: AtomicUsize::new(0),
                open_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Handles opened and not yet closed or dropped.
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Row locks currently held by any transaction.
    pub fn held_locks(&self) -> usize {
        self.shared.locks().holders.len()
    }
}

#[async_trait]
impl ResourceManager for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, isolation: IsolationLevel) -> Result<Box<dyn ResourceHandle>> {
        let attempt = self.shared.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.shared.options.failing_opens {
            return Err(Error::Connection(format!(
                "memory engine refused connection #{}",
                attempt + 1
            )));
        }

        let tx = self.shared.next_tx.fetch_add(1, Ordering::SeqCst);
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(tx, %isolation, "memory engine opened handle");

        Ok(Box::new(MemoryHandle {
            shared: Arc::clone(&self.shared),
            tx,
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct MemoryHandle {
    shared: Arc<Shared>,
    tx: TxId,
    closed: bool,
}

impl MemoryHandle {
    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.release_all(self.tx);
            self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ResourceHandle for MemoryHandle {
    async fn select_for_update(
        &mut self,
        table: &TableName,
        target: TargetId,
    ) -> std::result::Result<Option<TargetId>, LockFailure> {
        if *table != self.shared.table {
            return Err(LockFailure::engine(
                format!("Table '{table}' doesn't exist"),
                Some("42S02"),
            ));
        }
        if !self.shared.rows.contains(&target.get()) {
            return Ok(None);
        }

        let deadline = deadline_after(self.shared.options.lock_wait_timeout);
        loop {
            let notified = {
                let mut locks = self.shared.locks();
                match locks.holders.get(&target.get()).copied() {
                    None => {
                        locks.holders.insert(target.get(), self.tx);
                        locks.waits_for.remove(&self.tx);
                        return Ok(Some(target));
                    }
                    Some(holder) if holder == self.tx => return Ok(Some(target)),
                    Some(holder) => {
                        locks.waits_for.insert(self.tx, holder);
                        if self.shared.options.deadlock_detection && locks.closes_cycle(self.tx) {
                            locks.release_all(self.tx);
                            drop(locks);
                            self.shared.released.notify_waiters();
                            tracing::debug!(tx = self.tx, %target, "memory engine chose deadlock victim");
                            return Err(LockFailure::engine(
                                DEADLOCK_MESSAGE,
                                Some(SQLSTATE_DEADLOCK),
                            ));
                        }
                        // Registered before the guard drops so a release in
                        // between is not missed.
                        self.shared.released.notified()
                    }
                }
            };

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                self.shared.locks().waits_for.remove(&self.tx);
                return Err(LockFailure::engine(
                    TIMEOUT_MESSAGE,
                    Some(SQLSTATE_LOCK_WAIT_TIMEOUT),
                ));
            }
        }
    }

    async fn commit(&mut self) -> std::result::Result<(), LockFailure> {
        self.shared.release_all(self.tx);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.shared.options.fail_rollback {
            return Err(Error::Engine("memory engine rollback failure".into()));
        }
        self.shared.release_all(self.tx);
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.finish();
        if self.shared.options.fail_close {
            return Err(Error::Engine("memory engine close failure".into()));
        }
        Ok(())
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.finish();
    }
}
