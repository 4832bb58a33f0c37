//! Storage engine seam.
//!
//! The harness never detects deadlocks itself. It opens one handle per
//! session, issues `SELECT ... FOR UPDATE` through it and reads whatever
//! signal the engine produces.

pub mod memory;
pub mod mysql;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

pub use memory::{MemoryEngine, MemoryEngineOptions};
pub use mysql::MySqlEngine;

use crate::{
    config::{EngineKind, HarnessConfig},
    error::LockFailure,
    types::{IsolationLevel, TableName, TargetId},
    Result,
};

/// Opens transactional handles.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Short engine name used in logs.
    fn name(&self) -> &'static str;

    /// Open a fresh handle with auto-commit off and a transaction started at
    /// the requested isolation level.
    async fn open(&self, isolation: IsolationLevel) -> Result<Box<dyn ResourceHandle>>;
}

/// One session's exclusive connection-equivalent.
#[async_trait]
pub trait ResourceHandle: Send {
    /// Run the exclusive row selection. `Ok(Some(id))` means the row exists
    /// and is now locked by this handle's transaction; `Ok(None)` means no
    /// such row.
    async fn select_for_update(
        &mut self,
        table: &TableName,
        target: TargetId,
    ) -> std::result::Result<Option<TargetId>, LockFailure>;

    async fn commit(&mut self) -> std::result::Result<(), LockFailure>;

    async fn rollback(&mut self) -> Result<()>;

    /// Release the handle. Called exactly once, on every exit path.
    async fn close(self: Box<Self>) -> Result<()>;

    /// Drop the handle without another round trip. The open transaction is
    /// rolled back by the engine when the connection goes away. Used when a
    /// statement was abandoned mid-flight and the connection cannot take a
    /// new command until it completes.
    fn discard(self: Box<Self>) {
        drop(self);
    }
}

/// Build the engine named by `config`.
///
/// # Errors
///
/// Returns `InvalidConfig` if the table name or database url is unusable.
pub fn from_config(config: &HarnessConfig) -> Result<Arc<dyn ResourceManager>> {
    let engine: Arc<dyn ResourceManager> = match config.engine {
        EngineKind::Mysql => Arc::new(MySqlEngine::new(
            &config.database,
            config.lock_wait_timeout_secs,
        )?),
        EngineKind::Memory => {
            let mut options = MemoryEngineOptions {
                deadlock_detection: config.memory.deadlock_detection,
                ..MemoryEngineOptions::default()
            };
            if let Some(secs) = config.lock_wait_timeout_secs {
                options.lock_wait_timeout = Duration::from_secs(secs);
            }
            Arc::new(MemoryEngine::new(
                config.table_name()?,
                config.memory_rows(),
                options,
            ))
        }
    };
    tracing::debug!(engine = engine.name(), "engine configured");
    Ok(engine)
}
