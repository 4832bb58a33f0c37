//! Exclusive row acquisition through a session's handle.

use crate::{
    engine::ResourceHandle,
    error::LockFailure,
    types::{LockRequest, TableName},
};

/// Issues `SELECT ... FOR UPDATE` for one configured table.
#[derive(Debug, Clone)]
pub struct LockClient {
    table: TableName,
}

impl LockClient {
    pub const fn new(table: TableName) -> Self {
        Self { table }
    }

    pub const fn table(&self) -> &TableName {
        &self.table
    }

    /// Lock the requested row for the handle's open transaction.
    ///
    /// Blocks while another transaction holds the row. A row that does not
    /// exist is a failure, not a silent success.
    ///
    /// # Errors
    ///
    /// Returns the engine's failure (deadlock victim, lock-wait timeout,
    /// anything else) or [`LockFailure::NotFound`].
    pub async fn acquire(
        &self,
        handle: &mut dyn ResourceHandle,
        request: LockRequest<'_>,
    ) -> Result<(), LockFailure> {
        tracing::debug!(
            session = request.session,
            table = %self.table,
            target = %request.target,
            "requesting row lock"
        );

        match handle.select_for_update(&self.table, request.target).await? {
            Some(_) => {
                tracing::debug!(session = request.session, target = %request.target, "row locked");
                Ok(())
            }
            None => Err(LockFailure::NotFound {
                table: self.table.to_string(),
                target: request.target.get(),
            }),
        }
    }
}
