//! MySQL/InnoDB engine over `sqlx`.
//!
//! InnoDB detects deadlocks itself (error 1213, SQLSTATE 40001) and bounds
//! lock waits with `innodb_lock_wait_timeout` (error 1205, SQLSTATE HY000).

use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError},
    ConnectOptions, Connection, Executor,
};

use super::{ResourceHandle, ResourceManager};
use crate::{
    config::DatabaseConfig,
    error::LockFailure,
    types::{IsolationLevel, TableName, TargetId},
    Error, Result,
};

/// Opens one dedicated `MySqlConnection` per session.
#[derive(Debug, Clone)]
pub struct MySqlEngine {
    options: MySqlConnectOptions,
    lock_wait_timeout_secs: Option<u64>,
}

impl MySqlEngine {
    /// Build connect options from the configured endpoint and credentials.
    pub fn new(database: &DatabaseConfig, lock_wait_timeout_secs: Option<u64>) -> Result<Self> {
        let mut options: MySqlConnectOptions = database
            .url
            .parse()
            .map_err(|e| Error::InvalidConfig(format!("Invalid database url: {e}")))?;
        if !database.user.is_empty() {
            options = options.username(&database.user);
        }
        if !database.password.is_empty() {
            options = options.password(&database.password);
        }
        Ok(Self {
            options,
            lock_wait_timeout_secs,
        })
    }
}

#[async_trait]
impl ResourceManager for MySqlEngine {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn open(&self, isolation: IsolationLevel) -> Result<Box<dyn ResourceHandle>> {
        let mut conn = self
            .options
            .connect()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        conn.execute(format!("SET SESSION TRANSACTION ISOLATION LEVEL {isolation}").as_str())
            .await
            .map_err(|e| Error::Engine(format!("Failed to set isolation level: {e}")))?;

        if let Some(secs) = self.lock_wait_timeout_secs {
            conn.execute(format!("SET SESSION innodb_lock_wait_timeout = {secs}").as_str())
                .await
                .map_err(|e| Error::Engine(format!("Failed to set lock wait timeout: {e}")))?;
        }

        conn.execute("SET autocommit = 0")
            .await
            .map_err(|e| Error::Engine(format!("Failed to disable autocommit: {e}")))?;
        conn.execute("START TRANSACTION")
            .await
            .map_err(|e| Error::Engine(format!("Failed to start transaction: {e}")))?;

        Ok(Box::new(MySqlHandle { conn }))
    }
}

struct MySqlHandle {
    conn: MySqlConnection,
}

#[async_trait]
impl ResourceHandle for MySqlHandle {
    async fn select_for_update(
        &mut self,
        table: &TableName,
        target: TargetId,
    ) -> std::result::Result<Option<TargetId>, LockFailure> {
        let sql = format!("SELECT id FROM {table} WHERE id = ? FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(target.get())
            .fetch_optional(&mut self.conn)
            .await
            .map_err(to_lock_failure)?;
        Ok(row.map(|_| target))
    }

    async fn commit(&mut self) -> std::result::Result<(), LockFailure> {
        self.conn
            .execute("COMMIT")
            .await
            .map(|_| ())
            .map_err(to_lock_failure)
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn
            .execute("ROLLBACK")
            .await
            .map(|_| ())
            .map_err(|e| Error::Engine(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| Error::Engine(e.to_string()))
    }
}

/// Keep the engine's message and SQLSTATE; append the vendor error number
/// when there is one so the timeline shows e.g. `(1213)`.
fn to_lock_failure(err: sqlx::Error) -> LockFailure {
    match &err {
        sqlx::Error::Database(db_err) => {
            let number = db_err
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(MySqlDatabaseError::number);
            let message = number.map_or_else(
                || db_err.message().to_string(),
                |n| format!("{} ({n})", db_err.message()),
            );
            LockFailure::engine(message, db_err.code())
        }
        _ => LockFailure::engine(err.to_string(), None::<&str>),
    }
}
