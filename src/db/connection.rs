//! Physical connection capability and its sqlx adapter.
//!
//! The coordinator drives connections through [`PhysicalConnection`], which
//! exposes the JDBC-like surface it needs: autocommit, isolation, read-only,
//! commit and rollback. [`DbConnection`] implements it over a pooled sqlx
//! connection by issuing transaction control statements itself.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, IsolationLevel};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, Postgres, Sqlite};
use tracing::{debug, warn};

/// One physical connection checked out of a target's pool.
#[async_trait]
pub trait PhysicalConnection: Send + std::fmt::Debug {
    /// Liveness probe. A released or unreachable connection reports closed.
    async fn is_closed(&mut self) -> bool;

    fn is_auto_commit(&self) -> bool;

    /// Turning autocommit back on commits an open transaction.
    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()>;

    async fn isolation_level(&mut self) -> DbResult<IsolationLevel>;

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> DbResult<()>;

    fn is_read_only(&self) -> bool;

    async fn set_read_only(&mut self, read_only: bool) -> DbResult<()>;

    /// Make the next transaction on this connection read-only.
    async fn enforce_read_only(&mut self) -> DbResult<()>;

    /// Run a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str) -> DbResult<u64>;

    /// Run a query and decode the first column of the first row, if any.
    async fn fetch_scalar(&mut self, sql: &str) -> DbResult<Option<i64>>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Whether a transaction begun through this connection is still open.
    fn in_transaction(&self) -> bool {
        false
    }

    /// Return the connection to its pool. Any open transaction is rolled back;
    /// when that fails the connection is closed instead of pooled.
    async fn release(&mut self) -> DbResult<()>;

    /// Close the connection outright instead of pooling it. Errors are swallowed.
    async fn discard(&mut self);
}

/// Backend-specific pooled connection.
pub enum PooledConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl PooledConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            PooledConnection::MySql(_) => DatabaseType::MySQL,
            PooledConnection::Postgres(_) => DatabaseType::PostgreSQL,
            PooledConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// [`PhysicalConnection`] over a pooled sqlx connection.
///
/// sqlx connections run in autocommit mode. With autocommit off this adapter
/// opens a transaction lazily before the first statement and keeps it open
/// until `commit` or `rollback`.
pub struct DbConnection {
    inner: Option<PooledConnection>,
    db_type: DatabaseType,
    auto_commit: bool,
    read_only: bool,
    read_only_transaction: bool,
    in_transaction: bool,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("db_type", &self.db_type)
            .field("released", &self.inner.is_none())
            .field("auto_commit", &self.auto_commit)
            .field("read_only", &self.read_only)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl DbConnection {
    pub fn new(inner: PooledConnection) -> Self {
        Self {
            db_type: inner.db_type(),
            inner: Some(inner),
            auto_commit: true,
            read_only: false,
            read_only_transaction: false,
            in_transaction: false,
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    fn conn(&mut self) -> DbResult<&mut PooledConnection> {
        self.inner.as_mut().ok_or_else(|| {
            DbError::connection(
                "Connection already released",
                "Acquire a new connection through the context",
            )
        })
    }

    async fn run(&mut self, sql: &str) -> DbResult<u64> {
        debug!(db_type = %self.db_type, sql = %sql, "Executing statement");
        let conn = self.conn()?;
        let result = crate::impl_db_dispatch!(PooledConnection, conn, |c| {
            sqlx::Executor::execute(&mut **c, sql)
                .await
                .map(|r| r.rows_affected())
        });
        result.map_err(DbError::from)
    }

    async fn begin_if_needed(&mut self) -> DbResult<()> {
        if self.auto_commit || self.in_transaction {
            return Ok(());
        }

        let read_only = self.read_only_transaction;
        match self.db_type {
            DatabaseType::PostgreSQL => {
                self.run(if read_only { "BEGIN READ ONLY" } else { "BEGIN" })
                    .await?;
            }
            DatabaseType::MySQL => {
                self.run(if read_only {
                    "START TRANSACTION READ ONLY"
                } else {
                    "START TRANSACTION"
                })
                .await?;
            }
            DatabaseType::SQLite => {
                if read_only {
                    self.run("PRAGMA query_only = ON").await?;
                }
                self.run("BEGIN").await?;
            }
        }
        self.in_transaction = true;
        Ok(())
    }

    async fn finish(&mut self, statement: &str) -> DbResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        // A failed COMMIT or ROLLBACK may leave the server transaction open.
        self.run(statement).await?;
        self.in_transaction = false;

        if self.read_only_transaction {
            self.read_only_transaction = false;
            if self.db_type == DatabaseType::SQLite && !self.read_only {
                self.run("PRAGMA query_only = OFF").await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PhysicalConnection for DbConnection {
    async fn is_closed(&mut self) -> bool {
        let Some(conn) = self.inner.as_mut() else {
            return true;
        };
        crate::impl_db_dispatch!(PooledConnection, conn, |c| c.ping().await.is_err())
    }

    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        if auto_commit && !self.auto_commit {
            self.finish("COMMIT").await?;
            self.read_only_transaction = false;
        }
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn isolation_level(&mut self) -> DbResult<IsolationLevel> {
        let conn = self.conn()?;
        let level = match conn {
            PooledConnection::Postgres(c) => {
                sqlx::query_scalar::<_, String>("SHOW transaction_isolation")
                    .fetch_one(&mut **c)
                    .await?
            }
            PooledConnection::MySql(c) => {
                sqlx::query_scalar::<_, String>("SELECT CAST(@@transaction_isolation AS CHAR)")
                    .fetch_one(&mut **c)
                    .await?
            }
            PooledConnection::SQLite(c) => {
                let uncommitted = sqlx::query_scalar::<_, i64>("PRAGMA read_uncommitted")
                    .fetch_one(&mut **c)
                    .await?;
                return Ok(if uncommitted == 1 {
                    IsolationLevel::ReadUncommitted
                } else {
                    IsolationLevel::Serializable
                });
            }
        };
        level.parse().map_err(DbError::internal)
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> DbResult<()> {
        let sql = match self.db_type {
            DatabaseType::PostgreSQL => format!(
                "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
                level.to_sql()
            ),
            DatabaseType::MySQL => {
                format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", level.to_sql())
            }
            DatabaseType::SQLite => format!(
                "PRAGMA read_uncommitted = {}",
                u8::from(level == IsolationLevel::ReadUncommitted)
            ),
        };
        self.run(&sql).await.map(|_| ())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn set_read_only(&mut self, read_only: bool) -> DbResult<()> {
        let sql = match (self.db_type, read_only) {
            (DatabaseType::PostgreSQL, true) => "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY",
            (DatabaseType::PostgreSQL, false) => "SET SESSION CHARACTERISTICS AS TRANSACTION READ WRITE",
            (DatabaseType::MySQL, true) => "SET SESSION TRANSACTION READ ONLY",
            (DatabaseType::MySQL, false) => "SET SESSION TRANSACTION READ WRITE",
            (DatabaseType::SQLite, true) => "PRAGMA query_only = ON",
            (DatabaseType::SQLite, false) => "PRAGMA query_only = OFF",
        };
        self.run(sql).await?;
        self.read_only = read_only;
        Ok(())
    }

    async fn enforce_read_only(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::illegal_state(
                "Cannot make a transaction read-only after it has started",
            ));
        }
        self.read_only_transaction = true;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.begin_if_needed().await?;
        self.run(sql).await
    }

    async fn fetch_scalar(&mut self, sql: &str) -> DbResult<Option<i64>> {
        self.begin_if_needed().await?;
        debug!(db_type = %self.db_type, sql = %sql, "Fetching scalar");
        let conn = self.conn()?;
        let result = crate::impl_db_dispatch!(PooledConnection, conn, |c| {
            sqlx::query_scalar::<_, i64>(sql)
                .fetch_optional(&mut **c)
                .await
        });
        result.map_err(DbError::from)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.finish("ROLLBACK").await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn release(&mut self) -> DbResult<()> {
        if let Err(e) = self.finish("ROLLBACK").await {
            warn!(db_type = %self.db_type, error = %e, "Rollback before release failed, closing connection");
            self.discard().await;
            return Err(e);
        }
        // Dropping a pool connection hands it back to the pool.
        self.inner = None;
        Ok(())
    }

    async fn discard(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        self.in_transaction = false;
        let result = crate::impl_db_dispatch!(PooledConnection, inner, |c| c.detach().close().await);
        if let Err(e) = result {
            debug!(db_type = %self.db_type, error = %e, "Discarded connection did not close cleanly");
        }
    }
}
