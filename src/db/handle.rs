//! Connection handle: one physical connection plus the bookkeeping the
//! coordinator needs to apply settings once and undo them at cleanup.

use crate::db::connection::PhysicalConnection;
use crate::error::{DbError, DbResult};
use crate::models::IsolationLevel;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handle shared between a slot table and its callers.
pub type SharedHandle = Arc<Mutex<ConnectionHandle>>;

/// Settings a unit of work applies to each connection it touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleSettings {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    /// Also issue the read-only transaction directive when `read_only` is set
    pub enforce_read_only: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct ConnectionHandle {
    target: String,
    connection: Box<dyn PhysicalConnection>,
    settings_applied: bool,
    previous_isolation: Option<IsolationLevel>,
    /// Set when this handle changed the session read-only flag
    previous_read_only: Option<bool>,
    must_restore_auto_commit: bool,
    rollback_only: bool,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    acquire_latency: Duration,
}

impl ConnectionHandle {
    pub fn new(
        target: impl Into<String>,
        connection: Box<dyn PhysicalConnection>,
        acquire_latency: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            connection,
            settings_applied: false,
            previous_isolation: None,
            previous_read_only: None,
            must_restore_auto_commit: false,
            rollback_only: false,
            timeout: None,
            deadline: None,
            acquire_latency,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn connection(&self) -> &dyn PhysicalConnection {
        self.connection.as_ref()
    }

    pub fn connection_mut(&mut self) -> &mut dyn PhysicalConnection {
        self.connection.as_mut()
    }

    pub fn is_settings_applied(&self) -> bool {
        self.settings_applied
    }

    pub fn mark_settings_applied(&mut self) {
        self.settings_applied = true;
    }

    pub fn previous_isolation(&self) -> Option<IsolationLevel> {
        self.previous_isolation
    }

    pub fn must_restore_auto_commit(&self) -> bool {
        self.must_restore_auto_commit
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    pub fn acquire_latency(&self) -> Duration {
        self.acquire_latency
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Attach a timeout; the deadline starts now.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
        self.deadline = Some(Instant::now() + timeout);
    }

    /// Time left before the deadline, `None` when no timeout is attached.
    pub fn remaining_timeout(&self) -> DbResult<Option<Duration>> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        let now = Instant::now();
        if now >= deadline {
            return Err(self.timeout_error());
        }
        Ok(Some(deadline - now))
    }

    fn timeout_error(&self) -> DbError {
        let ms = self.timeout.map_or(0, |t| t.as_millis() as u64);
        DbError::timeout_expired(self.target.clone(), ms)
    }

    /// Run a statement bounded by the remaining timeout.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        match self.remaining_timeout()? {
            None => self.connection.execute(sql).await,
            Some(remaining) => {
                let result = tokio::time::timeout(remaining, self.connection.execute(sql)).await;
                result.unwrap_or_else(|_| Err(self.timeout_error()))
            }
        }
    }

    /// Fetch a scalar bounded by the remaining timeout.
    pub async fn fetch_scalar(&mut self, sql: &str) -> DbResult<Option<i64>> {
        match self.remaining_timeout()? {
            None => self.connection.fetch_scalar(sql).await,
            Some(remaining) => {
                let result =
                    tokio::time::timeout(remaining, self.connection.fetch_scalar(sql)).await;
                result.unwrap_or_else(|_| Err(self.timeout_error()))
            }
        }
    }

    /// Apply unit-of-work settings once. Later calls are no-ops.
    pub async fn apply_settings(&mut self, settings: &HandleSettings) -> DbResult<()> {
        if self.settings_applied {
            return Ok(());
        }

        let conn = self.connection.as_mut();
        if settings.read_only && !conn.is_read_only() {
            conn.set_read_only(true).await?;
            self.previous_read_only = Some(false);
        }

        if let Some(level) = settings.isolation {
            let current = conn.isolation_level().await?;
            if current != level {
                conn.set_isolation_level(level).await?;
                self.previous_isolation = Some(current);
            }
        }

        if conn.is_auto_commit() {
            conn.set_auto_commit(false).await?;
            self.must_restore_auto_commit = true;
        }

        if settings.enforce_read_only && settings.read_only {
            conn.enforce_read_only().await?;
        }

        if let Some(timeout) = settings.timeout {
            self.set_timeout(timeout);
        }

        debug!(
            target_name = %self.target,
            isolation = ?settings.isolation,
            read_only = settings.read_only,
            timeout_ms = ?settings.timeout.map(|t| t.as_millis()),
            "Applied transaction settings"
        );
        self.settings_applied = true;
        Ok(())
    }

    /// Undo what `apply_settings` changed. Failures are logged, never raised.
    pub async fn reset_settings(&mut self) {
        let target = self.target.clone();
        let conn = self.connection.as_mut();

        // Restoring autocommit would commit whatever is still open.
        if conn.in_transaction() {
            if let Err(e) = conn.rollback().await {
                debug!(target_name = %target, error = %e, "Could not roll back leftover transaction");
            }
        }

        if self.must_restore_auto_commit {
            if conn.in_transaction() {
                debug!(target_name = %target, "Transaction still open, leaving autocommit off");
            } else if let Err(e) = conn.set_auto_commit(true).await {
                debug!(target_name = %target, error = %e, "Could not restore autocommit");
            }
            self.must_restore_auto_commit = false;
        }

        if let Some(level) = self.previous_isolation.take() {
            if let Err(e) = conn.set_isolation_level(level).await {
                debug!(target_name = %target, error = %e, "Could not restore isolation level");
            }
        }

        if let Some(read_only) = self.previous_read_only.take() {
            if let Err(e) = conn.set_read_only(read_only).await {
                debug!(target_name = %target, error = %e, "Could not reset read-only flag");
            }
        }

        self.settings_applied = false;
        self.rollback_only = false;
        self.timeout = None;
        self.deadline = None;
    }

    /// Hand the connection back to its pool.
    pub async fn release(&mut self) -> DbResult<()> {
        self.connection.release().await.inspect_err(|e| {
            warn!(target_name = %self.target, error = %e, "Failed to release connection");
        })
    }
}
