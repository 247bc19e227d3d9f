//! Transaction coordinator.
//!
//! Drives one unit of work over every target a context touched:
//!
//! ```text
//! NO_TRANSACTION -> BEGUN -> COMMITTING | ROLLING_BACK -> CLEANED_UP -> NO_TRANSACTION
//! ```
//!
//! Each target gets its own commit or rollback, in acquisition order. There
//! is no two-phase commit: when a later target fails to commit, earlier
//! targets stay committed and the rest are rolled back.

use crate::db::context::DataSourceContext;
use crate::db::handle::HandleSettings;
use crate::error::{DbError, DbResult};
use crate::models::{Propagation, TransactionDefinition, TransactionMetadata};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What `begin` produced for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionStatus {
    transaction_id: Option<String>,
    new_transaction: bool,
}

impl TransactionStatus {
    fn new_unit(transaction_id: String) -> Self {
        Self {
            transaction_id: Some(transaction_id),
            new_transaction: true,
        }
    }

    fn participating(transaction_id: Option<String>) -> Self {
        Self {
            transaction_id,
            new_transaction: false,
        }
    }

    fn empty() -> Self {
        Self {
            transaction_id: None,
            new_transaction: false,
        }
    }

    /// This status started the unit of work and owns its completion.
    pub fn is_new_transaction(&self) -> bool {
        self.new_transaction
    }

    /// Whether any unit of work backs this status.
    pub fn has_transaction(&self) -> bool {
        self.transaction_id.is_some()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }
}

/// Requested way to finish a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

/// How a unit of work actually finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Committed,
    /// Rolled back, either on request or because it was marked rollback-only
    RolledBack,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionCoordinator {
    enforce_read_only: bool,
    default_timeout: Option<Duration>,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the read-only transaction directive for read-only units of work.
    pub fn with_enforce_read_only(mut self, enforce: bool) -> Self {
        self.enforce_read_only = enforce;
        self
    }

    /// Timeout for units of work whose definition sets none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn enforce_read_only(&self) -> bool {
        self.enforce_read_only
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Start or join a unit of work according to `definition.propagation`.
    ///
    /// No connection is acquired here; settings are applied when each target
    /// is first acquired.
    pub fn begin(
        &self,
        ctx: &DataSourceContext,
        definition: &TransactionDefinition,
    ) -> DbResult<TransactionStatus> {
        let active = ctx.is_active();
        match (active, definition.propagation) {
            (false, Propagation::Required | Propagation::RequiresNew | Propagation::Nested) => {
                Ok(self.start(ctx, definition))
            }
            (false, Propagation::Supports | Propagation::NotSupported | Propagation::Never) => {
                debug!(propagation = ?definition.propagation, "No unit of work required");
                Ok(TransactionStatus::empty())
            }
            (false, Propagation::Mandatory) => Err(DbError::illegal_state(
                "No existing unit of work found for propagation 'mandatory'",
            )),
            (true, Propagation::Required | Propagation::Supports | Propagation::Mandatory) => {
                let id = ctx.metadata().map(|m| m.transaction_id);
                debug!(transaction_id = ?id, "Participating in existing unit of work");
                Ok(TransactionStatus::participating(id))
            }
            (true, Propagation::RequiresNew | Propagation::NotSupported) => {
                Err(suspend_unsupported())
            }
            (true, Propagation::Nested) => Err(DbError::unsupported(
                "nested units of work (savepoints) are not supported across switchable targets",
            )),
            (true, Propagation::Never) => Err(DbError::illegal_state(
                "Existing unit of work found for propagation 'never'",
            )),
        }
    }

    fn start(&self, ctx: &DataSourceContext, definition: &TransactionDefinition) -> TransactionStatus {
        let metadata = TransactionMetadata::start();
        let transaction_id = metadata.transaction_id.clone();
        {
            let mut unit = ctx.unit();
            unit.active = true;
            unit.rollback_only = false;
            unit.settings = HandleSettings {
                isolation: definition.isolation,
                read_only: definition.read_only,
                enforce_read_only: self.enforce_read_only,
                timeout: definition.timeout.or(self.default_timeout),
            };
            unit.definition = Some(definition.clone());
            unit.metadata = Some(metadata);
        }
        info!(
            transaction_id = %transaction_id,
            name = ?definition.name,
            isolation = ?definition.isolation,
            read_only = definition.read_only,
            "Began unit of work"
        );
        TransactionStatus::new_unit(transaction_id)
    }

    pub fn is_active(&self, ctx: &DataSourceContext) -> bool {
        ctx.is_active()
    }

    /// Commit every target in acquisition order.
    ///
    /// A unit marked rollback-only is rolled back instead. On the first commit
    /// failure the whole set is rolled back and the failure is returned.
    pub async fn commit(&self, ctx: &DataSourceContext) -> DbResult<Completion> {
        let transaction_id = self.require_active(ctx, "commit")?;
        let handles = ctx.transactional_handles().await;

        let mut rollback_only = ctx.is_rollback_only();
        for handle in &handles {
            rollback_only |= handle.lock().await.is_rollback_only();
        }
        if rollback_only {
            debug!(transaction_id = %transaction_id, "Unit of work is rollback-only, rolling back");
            self.rollback(ctx).await?;
            return Ok(Completion::RolledBack);
        }

        let settings = ctx.unit().settings.clone();
        for handle in &handles {
            let mut handle = handle.lock().await;
            let target = handle.target().to_string();
            if handle.connection_mut().is_closed().await {
                warn!(transaction_id = %transaction_id, target_name = %target, "Connection is closed, skipping commit");
                continue;
            }

            let result = match handle.apply_settings(&settings).await {
                Ok(()) => handle.connection_mut().commit().await,
                Err(e) => Err(e),
            };
            drop(handle);

            if let Err(e) = result {
                error!(
                    transaction_id = %transaction_id,
                    target_name = %target,
                    error = %e,
                    "Commit failed, rolling back every target"
                );
                let failures = match self.rollback(ctx).await {
                    Ok(()) => 1,
                    Err(rollback_error) => 1 + rollback_error.failure_count(),
                };
                return Err(DbError::transaction_system(
                    format!("Commit failed on target '{}'", target),
                    failures,
                    e,
                ));
            }
            debug!(transaction_id = %transaction_id, target_name = %target, "Committed target");
        }

        stamp_end(ctx);
        info!(transaction_id = %transaction_id, targets = handles.len(), "Committed unit of work");
        Ok(Completion::Committed)
    }

    /// Roll back every live target, collecting failures instead of stopping.
    pub async fn rollback(&self, ctx: &DataSourceContext) -> DbResult<()> {
        let transaction_id = self.require_active(ctx, "rollback")?;
        let handles = ctx.transactional_handles().await;

        let mut failures = Vec::new();
        for handle in &handles {
            let mut handle = handle.lock().await;
            if handle.connection_mut().is_closed().await {
                warn!(transaction_id = %transaction_id, target_name = %handle.target(), "Connection is closed, skipping rollback");
                continue;
            }
            match handle.connection_mut().rollback().await {
                Ok(()) => {
                    debug!(transaction_id = %transaction_id, target_name = %handle.target(), "Rolled back target")
                }
                Err(e) => {
                    warn!(transaction_id = %transaction_id, target_name = %handle.target(), error = %e, "Rollback failed");
                    failures.push(e);
                }
            }
        }

        stamp_end(ctx);
        let count = failures.len();
        match failures.into_iter().next() {
            None => {
                info!(transaction_id = %transaction_id, targets = handles.len(), "Rolled back unit of work");
                Ok(())
            }
            Some(first) => Err(DbError::transaction_system(
                "One or more errors occurred while rolling back",
                count,
                first,
            )),
        }
    }

    /// Mark the unit so the next `commit` rolls back instead. No I/O.
    pub async fn set_rollback_only(&self, ctx: &DataSourceContext) {
        ctx.unit().rollback_only = true;
        for handle in ctx.transactional_handles().await {
            handle.lock().await.set_rollback_only();
        }
        debug!(transaction_id = ?ctx.metadata().map(|m| m.transaction_id), "Marked rollback-only");
    }

    /// Restore every connection, release it, and end the unit of work.
    ///
    /// Restoration failures are logged and suppressed. Metadata is kept.
    pub async fn cleanup(&self, ctx: &DataSourceContext) {
        let handles = ctx.drain_transactional().await;
        for handle in &handles {
            let mut handle = handle.lock().await;
            handle.reset_settings().await;
            // Failures are logged by the handle.
            let _ = handle.release().await;
        }

        {
            let mut unit = ctx.unit();
            unit.active = false;
            unit.rollback_only = false;
            unit.definition = None;
            unit.settings = HandleSettings::default();
        }
        debug!(
            transaction_id = ?ctx.metadata().map(|m| m.transaction_id),
            released = handles.len(),
            "Cleaned up unit of work"
        );
    }

    /// Finish what `begin` started, always cleaning up a new unit of work.
    ///
    /// A participating status only marks the unit rollback-only on a rollback
    /// outcome; an empty status does nothing.
    pub async fn complete(
        &self,
        ctx: &DataSourceContext,
        status: &TransactionStatus,
        outcome: Outcome,
    ) -> DbResult<Completion> {
        let requested = match outcome {
            Outcome::Commit => Completion::Committed,
            Outcome::Rollback => Completion::RolledBack,
        };

        if !status.has_transaction() {
            return Ok(requested);
        }

        let current = ctx.metadata().map(|m| m.transaction_id);
        if current.as_deref() != status.transaction_id() || !ctx.is_active() {
            return Err(DbError::illegal_state(format!(
                "Status for unit of work {:?} does not match the active one on this context",
                status.transaction_id()
            )));
        }

        if !status.is_new_transaction() {
            if outcome == Outcome::Rollback {
                self.set_rollback_only(ctx).await;
            }
            return Ok(requested);
        }

        let result = match outcome {
            Outcome::Commit => self.commit(ctx).await,
            Outcome::Rollback => self.rollback(ctx).await.map(|()| Completion::RolledBack),
        };
        self.cleanup(ctx).await;
        result
    }

    /// Always fails: connections of a unit of work cannot be set aside.
    pub fn suspend(&self, _ctx: &DataSourceContext) -> DbResult<()> {
        Err(suspend_unsupported())
    }

    /// Always fails, see [`suspend`](Self::suspend).
    pub fn resume(&self, _ctx: &DataSourceContext) -> DbResult<()> {
        Err(DbError::unsupported(
            "resume: switchable units of work cannot be resumed",
        ))
    }

    fn require_active(&self, ctx: &DataSourceContext, operation: &str) -> DbResult<String> {
        let unit = ctx.unit();
        match (&unit.metadata, unit.active) {
            (Some(metadata), true) => Ok(metadata.transaction_id.clone()),
            _ => Err(DbError::illegal_state(format!(
                "Cannot {}: no active unit of work on this context",
                operation
            ))),
        }
    }
}

fn stamp_end(ctx: &DataSourceContext) {
    if let Some(metadata) = ctx.unit().metadata.as_mut() {
        metadata.ended_at = Some(chrono::Utc::now());
    }
}

fn suspend_unsupported() -> DbError {
    DbError::unsupported("suspend: switchable units of work cannot be suspended")
}
