//! Mapper-facing transaction over the current target.
//!
//! A mapper session holds one [`SwitchableTransaction`] and asks it for a
//! connection before each statement. Inside a unit of work it defers commit,
//! rollback and close to the coordinator; outside one it manages the
//! connection itself.

use crate::db::context::DataSourceContext;
use crate::db::handle::SharedHandle;
use crate::error::{DbError, DbResult};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct SwitchableTransaction {
    context: Arc<DataSourceContext>,
    current: Option<SharedHandle>,
}

impl SwitchableTransaction {
    pub fn new(context: Arc<DataSourceContext>) -> Self {
        Self {
            context,
            current: None,
        }
    }

    pub fn context(&self) -> &Arc<DataSourceContext> {
        &self.context
    }

    /// Connection for the context's current target.
    pub async fn connection(&mut self) -> DbResult<SharedHandle> {
        let handle = self.context.acquire().await?;
        self.current = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Commit the last acquired connection when this transaction owns it.
    pub async fn commit(&mut self) -> DbResult<()> {
        let Some(handle) = self.completable().await else {
            return Ok(());
        };
        let mut handle = handle.lock().await;
        let target = handle.target().to_string();
        handle
            .connection_mut()
            .commit()
            .await
            .map_err(|e| wrap(&target, "Commit", e))
    }

    /// Roll back the last acquired connection when this transaction owns it.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let Some(handle) = self.completable().await else {
            return Ok(());
        };
        let mut handle = handle.lock().await;
        let target = handle.target().to_string();
        handle
            .connection_mut()
            .rollback()
            .await
            .map_err(|e| wrap(&target, "Rollback", e))
    }

    /// Release the connection outside a unit of work; inside one, do nothing.
    pub async fn close(&mut self) -> DbResult<()> {
        if self.context.is_active() {
            return Ok(());
        }
        match self.current.take() {
            Some(handle) => self.context.release(&handle).await,
            None => Ok(()),
        }
    }

    /// Remaining timeout of the last acquired connection.
    pub async fn timeout(&self) -> DbResult<Option<Duration>> {
        match &self.current {
            Some(handle) => handle.lock().await.remaining_timeout(),
            None => Ok(None),
        }
    }

    /// The current handle, if commit and rollback belong to this transaction:
    /// no unit of work is active and autocommit is off.
    async fn completable(&self) -> Option<SharedHandle> {
        let handle = self.current.as_ref()?;
        if self.context.is_active() {
            return None;
        }
        let auto_commit = handle.lock().await.connection().is_auto_commit();
        (!auto_commit).then(|| Arc::clone(handle))
    }
}

fn wrap(target: &str, operation: &str, source: DbError) -> DbError {
    DbError::transaction_system(format!("{} failed on target '{}'", operation, target), 1, source)
}
