//! Last-used target tracking.
//!
//! [`TrackingResolver`] wraps another resolver and records every successful
//! resolution, so a context can report which target it touched last.

use crate::db::registry::{ResolvedTarget, TargetResolver};
use crate::error::DbResult;
use crate::models::LastUsedTarget;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Shared cell holding the most recent resolution.
#[derive(Debug, Clone, Default)]
pub struct LastUsedCell(Arc<Mutex<Option<LastUsedTarget>>>);

impl LastUsedCell {
    pub fn get(&self) -> Option<LastUsedTarget> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, value: LastUsedTarget) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }
}

pub struct TrackingResolver {
    inner: Arc<dyn TargetResolver>,
    last_used: LastUsedCell,
}

impl TrackingResolver {
    pub fn new(inner: Arc<dyn TargetResolver>) -> Self {
        Self {
            inner,
            last_used: LastUsedCell::default(),
        }
    }

    pub fn last_used_cell(&self) -> LastUsedCell {
        self.last_used.clone()
    }
}

#[async_trait]
impl TargetResolver for TrackingResolver {
    async fn resolve_target(&self, name: &str) -> DbResult<ResolvedTarget> {
        let resolved = self.inner.resolve_target(name).await?;
        trace!(target_name = %resolved.name, kind = resolved.pool.kind(), "Tracking resolution");
        self.last_used.set(LastUsedTarget {
            target: resolved.name.clone(),
            pool_kind: resolved.pool.kind().to_string(),
            resolved_at: chrono::Utc::now(),
        });
        Ok(resolved)
    }

    async fn default_name(&self) -> Option<String> {
        self.inner.default_name().await
    }
}
