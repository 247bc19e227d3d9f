//! Operational inspection of the registry and of individual contexts.

use crate::db::{DataSourceContext, TargetRegistry};
use crate::error::{DbError, DbResult};
use crate::models::PooledTargetInfo;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registry-wide view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectionSnapshot {
    pub default_target: Option<String>,
    pub targets: BTreeSet<String>,
    pub pools: BTreeMap<String, PooledTargetInfo>,
}

/// View of a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInspection {
    pub name: String,
    pub is_default: bool,
    pub pool: PooledTargetInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub targets: usize,
    /// Targets whose pool is not running
    pub unhealthy: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Inspector {
    registry: Arc<TargetRegistry>,
}

impl Inspector {
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub async fn snapshot(&self) -> InspectionSnapshot {
        InspectionSnapshot {
            default_target: self.registry.default_name().await,
            targets: self.registry.all_names().await,
            pools: self.registry.pool_info().await,
        }
    }

    pub async fn default_target(&self) -> Option<String> {
        self.registry.default_name().await
    }

    pub async fn available_targets(&self) -> BTreeSet<String> {
        self.registry.all_names().await
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.registry.contains(name).await
    }

    /// Target a context would acquire from right now.
    pub async fn current_target(&self, ctx: &DataSourceContext) -> Option<String> {
        ctx.current_target().await
    }

    pub async fn target(&self, name: &str) -> DbResult<TargetInspection> {
        if name.trim().is_empty() {
            return Err(DbError::invalid_argument("Target name must not be blank"));
        }
        let pool = self.registry.resolve(name).await?;
        Ok(TargetInspection {
            name: name.to_string(),
            is_default: self.registry.default_name().await.as_deref() == Some(name),
            pool: pool.info(),
        })
    }

    pub async fn health(&self) -> HealthReport {
        let pools = self.registry.pool_info().await;
        let unhealthy: Vec<String> = pools
            .iter()
            .filter(|(_, info)| !info.running)
            .map(|(name, _)| name.clone())
            .collect();
        HealthReport {
            status: if unhealthy.is_empty() && !pools.is_empty() {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            targets: pools.len(),
            unhealthy,
        }
    }
}
