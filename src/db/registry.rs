//! Target registry.
//!
//! Maps logical target names to built pools and designates one default.
//! Registration happens at startup; resolution is read-mostly and safe to
//! call concurrently from any context.

use crate::db::pool::{TargetPool, create_pool};
use crate::error::{DbError, DbResult};
use crate::models::{PooledTargetInfo, TargetConfig};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A name resolved to its canonical target and pool.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub name: String,
    pub pool: Arc<dyn TargetPool>,
}

/// Name resolution used by the slot tables.
///
/// A blank name stands for the default target.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve_target(&self, name: &str) -> DbResult<ResolvedTarget>;

    async fn default_name(&self) -> Option<String>;
}

#[derive(Debug, Default)]
struct RegistryInner {
    pools: HashMap<String, Arc<dyn TargetPool>>,
    default_target: Option<String>,
}

/// Named pools plus one default.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    inner: RwLock<RegistryInner>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build pools for every active target and register them.
    ///
    /// The first target flagged default wins; when none is flagged the first
    /// active target becomes the default.
    pub async fn from_configs(configs: &[TargetConfig]) -> DbResult<Self> {
        let registry = Self::new();
        let flagged = configs.iter().any(|c| c.active && c.is_default);

        let mut first_active = true;
        for config in configs {
            if !config.active {
                info!(target_name = %config.name, "Target is inactive, skipping");
                continue;
            }
            let pool = match create_pool(config).await {
                Ok(pool) => pool,
                Err(e) => {
                    // Pools opened so far must not leak.
                    let _ = registry.close().await;
                    return Err(e);
                }
            };
            let is_default = if flagged { config.is_default } else { first_active };
            first_active = false;
            registry
                .register(config.name.clone(), Arc::new(pool), is_default)
                .await?;
        }

        if registry.default_name().await.is_none() {
            return Err(DbError::configuration(
                "No active targets configured. Provide at least one --target.",
            ));
        }
        Ok(registry)
    }

    /// Register a pool under `name`.
    pub async fn register(
        &self,
        name: impl Into<String>,
        pool: Arc<dyn TargetPool>,
        is_default: bool,
    ) -> DbResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DbError::invalid_argument("Target name must not be blank"));
        }

        let mut inner = self.inner.write().await;
        if inner.pools.contains_key(&name) {
            return Err(DbError::invalid_argument(format!(
                "Target '{}' is already registered",
                name
            )));
        }

        if is_default {
            match &inner.default_target {
                Some(existing) => warn!(
                    target_name = %name,
                    default_target = %existing,
                    "Default target already set, ignoring additional default flag"
                ),
                None => inner.default_target = Some(name.clone()),
            }
        }

        info!(
            target_name = %name,
            kind = pool.kind(),
            is_default = inner.default_target.as_deref() == Some(name.as_str()),
            "Registered target"
        );
        inner.pools.insert(name, pool);
        Ok(())
    }

    /// Resolve a name to its pool. A blank name resolves the default target.
    pub async fn resolve(&self, name: &str) -> DbResult<Arc<dyn TargetPool>> {
        self.lookup(name).await.map(|resolved| resolved.pool)
    }

    async fn lookup(&self, name: &str) -> DbResult<ResolvedTarget> {
        let inner = self.inner.read().await;
        let key = if name.trim().is_empty() {
            match &inner.default_target {
                Some(default) => default.as_str(),
                None => {
                    return Err(DbError::target_not_found(
                        "<default>",
                        inner.pools.keys().cloned(),
                    ));
                }
            }
        } else {
            name
        };

        match inner.pools.get(key) {
            Some(pool) => Ok(ResolvedTarget {
                name: key.to_string(),
                pool: Arc::clone(pool),
            }),
            None => Err(DbError::target_not_found(key, inner.pools.keys().cloned())),
        }
    }

    pub async fn all_names(&self) -> BTreeSet<String> {
        self.inner.read().await.pools.keys().cloned().collect()
    }

    pub async fn default_name(&self) -> Option<String> {
        self.inner.read().await.default_target.clone()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.pools.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.pools.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.pools.is_empty()
    }

    /// Pool health for every target, keyed by name.
    pub async fn pool_info(&self) -> BTreeMap<String, PooledTargetInfo> {
        self.inner
            .read()
            .await
            .pools
            .iter()
            .map(|(name, pool)| (name.clone(), pool.info()))
            .collect()
    }

    /// Close every pool. Keeps going after failures and reports the first one
    /// together with the failure count.
    pub async fn close(&self) -> DbResult<()> {
        let pools: Vec<(String, Arc<dyn TargetPool>)> = {
            let inner = self.inner.read().await;
            inner
                .pools
                .iter()
                .map(|(name, pool)| (name.clone(), Arc::clone(pool)))
                .collect()
        };

        let mut failures = Vec::new();
        for (name, pool) in pools {
            info!(target_name = %name, "Closing target pool");
            if let Err(e) = pool.close().await {
                warn!(target_name = %name, error = %e, "Failed to close target pool");
                failures.push(e);
            }
        }

        let count = failures.len();
        match failures.into_iter().next() {
            None => {
                info!("All target pools closed");
                Ok(())
            }
            Some(first) => Err(DbError::pool_close(count, first)),
        }
    }
}

#[async_trait]
impl TargetResolver for TargetRegistry {
    async fn resolve_target(&self, name: &str) -> DbResult<ResolvedTarget> {
        self.lookup(name).await
    }

    async fn default_name(&self) -> Option<String> {
        TargetRegistry::default_name(self).await
    }
}
