//! Per-context routing state.
//!
//! A [`DataSourceContext`] is one logical call stack: it owns the current
//! target selection, the transactional and non-transactional slot tables,
//! and the state of the unit of work running on it. Contexts never share any
//! of this; spawn work with [`DataSourceContext::fork`] to give it its own.

use crate::db::handle::{HandleSettings, SharedHandle};
use crate::db::registry::{TargetRegistry, TargetResolver};
use crate::db::selector::{ContextSelector, SelectionScope};
use crate::db::slots::SlotTable;
use crate::db::tracking::{LastUsedCell, TrackingResolver};
use crate::error::DbResult;
use crate::models::{LastUsedTarget, TransactionDefinition, TransactionMetadata};
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct Tables {
    transactional: SlotTable,
    non_transactional: SlotTable,
}

/// State of the unit of work on one context.
#[derive(Debug, Default)]
pub(crate) struct UnitOfWork {
    pub active: bool,
    pub definition: Option<TransactionDefinition>,
    pub settings: HandleSettings,
    /// Survives cleanup until the next `begin`
    pub metadata: Option<TransactionMetadata>,
    pub rollback_only: bool,
}

pub struct DataSourceContext {
    registry: Arc<TargetRegistry>,
    resolver: Arc<dyn TargetResolver>,
    last_used: Option<LastUsedCell>,
    selector: ContextSelector,
    tables: Mutex<Tables>,
    unit: std::sync::Mutex<UnitOfWork>,
}

impl std::fmt::Debug for DataSourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceContext")
            .field("current", &self.selector.get_current())
            .field("tracking", &self.last_used.is_some())
            .field("unit", &*self.unit())
            .finish_non_exhaustive()
    }
}

impl DataSourceContext {
    pub fn new(registry: Arc<TargetRegistry>) -> Self {
        Self::build(registry, false, ContextSelector::new())
    }

    /// A context that records the last target each acquisition resolved.
    pub fn with_tracking(registry: Arc<TargetRegistry>) -> Self {
        Self::build(registry, true, ContextSelector::new())
    }

    fn build(registry: Arc<TargetRegistry>, tracking: bool, selector: ContextSelector) -> Self {
        let (resolver, last_used): (Arc<dyn TargetResolver>, _) = if tracking {
            let tracking = TrackingResolver::new(Arc::clone(&registry) as Arc<dyn TargetResolver>);
            let cell = tracking.last_used_cell();
            (Arc::new(tracking), Some(cell))
        } else {
            (Arc::clone(&registry) as Arc<dyn TargetResolver>, None)
        };
        Self {
            registry,
            resolver,
            last_used,
            selector,
            tables: Mutex::new(Tables::default()),
            unit: std::sync::Mutex::new(UnitOfWork::default()),
        }
    }

    /// A child context starting from a copy of this context's selection.
    ///
    /// The child has its own slot tables and no unit of work.
    pub fn fork(&self) -> Self {
        Self::build(
            Arc::clone(&self.registry),
            self.last_used.is_some(),
            self.selector.fork(),
        )
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &ContextSelector {
        &self.selector
    }

    pub fn set_current(&self, name: &str) -> DbResult<()> {
        self.selector.set_current(name)
    }

    pub fn get_current(&self) -> Option<String> {
        self.selector.get_current()
    }

    pub fn reset(&self) {
        self.selector.reset()
    }

    /// Select `name` until the returned scope is dropped.
    pub fn select(&self, name: &str) -> DbResult<SelectionScope<'_>> {
        SelectionScope::enter(&self.selector, name)
    }

    /// The selected target, or the registry default when nothing is selected.
    pub async fn current_target(&self) -> Option<String> {
        match self.selector.get_current() {
            Some(name) => Some(name),
            None => self.resolver.default_name().await,
        }
    }

    pub(crate) fn unit(&self) -> MutexGuard<'_, UnitOfWork> {
        self.unit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.unit().active
    }

    pub fn metadata(&self) -> Option<TransactionMetadata> {
        self.unit().metadata.clone()
    }

    pub fn definition(&self) -> Option<TransactionDefinition> {
        self.unit().definition.clone()
    }

    pub fn is_rollback_only(&self) -> bool {
        self.unit().rollback_only
    }

    /// Most recent resolution, when tracking is enabled.
    pub fn last_used(&self) -> Option<LastUsedTarget> {
        self.last_used.as_ref().and_then(LastUsedCell::get)
    }

    /// Connection for the current target.
    ///
    /// Inside a unit of work the handle comes from the transactional table and
    /// has the unit's settings applied on first use. Outside, it comes from the
    /// non-transactional table and should be handed back with [`release`](Self::release).
    pub async fn acquire(&self) -> DbResult<SharedHandle> {
        // The target name is read under the table lock so a concurrent switch
        // cannot redirect an acquisition already in progress.
        let mut tables = self.tables.lock().await;
        let requested = self.selector.get_current();
        let resolved = self
            .resolver
            .resolve_target(requested.as_deref().unwrap_or(""))
            .await?;

        let (active, settings, rollback_only) = {
            let unit = self.unit();
            (unit.active, unit.settings.clone(), unit.rollback_only)
        };

        if !active {
            let acquired = tables.non_transactional.acquire(&resolved).await?;
            debug!(target_name = %resolved.name, existed = acquired.existed, "Non-transactional acquire");
            return Ok(acquired.handle);
        }

        let acquired = tables.transactional.acquire(&resolved).await?;
        if acquired.is_fresh() {
            let mut handle = acquired.handle.lock().await;
            handle.apply_settings(&settings).await?;
            if rollback_only {
                handle.set_rollback_only();
            }
        }
        debug!(
            target_name = %resolved.name,
            existed = acquired.existed,
            replaced = acquired.replaced,
            "Transactional acquire"
        );
        Ok(acquired.handle)
    }

    /// Hand a non-transactional connection back to its pool.
    ///
    /// Handles owned by the unit of work are left alone; the coordinator
    /// releases them at cleanup.
    pub async fn release(&self, handle: &SharedHandle) -> DbResult<()> {
        let removed = self.tables.lock().await.non_transactional.remove(handle);
        if !removed {
            return Ok(());
        }
        let mut handle = handle.lock().await;
        debug!(target_name = %handle.target(), "Releasing non-transactional connection");
        handle.release().await
    }

    /// Targets touched by the current unit of work, in acquisition order.
    pub async fn transactional_targets(&self) -> Vec<String> {
        self.tables.lock().await.transactional.targets()
    }

    pub async fn non_transactional_targets(&self) -> Vec<String> {
        self.tables.lock().await.non_transactional.targets()
    }

    pub(crate) async fn transactional_handles(&self) -> Vec<SharedHandle> {
        self.tables.lock().await.transactional.handles()
    }

    pub(crate) async fn drain_transactional(&self) -> Vec<SharedHandle> {
        self.tables.lock().await.transactional.drain()
    }
}
