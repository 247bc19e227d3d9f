//! Connection slot table.
//!
//! An ordered `(target -> handle)` list for one context. Repeated
//! acquisitions against the same target merge into one handle; a handle whose
//! connection died is replaced in place so acquisition order is preserved.

use crate::db::handle::{ConnectionHandle, SharedHandle};
use crate::db::registry::ResolvedTarget;
use crate::error::DbResult;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug)]
struct Slot {
    target: String,
    handle: SharedHandle,
}

/// Result of a lookup-or-create.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub handle: SharedHandle,
    /// The table already had a slot for this target
    pub existed: bool,
    /// The slot's dead connection was swapped for a fresh one
    pub replaced: bool,
}

impl Acquired {
    /// Whether the handle has not been prepared by anyone yet.
    pub fn is_fresh(&self) -> bool {
        !self.existed || self.replaced
    }
}

#[derive(Debug, Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live handle for `resolved`, creating or replacing it as needed.
    pub async fn acquire(&mut self, resolved: &ResolvedTarget) -> DbResult<Acquired> {
        let Some(index) = self.slots.iter().position(|s| s.target == resolved.name) else {
            let handle = open(resolved).await?;
            self.slots.push(Slot {
                target: resolved.name.clone(),
                handle: Arc::clone(&handle),
            });
            return Ok(Acquired {
                handle,
                existed: false,
                replaced: false,
            });
        };

        let existing = Arc::clone(&self.slots[index].handle);
        // A handle locked by its caller is in use and counts as alive.
        if let Ok(mut guard) = existing.try_lock() {
            if guard.connection_mut().is_closed().await {
                warn!(target_name = %resolved.name, "Cached connection is closed, replacing it");
                guard.connection_mut().discard().await;
                drop(guard);

                let replacement = open(resolved).await?;
                self.slots[index].handle = Arc::clone(&replacement);
                return Ok(Acquired {
                    handle: replacement,
                    existed: true,
                    replaced: true,
                });
            }
        }

        Ok(Acquired {
            handle: existing,
            existed: true,
            replaced: false,
        })
    }

    pub fn get(&self, target: &str) -> Option<SharedHandle> {
        self.slots
            .iter()
            .find(|s| s.target == target)
            .map(|s| Arc::clone(&s.handle))
    }

    /// Remove a specific handle, returning whether it was present.
    pub fn remove(&mut self, handle: &SharedHandle) -> bool {
        let before = self.slots.len();
        self.slots.retain(|s| !Arc::ptr_eq(&s.handle, handle));
        self.slots.len() != before
    }

    /// Handles in acquisition order.
    pub fn handles(&self) -> Vec<SharedHandle> {
        self.slots.iter().map(|s| Arc::clone(&s.handle)).collect()
    }

    /// Target names in acquisition order.
    pub fn targets(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.target.clone()).collect()
    }

    /// Empty the table, returning its handles in acquisition order.
    pub fn drain(&mut self) -> Vec<SharedHandle> {
        self.slots.drain(..).map(|s| s.handle).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

async fn open(resolved: &ResolvedTarget) -> DbResult<SharedHandle> {
    let start = Instant::now();
    let connection = resolved.pool.acquire().await?;
    let latency = start.elapsed();
    debug!(
        target_name = %resolved.name,
        latency_ms = latency.as_millis() as u64,
        "Acquired connection"
    );
    Ok(Arc::new(Mutex::new(ConnectionHandle::new(
        resolved.name.clone(),
        connection,
        latency,
    ))))
}
